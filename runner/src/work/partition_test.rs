use super::{
    completion::{ArtifactHeader, CompletionStore},
    partition::{slice_bounds, work_list, WorkPartitioner},
    Model, Task, WorkUnit,
};
use crate::confrontation::{Confrontation, ConfrontationError};
use std::{fs, path::Path, sync::Arc};
use tempfile::TempDir;

#[derive(Debug)]
struct Noop;

impl Confrontation for Noop {
    fn confront(&self, _model: &Model, _artifact: &Path) -> Result<(), ConfrontationError> {
        Ok(())
    }
}

fn fixture(dir: &Path, tasks: &[&str], models: &[&str]) -> (Vec<Task>, Vec<Model>) {
    let tasks = tasks
        .iter()
        .map(|name| Task::new(*name, dir.join(name), Arc::new(Noop)))
        .collect::<Vec<_>>();
    let models = models
        .iter()
        .map(|name| Model {
            name: name.to_string(),
            path: dir.join("models").join(name),
            color: String::from("#000000"),
        })
        .collect();

    for task in tasks.iter() {
        fs::create_dir_all(&task.output_dir).unwrap();
    }

    (tasks, models)
}

#[test]
pub fn work_list_is_task_major() {
    assert_eq!(
        work_list(2, 3),
        vec![
            WorkUnit::new(0, 0),
            WorkUnit::new(0, 1),
            WorkUnit::new(0, 2),
            WorkUnit::new(1, 0),
            WorkUnit::new(1, 1),
            WorkUnit::new(1, 2),
        ]
    );
    assert!(work_list(0, 3).is_empty());
    assert!(work_list(3, 0).is_empty());
}

#[test]
pub fn slices_cover_every_unit_exactly_once() {
    for size in 1..=9 {
        for len in 0..=40 {
            let mut next = 0;

            for rank in 0..size {
                let bounds = slice_bounds(rank, size, len);
                assert_eq!(bounds.start, next, "gap or overlap for P={size} N={len}");
                assert!(bounds.start <= bounds.end);
                next = bounds.end;
            }

            assert_eq!(next, len, "P={size} N={len} must end at N");
        }
    }
}

#[test]
pub fn slices_follow_rounded_boundaries() {
    // 10 units on 3 workers: round(0), round(3.33), round(6.67), round(10)
    let sizes: Vec<usize> = (0..3).map(|rank| slice_bounds(rank, 3, 10).len()).collect();
    assert_eq!(sizes, vec![3, 4, 3]);

    // halves round up: 5 units on 2 workers split at round(2.5) = 3
    assert_eq!(slice_bounds(0, 2, 5), 0..3);
    assert_eq!(slice_bounds(1, 2, 5), 3..5);
}

#[test]
pub fn more_workers_than_units() {
    let sizes: Vec<usize> = (0..4).map(|rank| slice_bounds(rank, 4, 2).len()).collect();

    assert_eq!(sizes.iter().sum::<usize>(), 2);
    assert!(sizes.iter().all(|size| *size <= 1));
}

#[test]
pub fn partition_of_two_tasks_and_five_models() {
    let dir = TempDir::new().unwrap();
    let (tasks, models) = fixture(dir.path(), &["T1", "T2"], &["m1", "m2", "m3", "m4", "m5"]);
    let store = CompletionStore::new("yaml");
    let partitioner = WorkPartitioner::new(&store);

    let slices: Vec<Vec<WorkUnit>> = (0..3)
        .map(|rank| partitioner.partition(&tasks, &models, rank, 3))
        .collect();

    assert_eq!(
        slices.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![3, 4, 3]
    );
    assert_eq!(slices.concat(), work_list(2, 5));
}

#[test]
pub fn partition_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let (tasks, models) = fixture(dir.path(), &["A", "B", "C"], &["x", "y", "z", "w"]);
    let store = CompletionStore::new("yaml");
    let partitioner = WorkPartitioner::new(&store);

    let forward: Vec<_> = (0..5)
        .map(|rank| partitioner.partition(&tasks, &models, rank, 5))
        .collect();
    let mut backward: Vec<_> = (0..5)
        .rev()
        .map(|rank| partitioner.partition(&tasks, &models, rank, 5))
        .collect();
    backward.reverse();

    assert_eq!(forward, backward);
}

#[test]
pub fn skip_cache_drops_completed_units() {
    let dir = TempDir::new().unwrap();
    let (tasks, models) = fixture(dir.path(), &["T1"], &["m1", "m2"]);
    let store = CompletionStore::new("yaml");

    ArtifactHeader::complete()
        .write(&store.artifact_path(&tasks[0], &models[0]))
        .unwrap();

    let filtered = WorkPartitioner::new(&store)
        .skip_cache(true)
        .partition(&tasks, &models, 0, 1);
    let full = WorkPartitioner::new(&store).partition(&tasks, &models, 0, 1);

    assert_eq!(filtered, vec![WorkUnit::new(0, 1)]);
    // without skip-cache (as in post-processing) the completed unit stays
    assert_eq!(full, vec![WorkUnit::new(0, 0), WorkUnit::new(0, 1)]);
}

#[test]
pub fn all_complete_yields_empty_list_unless_clean() {
    let dir = TempDir::new().unwrap();
    let (tasks, models) = fixture(dir.path(), &["T1", "T2"], &["m1", "m2", "m3"]);
    let store = CompletionStore::new("yaml");

    for task in tasks.iter() {
        for model in models.iter() {
            ArtifactHeader::complete()
                .write(&store.artifact_path(task, model))
                .unwrap();
        }
    }

    let skipping = WorkPartitioner::new(&store).skip_cache(true);
    assert!((0..2).all(|rank| skipping.partition(&tasks, &models, rank, 2).is_empty()));

    let clean = skipping.clone().clean(true);
    assert_eq!(clean.global(&tasks, &models), work_list(2, 3));
}

#[test]
pub fn skip_cache_removes_partial_artifacts() {
    let dir = TempDir::new().unwrap();
    let (tasks, models) = fixture(dir.path(), &["T1"], &["m1", "m2", "m3"]);
    let store = CompletionStore::new("yaml");

    let partial = store.artifact_path(&tasks[0], &models[1]);
    ArtifactHeader::default().write(&partial).unwrap();
    let garbage = store.artifact_path(&tasks[0], &models[2]);
    fs::write(&garbage, b"\x00\x01 not yaml at all: [").unwrap();

    let units = WorkPartitioner::new(&store)
        .skip_cache(true)
        .partition(&tasks, &models, 0, 1);

    assert_eq!(units, work_list(1, 3));
    assert!(!partial.exists());
    assert!(!garbage.exists());
}
