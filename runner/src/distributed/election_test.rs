use super::{
    comm::Communicator,
    election::{elect_masters, first_argmax, local_counts},
    local::LocalGroup,
};
use crate::{
    confrontation::{Confrontation, ConfrontationError},
    work::{partition::slice_bounds, partition::work_list, Model, Task, WorkUnit},
};
use std::{path::Path, sync::Arc};

#[derive(Debug)]
struct Noop;

impl Confrontation for Noop {
    fn confront(&self, _model: &Model, _artifact: &Path) -> Result<(), ConfrontationError> {
        Ok(())
    }
}

fn tasks(names: &[&str]) -> Vec<Task> {
    names
        .iter()
        .map(|name| Task::new(*name, "/nonexistent", Arc::new(Noop)))
        .collect()
}

#[test]
pub fn argmax_prefers_lowest_rank_on_ties() {
    assert_eq!(first_argmax(&[1, 3, 3, 2]), 1);
    assert_eq!(first_argmax(&[4, 4]), 0);
    assert_eq!(first_argmax(&[0, 0, 5]), 2);
}

#[test]
pub fn argmax_of_all_zero_counts_is_rank_zero() {
    assert_eq!(first_argmax(&[0, 0, 0]), 0);
    assert_eq!(first_argmax(&[]), 0);
}

#[test]
pub fn counts_per_task() {
    let units = vec![
        WorkUnit::new(0, 0),
        WorkUnit::new(0, 1),
        WorkUnit::new(2, 1),
    ];

    assert_eq!(local_counts(3, &units), vec![2, 0, 1]);
}

#[test]
pub fn every_task_gets_exactly_one_master() {
    let size = 3;
    let models = 5;

    let results = LocalGroup::run(size, |comm| {
        let mut tasks = tasks(&["T1", "T2"]);
        let units = work_list(tasks.len(), models);
        let local = units[slice_bounds(comm.rank(), size, units.len())].to_vec();

        let masters = elect_masters(&comm, &mut tasks, &local).unwrap();
        let flags: Vec<bool> = tasks.iter().map(|task| task.master).collect();

        (masters, flags)
    });
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    // slices are [3, 4, 3]: rank 0 holds T1 x 3, rank 1 holds T1 x 2 + T2 x 2, rank 2 T2 x 3
    for (masters, _) in results.iter() {
        assert_eq!(masters, &vec![0, 2]);
    }

    for task in 0..2 {
        let count = results.iter().filter(|(_, flags)| flags[task]).count();
        assert_eq!(count, 1, "task {task} must have exactly one master");
    }
}

#[test]
pub fn task_without_units_falls_back_to_rank_zero() {
    let results = LocalGroup::run(4, |comm| {
        let mut tasks = tasks(&["T1", "T2", "T3"]);
        // nobody holds a unit of T3
        let local = match comm.rank() {
            1 => vec![WorkUnit::new(0, 0), WorkUnit::new(1, 0)],
            3 => vec![WorkUnit::new(1, 1), WorkUnit::new(1, 2)],
            _ => Vec::new(),
        };

        elect_masters(&comm, &mut tasks, &local).unwrap();

        tasks.iter().map(|task| task.master).collect::<Vec<_>>()
    });
    let flags: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    assert!(flags[1][0]);
    assert!(flags[3][1]);
    assert!(flags[0][2]);
    assert!(flags[1..].iter().all(|flags| !flags[2]));
}
