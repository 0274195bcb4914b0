use super::{completion::CompletionStore, Model, Task, WorkUnit};
use itertools::iproduct;
use std::ops::Range;
use tracing::{debug, info, warn};

/// every (task, model) pair in task-major order
pub fn work_list(tasks: usize, models: usize) -> Vec<WorkUnit> {
    iproduct!(0..tasks, 0..models)
        .map(|(task, model)| WorkUnit::new(task, model))
        .collect()
}

/// `round(rank * len / size)` with halves rounded up, in exact integer arithmetic
fn boundary(rank: usize, size: usize, len: usize) -> usize {
    (2 * rank * len + size) / (2 * size)
}

/// contiguous range of a list of `len` units owned by `rank`
pub fn slice_bounds(rank: usize, size: usize, len: usize) -> Range<usize> {
    assert!(size > 0 && rank < size, "rank {rank} outside of {size} workers");

    boundary(rank, size, len)..boundary(rank + 1, size, len)
}

/// Deterministic, communication free assignment of work units to workers
///
/// Every worker computes the same global list and takes its own slice, so nobody has to agree on
/// anything. With `skip_cache` completed units are dropped before slicing and partial artifacts
/// are removed; all workers reach the same verdict for every unit since the marker is only ever
/// read here and removal of an incomplete artifact keeps it incomplete.
#[derive(Debug, Clone)]
pub struct WorkPartitioner<'a> {
    store: &'a CompletionStore,
    skip_cache: bool,
    clean: bool,
}

impl<'a> WorkPartitioner<'a> {
    pub fn new(store: &'a CompletionStore) -> Self {
        Self {
            store,
            skip_cache: false,
            clean: false,
        }
    }

    pub fn skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    /// `clean` disables the skip-cache filter, every unit is scheduled again
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// global work list after the optional skip-cache filter
    pub fn global(&self, tasks: &[Task], models: &[Model]) -> Vec<WorkUnit> {
        let units = work_list(tasks.len(), models.len());

        if !self.skip_cache || self.clean {
            return units;
        }

        let total = units.len();
        let pending: Vec<WorkUnit> = units
            .into_iter()
            .filter(|unit| self.is_pending(&tasks[unit.task], &models[unit.model]))
            .collect();

        info!(
            total,
            pending = pending.len(),
            "Filtered completed units from the work list"
        );

        pending
    }

    /// slice of the global work list owned by `rank`
    pub fn partition(
        &self,
        tasks: &[Task],
        models: &[Model],
        rank: usize,
        size: usize,
    ) -> Vec<WorkUnit> {
        let units = self.global(tasks, models);
        let bounds = slice_bounds(rank, size, units.len());

        debug!(rank, size, start = bounds.start, end = bounds.end, "Local work slice");

        units[bounds].to_vec()
    }

    fn is_pending(&self, task: &Task, model: &Model) -> bool {
        if !self.store.exists(task, model) {
            return true;
        }

        if self.store.is_complete(task, model) {
            debug!(task = %task.name, model = %model.name, "Skipping completed unit");

            return false;
        }

        match self.store.discard(task, model) {
            Ok(()) => debug!(
                task = %task.name,
                model = %model.name,
                "Removed partial artifact"
            ),
            Err(error) => warn!(
                task = %task.name,
                model = %model.name,
                error = %error,
                "Failed to remove partial artifact, it will be overwritten"
            ),
        }

        true
    }
}
