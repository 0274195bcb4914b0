pub mod command;

#[cfg(test)]
mod command_test;

use crate::{
    runtime::WorkerStats,
    work::{completion::CompletionStore, Model, Task, WorkUnit},
};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, info_span};

/// Result of running a single unit (or the composites of a task)
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// output artifact existed, nothing was run
    Cached,
    Completed(Duration),
    /// error summary of the collaborator, the full detail is in the log
    Failed(String),
}

impl UnitOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Runs the local work list of one worker through the confrontations
///
/// Every call into a confrontation is isolated: an error or a panic marks the unit as failed,
/// sets the error flag of this worker and execution continues with the next unit.
#[derive(Debug)]
pub struct TaskExecutor<'a> {
    store: &'a CompletionStore,
    clean: bool,
    stats: WorkerStats,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        String::from("panicked with a non-string payload")
    }
}

impl<'a> TaskExecutor<'a> {
    pub fn new(store: &'a CompletionStore, rank: usize, clean: bool) -> Self {
        Self {
            store,
            clean,
            stats: WorkerStats::new(rank),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn into_stats(self) -> WorkerStats {
        self.stats
    }

    /// time `call`, convert errors and panics into a failed outcome and account for it
    fn guarded<E, F>(&mut self, task: &str, model: &str, call: F) -> UnitOutcome
    where
        E: std::fmt::Display,
        F: FnOnce() -> Result<(), E>,
    {
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(call));
        let elapsed = start.elapsed();

        let detail = match result {
            Ok(Ok(())) => {
                self.stats.record_completed(elapsed);

                return UnitOutcome::Completed(elapsed);
            }
            Ok(Err(error)) => error.to_string(),
            Err(payload) => panic_message(payload),
        };

        error!(task, model, error = %detail, "Failed");
        self.stats.record_failed();

        UnitOutcome::Failed(detail)
    }

    /// phase 1: analysis of every local unit in partition order
    ///
    /// Units whose artifact already exists are reported as cached unless `clean` is set.
    pub fn run_analysis(
        &mut self,
        tasks: &[Task],
        models: &[Model],
        units: &[WorkUnit],
    ) -> Vec<(WorkUnit, UnitOutcome)> {
        let _span = info_span!("analysis", rank = self.stats.rank).entered();
        let total = units.len();

        units
            .iter()
            .enumerate()
            .map(|(index, &unit)| {
                let (task, model) = (&tasks[unit.task], &models[unit.model]);
                let artifact = self.store.artifact_path(task, model);

                let outcome = if !self.clean && artifact.is_file() {
                    self.stats.record_cached();
                    info!(task = %task.name, model = %model.name, "Using cached data");

                    UnitOutcome::Cached
                } else {
                    let outcome = self.guarded(&task.name, &model.name, || {
                        task.confrontation.confront(model, &artifact)
                    });

                    if let UnitOutcome::Completed(elapsed) = outcome {
                        info!(
                            task = %task.name,
                            model = %model.name,
                            "Completed in {:.1} s",
                            elapsed.as_secs_f64()
                        );
                    }

                    outcome
                };

                debug!("Done with {}/{total}", index + 1);

                (unit, outcome)
            })
            .collect()
    }

    /// shared plot scale of every task over all models
    ///
    /// Must run after the phase 1 barrier and before any unit of phase 2, it only reads the
    /// artifacts written in phase 1.
    pub fn determine_plot_limits(&self, tasks: &mut [Task], models: &[Model]) {
        for task in tasks.iter_mut() {
            let artifacts = self.artifacts(task, models);
            task.limits = task.confrontation.plot_limits(models, &artifacts);

            debug!(task = %task.name, limits = ?task.limits, "Determined plot limits");
        }
    }

    /// phase 2: model level post-processing of every local unit, cached ones included
    pub fn run_post_processing(
        &mut self,
        tasks: &[Task],
        models: &[Model],
        units: &[WorkUnit],
    ) -> Vec<(WorkUnit, UnitOutcome)> {
        let _span = info_span!("post_processing", rank = self.stats.rank).entered();

        units
            .iter()
            .map(|&unit| {
                let (task, model) = (&tasks[unit.task], &models[unit.model]);
                let artifact = self.store.artifact_path(task, model);

                let outcome = self.guarded(&task.name, &model.name, || {
                    task.confrontation
                        .post_process(model, &artifact, &task.limits)
                });

                if let UnitOutcome::Completed(elapsed) = outcome {
                    info!(
                        task = %task.name,
                        model = %model.name,
                        "Post-processed in {:.1} s",
                        elapsed.as_secs_f64()
                    );
                }

                (unit, outcome)
            })
            .collect()
    }

    /// group level composites of every task this worker is master of
    ///
    /// Has to be preceded by a barrier after phase 2, composites read every model's output.
    pub fn run_composites(&mut self, tasks: &[Task], models: &[Model]) -> Vec<(usize, UnitOutcome)> {
        let _span = info_span!("composites", rank = self.stats.rank).entered();

        tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.master)
            .map(|(index, task)| {
                let artifacts = self.artifacts(task, models);
                let outcome = self.guarded(&task.name, "*", || {
                    task.confrontation
                        .composite(models, &artifacts, &task.limits)
                });

                if let UnitOutcome::Completed(elapsed) = outcome {
                    info!(
                        task = %task.name,
                        "Composites completed in {:.1} s",
                        elapsed.as_secs_f64()
                    );
                }

                (index, outcome)
            })
            .collect()
    }

    fn artifacts(&self, task: &Task, models: &[Model]) -> Vec<PathBuf> {
        models
            .iter()
            .map(|model| self.store.artifact_path(task, model))
            .collect()
    }
}
