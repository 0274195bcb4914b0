use crate::{
    runtime::{RunMetrics, WorkerStats},
    work::{completion::CompletionStore, Model, Task},
};
use itertools::Itertools;
use serde::Serialize;
use std::{
    borrow::Cow,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// placeholder for a score that is not available
pub const MISSING_SCORE: &str = "~";

/// quote `field` if it contains a separator, a quote or a line break
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Overall scores with one row per model and one column per task
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreTable {
    pub tasks: Vec<String>,
    pub rows: Vec<(String, Vec<Option<f64>>)>,
}

impl ScoreTable {
    /// ask every task for the score of every model
    pub fn collect(tasks: &[Task], models: &[Model], store: &CompletionStore) -> Self {
        Self {
            tasks: tasks.iter().map(|task| task.name.clone()).collect(),
            rows: models
                .iter()
                .map(|model| {
                    let scores = tasks
                        .iter()
                        .map(|task| {
                            task.confrontation
                                .score(model, &store.artifact_path(task, model))
                        })
                        .collect();

                    (model.name.clone(), scores)
                })
                .collect(),
        }
    }

    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(
            out,
            "Model,{}",
            self.tasks.iter().map(|task| csv_field(task)).join(",")
        )?;

        for (model, scores) in self.rows.iter() {
            let cells: Vec<String> = scores
                .iter()
                .map(|score| match score {
                    Some(score) => score.to_string(),
                    None => MISSING_SCORE.to_string(),
                })
                .collect();

            writeln!(out, "{},{}", csv_field(model), cells.join(","))?;
        }

        out.flush()
    }

    pub fn dump(&self, path: &Path) -> Result<(), ReportError> {
        self.write_csv(BufWriter::new(File::create(path)?))?;
        info!(path = ?path, "Wrote score table");

        Ok(())
    }
}

/// Serialized form of the run metrics, derived values included
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub workers: usize,
    pub wall_clock: f64,
    pub total_elapsed: f64,
    pub load_balance: Option<f64>,
    pub parallel_efficiency: Option<f64>,
    pub failing_workers: usize,
    pub failed_units: u64,
    pub per_worker: &'a [WorkerStats],
}

impl<'a> From<&'a RunMetrics> for RunSummary<'a> {
    fn from(metrics: &'a RunMetrics) -> Self {
        Self {
            workers: metrics.workers.len(),
            wall_clock: metrics.wall_clock,
            total_elapsed: metrics.total_elapsed(),
            load_balance: metrics.load_balance(),
            parallel_efficiency: metrics.parallel_efficiency(),
            failing_workers: metrics.failing_workers(),
            failed_units: metrics.failed_units(),
            per_worker: &metrics.workers,
        }
    }
}

pub fn write_summary(metrics: &RunMetrics, path: &Path) -> Result<(), ReportError> {
    let file = File::create(path)?;
    serde_yaml::to_writer(BufWriter::new(file), &RunSummary::from(metrics))?;
    info!(path = ?path, "Wrote run summary");

    Ok(())
}

/// one line verdict of a run, naming the log when anything failed
pub fn final_line(metrics: &RunMetrics, log: &Path) -> String {
    if metrics.has_errors() {
        format!(
            "Completed in {:.1} s with {} failing unit(s) on {} worker(s), see {}",
            metrics.wall_clock,
            metrics.failed_units(),
            metrics.failing_workers(),
            log.display()
        )
    } else {
        format!("Completed in {:.1} s", metrics.wall_clock)
    }
}
