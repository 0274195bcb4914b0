pub mod completion;
pub mod partition;

#[cfg(test)]
mod partition_test;

use crate::confrontation::Confrontation;
use completion::PlotLimits;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

/// One data source under evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub path: PathBuf,
    /// display color as `#rrggbb`, distinct between all models of a run
    pub color: String,
}

/// A named benchmark, replicated on every worker
///
/// `master` is the only state that differs between workers and is only written by the election.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub output_dir: PathBuf,
    pub master: bool,
    /// plot scale shared by all models, set right before post-processing
    pub limits: PlotLimits,
    pub confrontation: Arc<dyn Confrontation>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        confrontation: Arc<dyn Confrontation>,
    ) -> Self {
        Self {
            name: name.into(),
            output_dir: output_dir.into(),
            master: false,
            limits: PlotLimits::default(),
            confrontation,
        }
    }
}

/// A (task, model) pair by index into the task and model lists every worker shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub task: usize,
    pub model: usize,
}

impl WorkUnit {
    pub fn new(task: usize, model: usize) -> Self {
        Self { task, model }
    }
}
