use crate::work::{
    completion::{ArtifactHeader, PlotLimits},
    Model,
};
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfrontationError {
    #[error("Failed to spawn {stage} command {command}: {source}")]
    Spawn {
        stage: &'static str,
        command: String,
        source: std::io::Error,
    },
    #[error("{stage} command exited with {status}: {stderr}")]
    Failed {
        stage: &'static str,
        status: String,
        stderr: String,
    },
    #[error("{stage} command ran into its timeout of {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
    #[error("Analysis failed: {0}")]
    Analysis(String),
    #[error("I/O error while confronting: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode plot limits: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A benchmark definition that can be confronted with every model
///
/// Only the per-unit analysis is required. Everything else is an optional capability with a
/// no-op (or artifact based) default, so the executor never has to probe what an implementation
/// supports.
pub trait Confrontation: Send + Sync + Debug {
    /// run the analysis of `model` and write its output artifact, including the completion
    /// marker, to `artifact`
    fn confront(&self, model: &Model, artifact: &Path) -> Result<(), ConfrontationError>;

    /// shared plot scale over all models, computed before any post-processing starts
    ///
    /// The default merges the `limits` recorded in every readable artifact header.
    fn plot_limits(&self, models: &[Model], artifacts: &[PathBuf]) -> PlotLimits {
        debug_assert_eq!(models.len(), artifacts.len());

        artifacts
            .iter()
            .filter_map(|artifact| match ArtifactHeader::read(artifact) {
                Ok(header) => Some(header.limits),
                Err(error) => {
                    debug!(artifact = ?artifact, error = %error, "No limits from artifact");

                    None
                }
            })
            .fold(PlotLimits::default(), PlotLimits::merge)
    }

    /// model level post-processing (scores, per-model plots)
    fn post_process(
        &self,
        _model: &Model,
        _artifact: &Path,
        _limits: &PlotLimits,
    ) -> Result<(), ConfrontationError> {
        Ok(())
    }

    /// group level outputs over all models, only called on the master of the task
    fn composite(
        &self,
        _models: &[Model],
        _artifacts: &[PathBuf],
        _limits: &PlotLimits,
    ) -> Result<(), ConfrontationError> {
        Ok(())
    }

    /// overall score of `model`, `None` if it is unavailable
    fn score(&self, _model: &Model, artifact: &Path) -> Option<f64> {
        ArtifactHeader::read(artifact)
            .ok()
            .and_then(|header| header.score)
    }
}
