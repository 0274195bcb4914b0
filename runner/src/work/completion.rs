use super::{Model, Task};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

/// newest artifact header layout this build understands
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to access artifact")]
    Io(#[from] io::Error),
    #[error("Failed to (de)serialize artifact header")]
    Header(#[from] serde_yaml::Error),
}

/// Value range of a single plotted quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

/// Plot ranges per quantity, merged over all models of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlotLimits(pub BTreeMap<String, Limits>);

impl PlotLimits {
    /// widen every range of `self` so it also covers `other`
    pub fn merge(mut self, other: Self) -> Self {
        for (name, limits) in other.0 {
            self.0
                .entry(name)
                .and_modify(|current| {
                    current.min = current.min.min(limits.min);
                    current.max = current.max.max(limits.max);
                })
                .or_insert(limits);
        }

        self
    }

    pub fn get(&self, name: &str) -> Option<&Limits> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Versioned header every output artifact starts with
///
/// Collaborators are free to store additional keys next to these, they are ignored on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    #[serde(default)]
    pub schema: u32,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "PlotLimits::is_empty")]
    pub limits: PlotLimits,
}

impl ArtifactHeader {
    pub fn complete() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            complete: true,
            ..Default::default()
        }
    }

    pub fn read(path: &Path) -> Result<Self, ArtifactError> {
        let reader = BufReader::new(File::open(path)?);

        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ArtifactError> {
        let file = File::create(path)?;

        Ok(serde_yaml::to_writer(file, self)?)
    }
}

/// Read side of the per-unit completion markers
///
/// Markers are written by whoever produces the artifact, this store only interprets them.
#[derive(Debug, Clone)]
pub struct CompletionStore {
    extension: String,
}

impl CompletionStore {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    /// `<output_dir>/<task>_<model>.<ext>`
    pub fn artifact_path(&self, task: &Task, model: &Model) -> PathBuf {
        task.output_dir
            .join(format!("{}_{}.{}", task.name, model.name, self.extension))
    }

    pub fn exists(&self, task: &Task, model: &Model) -> bool {
        self.artifact_path(task, model).is_file()
    }

    /// true only if the artifact can be read and carries a true marker of a known schema
    pub fn is_complete(&self, task: &Task, model: &Model) -> bool {
        let path = self.artifact_path(task, model);

        match ArtifactHeader::read(&path) {
            Ok(header) if header.schema > SCHEMA_VERSION => {
                warn!(
                    artifact = ?path,
                    schema = header.schema,
                    "Artifact uses a newer schema than {SCHEMA_VERSION}, treating it as incomplete"
                );

                false
            }
            Ok(header) => header.complete,
            Err(error) => {
                debug!(artifact = ?path, error = %error, "Unreadable artifact counts as incomplete");

                false
            }
        }
    }

    /// remove a partial artifact, a peer removing it first is fine
    pub fn discard(&self, task: &Task, model: &Model) -> io::Result<()> {
        match std::fs::remove_file(self.artifact_path(task, model)) {
            Err(error) if error.kind() != ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}
