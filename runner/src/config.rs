use crate::logging::RecordFormat;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Error},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

/// region every run knows about, no matter what the config defines
pub const GLOBAL_REGION: &str = "global";

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read configuration file {path}: {source}")]
    Unreadable { path: PathBuf, source: Error },
    #[error("Configuration file is invalid: {0}")]
    Invalid(#[from] serde_yaml::Error),
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to discover models in {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },
    #[error("No models resolved")]
    NoModels,
    #[error("No confrontations selected")]
    NoTasks,
    #[error("Region {0} is not defined")]
    UndefinedRegion(String),
    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory { path: PathBuf, source: Error },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    // directory all task outputs, reports and logs end up in
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    // log files are named <log_prefix><n>.log
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    // plain text or JSON lines in the shared log
    #[serde(default)]
    pub log_format: RecordFormat,
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
    // number of workers, defaults to the available parallelism
    pub workers: Option<usize>,
    #[serde(default)]
    pub clean: bool,
    #[serde(default)]
    pub skip_cache: bool,

    pub models: ModelsConfig,
    // regions that may be requested, `global` is always available
    #[serde(default)]
    pub regions: BTreeMap<String, RegionConfig>,
    #[serde(default = "default_requested_regions")]
    pub requested_regions: Vec<String>,
    // confrontations by name
    pub tasks: BTreeMap<String, TaskConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    // every direct sub-directory is a model
    pub root: PathBuf,
    // restrict the run to these model names
    #[serde(default)]
    pub only: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    pub description: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    // analysis command, called once per model
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
    // optional model level post-processing
    pub post: Option<CommandConfig>,
    // optional group level composites, only run by the master
    pub composite: Option<CommandConfig>,
    // timeout per command in seconds
    pub timeout: Option<u64>,
    // output directory relative to build_dir, defaults to the task name
    pub output: Option<PathBuf>,
}

impl TaskConfig {
    pub fn output_dir(&self, build_dir: &Path, name: &str) -> PathBuf {
        build_dir.join(self.output.clone().unwrap_or_else(|| PathBuf::from(name)))
    }

    fn commands(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        std::iter::once(("exec", self.exec.as_path()))
            .chain(self.post.iter().map(|post| ("post.exec", post.exec.as_path())))
            .chain(
                self.composite
                    .iter()
                    .map(|composite| ("composite.exec", composite.exec.as_path())),
            )
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_reader(BufReader::new(file))?)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        })
    }

    pub fn region_defined(&self, name: &str) -> bool {
        name == GLOBAL_REGION || self.regions.contains_key(name)
    }

    /// keep only the tasks whose name contains one of `filters`
    pub fn select_tasks(&mut self, filters: &[String]) {
        if filters.is_empty() {
            return;
        }

        self.tasks
            .retain(|name, _| filters.iter().any(|filter| name.contains(filter.as_str())));
    }

    /// report every problem at once instead of piece-by-piece, returns true if any was found
    pub fn preflight_checks(&mut self) -> bool {
        let mut contains_error = false;

        if self.tasks.is_empty() {
            error!("No confrontation was selected, unable to build a list of work units");
            contains_error = true;
        }

        if self.workers == Some(0) {
            error!("workers cannot be 0, a run needs at least one worker");
            contains_error = true;
        }

        if self.artifact_extension.is_empty() || self.artifact_extension.contains('/') {
            error!(
                "artifact_extension '{}' is not a valid file extension",
                self.artifact_extension
            );
            contains_error = true;
        }

        if !self.models.root.is_dir() {
            error!(
                "models.root {} is not a directory",
                self.models.root.to_string_lossy()
            );
            contains_error = true;
        }

        if self.requested_regions.is_empty() {
            warn!("No region requested, falling back to '{GLOBAL_REGION}'");
            self.requested_regions.push(GLOBAL_REGION.to_string());
        }

        for region in self.requested_regions.iter() {
            if !self.region_defined(region) {
                let defined = std::iter::once(GLOBAL_REGION)
                    .chain(self.regions.keys().map(String::as_str))
                    .sorted()
                    .join(", ");

                error!("Region {region} is not defined, known regions are: {defined}");
                contains_error = true;
            }
        }

        for (name, task) in self.tasks.iter() {
            for (field, exec) in task.commands() {
                match check_executable(exec) {
                    Ok(true) => {}
                    Ok(false) => {
                        error!(
                            "tasks.{name}.{field} target {} is not executable",
                            exec.to_string_lossy()
                        );
                        contains_error = true;
                    }
                    Err(e) => {
                        error!(
                            "Failed to determine if tasks.{name}.{field} ({}) is an executable: {e}",
                            exec.to_string_lossy()
                        );
                        contains_error = true;
                    }
                }
            }

            if task.timeout == Some(0) {
                error!("tasks.{name}.timeout cannot be 0, leave it out to disable the timeout");
                contains_error = true;
            }

            if name.contains('/') || name.is_empty() {
                error!("tasks.{name} is not usable as part of a file name");
                contains_error = true;
            }
        }

        contains_error
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("./_build")
}

fn default_log_prefix() -> String {
    String::from("run")
}

fn default_artifact_extension() -> String {
    String::from("yaml")
}

fn default_requested_regions() -> Vec<String> {
    vec![GLOBAL_REGION.to_string()]
}
