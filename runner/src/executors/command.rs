use crate::{
    config::{CommandConfig, TaskConfig},
    confrontation::{Confrontation, ConfrontationError},
    work::{completion::PlotLimits, Model},
};
use std::{
    ffi::OsString,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, instrument, trace, warn};
use wait_timeout::ChildExt;

/// Confrontation that delegates the science to external executables
///
/// Analysis and post-processing are called as `exec params... <model-path> <artifact>`,
/// composites as `exec params... <artifact>...`. Context is passed in `CONFRONT_*` environment
/// variables; the analysis command is expected to write the artifact header itself.
#[derive(Debug, Clone)]
pub struct CommandConfrontation {
    task: String,
    analysis: CommandConfig,
    post: Option<CommandConfig>,
    composite: Option<CommandConfig>,
    timeout: Option<Duration>,
    regions: Vec<String>,
}

impl CommandConfrontation {
    pub fn load(name: &str, config: &TaskConfig, regions: &[String]) -> Self {
        Self {
            task: name.to_string(),
            analysis: CommandConfig {
                exec: config.exec.clone(),
                params: config.params.clone(),
            },
            post: config.post.clone(),
            composite: config.composite.clone(),
            timeout: config.timeout.map(Duration::from_secs),
            regions: regions.to_vec(),
        }
    }

    fn environment(
        &self,
        stage: &'static str,
        model: Option<&Model>,
        limits: Option<&PlotLimits>,
    ) -> Result<Vec<(&'static str, String)>, ConfrontationError> {
        let mut env = vec![
            ("CONFRONT_TASK", self.task.clone()),
            ("CONFRONT_STAGE", stage.to_string()),
            ("CONFRONT_REGIONS", self.regions.join(",")),
        ];

        if let Some(model) = model {
            env.push(("CONFRONT_MODEL", model.name.clone()));
            env.push(("CONFRONT_MODEL_COLOR", model.color.clone()));
        }

        if let Some(limits) = limits {
            env.push(("CONFRONT_PLOT_LIMITS", serde_json::to_string(limits)?));
        }

        Ok(env)
    }

    /// run `command` to completion, capturing stderr for error reports
    #[instrument(level = "debug", skip(self, command, args, env))]
    fn run(
        &self,
        stage: &'static str,
        command: &CommandConfig,
        args: Vec<OsString>,
        env: Vec<(&'static str, String)>,
    ) -> Result<(), ConfrontationError> {
        let mut child = Command::new(&command.exec)
            .args(command.params.iter())
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ConfrontationError::Spawn {
                stage,
                command: command.exec.to_string_lossy().into_owned(),
                source,
            })?;

        debug!("Waiting on {} ({stage})", child.id());

        // drain stderr concurrently, a chatty child would block on a full pipe otherwise
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = Vec::new();

                if let Err(error) = stderr.read_to_end(&mut buffer) {
                    warn!(error = %error, "Failed to read stderr of {stage}");
                }

                String::from_utf8_lossy(&buffer).into_owned()
            })
        });

        let status = match self.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => Some(status),
                None => {
                    // child hasn't exited yet
                    child.kill()?;
                    child.wait()?;
                    None
                }
            },
            None => Some(child.wait()?),
        };

        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        match status {
            Some(status) if status.success() => {
                trace!(stderr = %stderr, "{stage} finished");

                Ok(())
            }
            Some(status) => Err(ConfrontationError::Failed {
                stage,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            }),
            None => Err(ConfrontationError::Timeout {
                stage,
                timeout: self.timeout.unwrap_or_default(),
            }),
        }
    }
}

impl Confrontation for CommandConfrontation {
    fn confront(&self, model: &Model, artifact: &Path) -> Result<(), ConfrontationError> {
        self.run(
            "analysis",
            &self.analysis,
            vec![model.path.clone().into(), artifact.into()],
            self.environment("analysis", Some(model), None)?,
        )
    }

    fn post_process(
        &self,
        model: &Model,
        artifact: &Path,
        limits: &PlotLimits,
    ) -> Result<(), ConfrontationError> {
        match &self.post {
            Some(post) => self.run(
                "post",
                post,
                vec![model.path.clone().into(), artifact.into()],
                self.environment("post", Some(model), Some(limits))?,
            ),
            None => Ok(()),
        }
    }

    fn composite(
        &self,
        _models: &[Model],
        artifacts: &[PathBuf],
        limits: &PlotLimits,
    ) -> Result<(), ConfrontationError> {
        match &self.composite {
            Some(composite) => self.run(
                "composite",
                composite,
                artifacts.iter().map(OsString::from).collect(),
                self.environment("composite", None, Some(limits))?,
            ),
            None => Ok(()),
        }
    }
}
