use crate::{
    config::TaskConfig,
    confrontation::{Confrontation, ConfrontationError},
    executors::command::CommandConfrontation,
    work::Model,
};
use std::{fs, path::PathBuf};
use tempfile::TempDir;

/// task running `script` through `sh -c`, the model path and artifact arrive as `$1` and `$2`
fn shell_task(script: &str, timeout: Option<u64>) -> CommandConfrontation {
    let config = TaskConfig {
        exec: PathBuf::from("/bin/sh"),
        params: vec![String::from("-c"), script.to_string(), String::from("sh")],
        post: None,
        composite: None,
        timeout,
        output: None,
    };

    CommandConfrontation::load("GPP", &config, &[String::from("global")])
}

fn model(dir: &TempDir) -> Model {
    Model {
        name: String::from("CLM"),
        path: dir.path().join("CLM"),
        color: String::from("#ff0000"),
    }
}

#[test]
pub fn stderr_survives_invalid_utf8() {
    let dir = TempDir::new().unwrap();
    let task = shell_task(
        r"printf 'bad byte \377 then real cause: missing variable gpp\n' >&2; exit 3",
        None,
    );

    match task.confront(&model(&dir), &dir.path().join("GPP_CLM.yaml")) {
        Err(ConfrontationError::Failed {
            stage,
            status,
            stderr,
        }) => {
            assert_eq!(stage, "analysis");
            assert!(status.contains('3'), "{status}");
            assert!(stderr.starts_with("bad byte "), "{stderr}");
            assert!(
                stderr.ends_with("then real cause: missing variable gpp"),
                "{stderr}"
            );
        }
        other => panic!("expected a failed command, got {other:?}"),
    }
}

#[test]
pub fn context_reaches_the_command() {
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("GPP_CLM.yaml");
    let task = shell_task(
        r#"printf '%s %s %s %s\n' "$CONFRONT_TASK" "$CONFRONT_MODEL" "$CONFRONT_STAGE" "$1" > "$2""#,
        None,
    );

    task.confront(&model(&dir), &artifact).unwrap();

    assert_eq!(
        fs::read_to_string(&artifact).unwrap(),
        format!("GPP CLM analysis {}\n", dir.path().join("CLM").display())
    );
}

#[test]
pub fn slow_command_times_out() {
    let dir = TempDir::new().unwrap();
    let task = shell_task("exec sleep 10", Some(1));

    assert!(matches!(
        task.confront(&model(&dir), &dir.path().join("GPP_CLM.yaml")),
        Err(ConfrontationError::Timeout { stage: "analysis", .. })
    ));
}
