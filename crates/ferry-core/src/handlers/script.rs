//! Runs the steps of a task as shell scripts.
//!
//! Each step gets `PARAM_<NAME>` for every resolved parameter (name
//! upper-cased, `-` replaced by `_`) and `RESULTS_DIR`. A declared result is
//! the trimmed content of `$RESULTS_DIR/<result>` after the last step.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{TaskHandler, TaskInvocation};
use crate::domain::{ExecutionError, LogLine, TaskOutcome};

#[derive(Debug, Clone)]
pub struct ScriptHandler {
    shell: String,
}

impl Default for ScriptHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptHandler {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

pub fn env_name(param: &str) -> String {
    format!("PARAM_{}", param.to_ascii_uppercase().replace('-', "_"))
}

#[async_trait]
impl TaskHandler for ScriptHandler {
    async fn run(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, ExecutionError> {
        let results_dir = tempfile::tempdir()?;
        let mut outcome = TaskOutcome::new();

        for step in &invocation.task.steps {
            if let Some(image) = &step.image {
                outcome.info(format!("step {} (image {image})", step.name));
            }

            let mut command = Command::new(&self.shell);
            command
                .arg("-c")
                .arg(&step.script)
                .env("RESULTS_DIR", results_dir.path())
                .env("FERRY_RUN_ID", invocation.run_id.to_string())
                .env("FERRY_PIPELINE", invocation.pipeline.as_str())
                .env("FERRY_TASK", invocation.task.name.as_str())
                .envs(&step.env)
                .stdin(Stdio::null())
                .kill_on_drop(true);
            for (name, value) in &invocation.params {
                command.env(env_name(name.as_str()), value.to_plain());
            }

            debug!(task = %invocation.task.name, step = %step.name, "running step");
            let output = command.output().await?;

            outcome.log.extend(
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(|line| LogLine::Stdout(line.to_string())),
            );
            outcome.log.extend(
                String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .map(|line| LogLine::Stderr(line.to_string())),
            );

            if !output.status.success() {
                return Err(ExecutionError::NonZeroExit {
                    step: step.name.clone(),
                    code: output.status.code(),
                    log: outcome.log,
                });
            }
        }

        for result in &invocation.task.results {
            let path = results_dir.path().join(result.as_str());
            match tokio::fs::read_to_string(&path).await {
                Ok(value) => {
                    outcome.results.insert(result.clone(), value.trim().to_string());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }
}
