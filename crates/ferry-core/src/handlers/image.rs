//! `build-image`: builds `<environment>/<app>:<revision>`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{TaskHandler, TaskInvocation};
use crate::domain::{AppName, EnvironmentName, ExecutionError, ResultName, RevisionId, TaskOutcome};
use crate::ports::{BuildRequest, ImageBuilder};

pub const IMAGE_RESULT: &str = "image";

pub struct BuildImageHandler {
    builder: Arc<dyn ImageBuilder>,
}

impl BuildImageHandler {
    pub fn new(builder: Arc<dyn ImageBuilder>) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl TaskHandler for BuildImageHandler {
    async fn run(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, ExecutionError> {
        let request = BuildRequest {
            app: invocation.parsed::<AppName, _>("app")?,
            environment: invocation.parsed::<EnvironmentName, _>("environment")?,
            revision: invocation.parsed::<RevisionId, _>("revision")?,
        };

        let image = self.builder.build(&request).await?;
        info!(task = %invocation.task.name, %image, "built image");

        let result =
            ResultName::new(IMAGE_RESULT).map_err(|e| ExecutionError::Handler(e.to_string()))?;
        let mut outcome = TaskOutcome::new().with_result(result, image.to_string());
        outcome.info(format!("built {image}"));
        Ok(outcome)
    }
}
