//! `deploy`: reconciles an environment to run a freshly built image.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{TaskHandler, TaskInvocation};
use crate::app::reconcile::Reconciler;
use crate::domain::{
    AppName, EnvironmentName, ExecutionError, ImageRef, ResultName, RevisionId, TaskOutcome,
};

pub const DEPLOYMENT_RESULT: &str = "deployment";

pub struct DeployHandler {
    reconciler: Arc<Reconciler>,
}

impl DeployHandler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl TaskHandler for DeployHandler {
    async fn run(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, ExecutionError> {
        let app = invocation.parsed::<AppName, _>("app")?;
        let environment = invocation.parsed::<EnvironmentName, _>("environment")?;
        let revision = invocation.parsed::<RevisionId, _>("revision")?;
        let image = ImageRef::new(environment.clone(), app.clone(), revision);

        let guard = self.reconciler.lock(&app, &environment).await;
        let reconciled = self.reconciler.reconcile(&guard, &image).await?;
        drop(guard);

        info!(
            task = %invocation.task.name,
            %app,
            %environment,
            %image,
            "deployed"
        );

        let result = ResultName::new(DEPLOYMENT_RESULT)
            .map_err(|e| ExecutionError::Handler(e.to_string()))?;
        let mut outcome = TaskOutcome::new().with_result(result, image.to_string());
        if let Some(previous) = &reconciled.replaced {
            outcome.info(format!("replaced revision {previous}"));
        }
        for warning in &reconciled.cleanup_warnings {
            outcome.info(format!("cleanup warning: {warning}"));
        }
        Ok(outcome)
    }
}
