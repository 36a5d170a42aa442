//! `resolve-revision`: publishes the revision id of the configured source.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{TaskHandler, TaskInvocation};
use crate::domain::{ExecutionError, ResultName, TaskOutcome};
use crate::identity::RevisionResolver;
use crate::ports::SourceContent;

/// Result name used when the task does not declare exactly one result.
pub const REVISION_RESULT: &str = "revision";

pub struct ResolveRevisionHandler {
    resolver: RevisionResolver,
    source: Arc<dyn SourceContent>,
}

impl ResolveRevisionHandler {
    pub fn new(resolver: RevisionResolver, source: Arc<dyn SourceContent>) -> Self {
        Self { resolver, source }
    }
}

#[async_trait]
impl TaskHandler for ResolveRevisionHandler {
    async fn run(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, ExecutionError> {
        let resolver = match invocation.param("length") {
            Some(length) => {
                let length = length.to_plain().parse().map_err(|e| {
                    ExecutionError::Handler(format!("parameter 'length': {e}"))
                })?;
                self.resolver.with_length(length)?
            }
            None => self.resolver,
        };

        let revision = resolver.resolve(self.source.as_ref()).await?;
        info!(task = %invocation.task.name, %revision, "resolved revision");

        let result = match invocation.task.results.as_slice() {
            [only] => only.clone(),
            _ => ResultName::new(REVISION_RESULT)
                .map_err(|e| ExecutionError::Handler(e.to_string()))?,
        };

        let mut outcome = TaskOutcome::new().with_result(result, revision.as_str());
        outcome.info(format!("revision {revision} from {}", self.source.location()));
        Ok(outcome)
    }
}
