//! Task handlers, keyed by the `kind` of a task definition.

mod deploy;
mod image;
mod revision;
mod script;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use self::deploy::DeployHandler;
pub use self::image::BuildImageHandler;
pub use self::revision::ResolveRevisionHandler;
pub use self::script::ScriptHandler;
use crate::domain::{
    ExecutionError, ParamName, PipelineName, ResolvedValue, RunId, TaskOutcome, TaskSpec,
};

pub const SCRIPT: &str = "script";
pub const RESOLVE_REVISION: &str = "resolve-revision";
pub const BUILD_IMAGE: &str = "build-image";
pub const DEPLOY: &str = "deploy";

/// Everything a handler gets to execute one task run.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub run_id: RunId,
    pub pipeline: PipelineName,
    pub task: TaskSpec,
    pub params: BTreeMap<ParamName, ResolvedValue>,
}

impl TaskInvocation {
    pub fn param(&self, name: &str) -> Option<&ResolvedValue> {
        self.params.get(name)
    }

    /// A string parameter that must be present.
    pub fn required(&self, name: &str) -> Result<&str, ExecutionError> {
        match self.param(name) {
            Some(ResolvedValue::String(value)) => Ok(value),
            Some(ResolvedValue::Array(_)) => Err(ExecutionError::Handler(format!(
                "parameter '{name}' must be a string"
            ))),
            None => Err(ExecutionError::Handler(format!(
                "task '{}' needs parameter '{name}'",
                self.task.name
            ))),
        }
    }

    /// Parse a required parameter into a domain value.
    pub fn parsed<T, E>(&self, name: &str) -> Result<T, ExecutionError>
    where
        T: TryFrom<String, Error = E>,
        E: std::fmt::Display,
    {
        let raw = self.required(name)?;
        T::try_from(raw.to_string())
            .map_err(|e| ExecutionError::Handler(format!("parameter '{name}': {e}")))
    }
}

/// Executes the body of a task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, ExecutionError>;
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler for task kind '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Handlers by task kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers that need no external collaborator.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.handlers.insert(SCRIPT.to_string(), Arc::new(ScriptHandler::new()));
        registry
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), HandlerError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(HandlerError::AlreadyRegistered(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
