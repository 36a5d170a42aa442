//! Error taxonomy of the engine.
//!
//! - [`DefinitionError`]: detected before any task runs; the pipeline never starts.
//! - [`DispatchError`]: a task's parameters could not be resolved when it was dispatched.
//! - [`ExecutionError`]: a task's body failed.
//! - [`StoreError`]: an illegal write into the result store.
//! - [`RevisionError`]: the revision id of the source content could not be derived.
//!
//! Promotion errors live next to the promoter (`app::promoter::PromotionError`).

use std::time::Duration;

use thiserror::Error;

use super::names::{ParamName, ResultName, TaskName};
use super::outcome::LogLine;
use super::param::ResultRef;
use super::spec::ParamKind;
use super::state::TaskRunState;
use crate::app::reconcile::ReconcileError;
use crate::ports::registry::RegistryError;
use crate::ports::source::SourceError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("invalid {kind} name '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("pipeline has no tasks")]
    EmptyPipeline,

    #[error("duplicate task '{0}'")]
    DuplicateTask(TaskName),

    #[error("task '{task}' declares {what} '{name}' twice")]
    DuplicateDeclaration {
        task: String,
        what: &'static str,
        name: String,
    },

    #[error("task '{task}' runs after unknown task '{missing}'")]
    UnknownTask { task: TaskName, missing: TaskName },

    #[error("task '{task}' references result '{result}' of unknown task '{producer}'")]
    UnknownProducer {
        task: TaskName,
        producer: TaskName,
        result: ResultName,
    },

    #[error("task '{task}' references result '{result}' which task '{producer}' does not declare")]
    DanglingResult {
        task: TaskName,
        producer: TaskName,
        result: ResultName,
    },

    #[error("task '{0}' depends on itself")]
    SelfReference(TaskName),

    #[error("task '{task}' passes undeclared parameter '{param}'")]
    UnknownArgument { task: TaskName, param: ParamName },

    #[error("task '{task}' does not provide required parameter '{param}'")]
    MissingArgument { task: TaskName, param: ParamName },

    #[error("parameter '{param}' of '{owner}' expects {expected}")]
    KindMismatch {
        owner: String,
        param: ParamName,
        expected: ParamKind,
    },

    #[error("'{owner}' references unknown pipeline parameter '{param}'")]
    UnknownParam { owner: String, param: ParamName },

    #[error("default of pipeline parameter '{0}' must not contain references")]
    NonLiteralDefault(ParamName),

    #[error("pipeline parameter '{0}' is required")]
    MissingPipelineParam(ParamName),

    #[error("pipeline parameter '{0}' is not declared")]
    UndeclaredPipelineParam(String),

    #[error("task '{task}' has unknown kind '{kind}'")]
    UnknownTaskKind { task: TaskName, kind: String },

    #[error("finally task '{0}' must not declare run_after")]
    FinallyRunAfter(TaskName),

    #[error("task '{task}' references result '{result}' of finally task '{producer}'")]
    FinallyReference {
        task: TaskName,
        producer: TaskName,
        result: ResultName,
    },

    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<TaskName>),
}

fn format_cycle(cycle: &[TaskName]) -> String {
    cycle
        .iter()
        .map(TaskName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unresolved reference {reference} in parameter '{param}'")]
    UnresolvedReference { param: ParamName, reference: ResultRef },

    #[error("parameter '{0}' has no value")]
    MissingParam(ParamName),

    #[error("parameter '{param}' references unknown pipeline parameter '{missing}'")]
    UnknownParam { param: ParamName, missing: ParamName },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("step '{step}' exited with {}", describe_status(.code))]
    NonZeroExit {
        step: String,
        code: Option<i32>,
        log: Vec<LogLine>,
    },

    #[error("declared result '{0}' was not produced")]
    MissingResult(ResultName),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("task body panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Handler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Revision(#[from] RevisionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl ExecutionError {
    /// Output captured up to the point of failure, if the error carries any.
    pub fn log(&self) -> &[LogLine] {
        match self {
            ExecutionError::NonZeroExit { log, .. } => log,
            _ => &[],
        }
    }

    /// Process exit status of the failing step, if the failure came from one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task '{task}' is {state:?}; results are published only by succeeded tasks")]
    NotSucceeded { task: TaskName, state: TaskRunState },

    #[error("results of task '{0}' were already published")]
    AlreadyPublished(TaskName),

    #[error("task '{task}' does not declare result '{result}'")]
    UndeclaredResult { task: TaskName, result: ResultName },

    #[error("task '{task}' did not produce declared result '{result}'")]
    MissingResult { task: TaskName, result: ResultName },

    #[error("task '{0}' is not part of this run")]
    UnknownTask(TaskName),
}

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("source content unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("source content is empty")]
    EmptySource,

    #[error("invalid revision id '{value}': {reason}")]
    InvalidRevision { value: String, reason: &'static str },

    #[error(
        "revision length must be between {min} and {max}, got {0}",
        min = super::revision::MIN_REVISION_LEN,
        max = super::revision::MAX_REVISION_LEN
    )]
    InvalidLength(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task '{task}' cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub task: TaskName,
    pub from: TaskRunState,
    pub to: TaskRunState,
}

/// Top-level error of a pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
