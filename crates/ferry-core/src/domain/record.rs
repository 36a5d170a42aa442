//! Task run record: one instantiation of a task definition within a run.
//!
//! State changes go through the `mark_*` methods, which reject illegal
//! transitions instead of silently overwriting the state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ExecutionError, TransitionError};
use super::ids::RunId;
use super::names::{ParamName, ResultName, TaskName};
use super::outcome::LogLine;
use super::param::ResolvedValue;
use super::spec::TaskSpec;
use super::state::{SkipReason, TaskRunState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub run_id: RunId,
    pub task: TaskName,
    pub kind: String,
    pub state: TaskRunState,

    /// Declared input resources, copied from the definition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    /// `true` for tasks of the pipeline's `finally` section.
    #[serde(default)]
    pub finally: bool,

    /// Parameter values as resolved at dispatch.
    #[serde(default)]
    pub params: BTreeMap<ParamName, ResolvedValue>,

    /// Published results; empty unless `state == Succeeded`.
    #[serde(default)]
    pub results: BTreeMap<ResultName, String>,

    #[serde(default)]
    pub log: Vec<LogLine>,

    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub skip_reason: Option<SkipReason>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRunRecord {
    pub fn new(run_id: RunId, spec: &TaskSpec) -> Self {
        Self {
            run_id,
            task: spec.name.clone(),
            kind: spec.kind.clone(),
            state: TaskRunState::Pending,
            resources: spec.resources.clone(),
            finally: false,
            params: BTreeMap::new(),
            results: BTreeMap::new(),
            log: Vec::new(),
            error: None,
            exit_code: None,
            skip_reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn new_finally(run_id: RunId, spec: &TaskSpec) -> Self {
        Self {
            finally: true,
            ..Self::new(run_id, spec)
        }
    }

    fn transition(&mut self, to: TaskRunState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                task: self.task.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskRunState::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn set_params(&mut self, params: BTreeMap<ParamName, ResolvedValue>) {
        self.params = params;
    }

    /// Running -> Succeeded. Results are attached separately, once published.
    pub fn mark_succeeded(
        &mut self,
        now: DateTime<Utc>,
        exit_code: i32,
        log: Vec<LogLine>,
    ) -> Result<(), TransitionError> {
        self.transition(TaskRunState::Succeeded)?;
        self.exit_code = Some(exit_code);
        self.log = log;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn attach_results(&mut self, results: BTreeMap<ResultName, String>) {
        debug_assert_eq!(self.state, TaskRunState::Succeeded);
        self.results = results;
    }

    pub fn mark_failed(
        &mut self,
        now: DateTime<Utc>,
        error: &ExecutionError,
    ) -> Result<(), TransitionError> {
        self.transition(TaskRunState::Failed)?;
        self.error = Some(error.to_string());
        self.exit_code = error.exit_code();
        self.log.extend(error.log().iter().cloned());
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn mark_skipped(
        &mut self,
        now: DateTime<Utc>,
        reason: SkipReason,
    ) -> Result<(), TransitionError> {
        self.transition(TaskRunState::Skipped)?;
        self.skip_reason = Some(reason);
        self.finished_at = Some(now);
        Ok(())
    }
}
