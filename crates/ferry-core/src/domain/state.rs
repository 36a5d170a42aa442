//! Task run and pipeline run states.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::names::TaskName;

/// State of one task run.
///
/// ```text
/// Pending -> Running -> Succeeded
///    |          `-----> Failed
///    `-----> Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskRunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskRunState::Succeeded | TaskRunState::Failed | TaskRunState::Skipped
        )
    }

    pub fn can_transition_to(self, next: TaskRunState) -> bool {
        use TaskRunState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Skipped) | (Running, Succeeded) | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskRunState::Pending => "pending",
            TaskRunState::Running => "running",
            TaskRunState::Succeeded => "succeeded",
            TaskRunState::Failed => "failed",
            TaskRunState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Terminal (or current) state of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
}

/// Why a task run never started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SkipReason {
    /// A predecessor, direct or transitive, failed.
    AncestorFailed(TaskName),
    /// The run stopped dispatching new work after an unrelated failure.
    RunAborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AncestorFailed(task) => write!(f, "ancestor '{task}' failed"),
            SkipReason::RunAborted => f.write_str("run aborted after a failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use TaskRunState::*;

    #[rstest]
    #[case(Pending, Running, true)]
    #[case(Pending, Skipped, true)]
    #[case(Running, Succeeded, true)]
    #[case(Running, Failed, true)]
    #[case(Pending, Succeeded, false)]
    #[case(Pending, Failed, false)]
    #[case(Running, Skipped, false)]
    #[case(Succeeded, Running, false)]
    #[case(Failed, Running, false)]
    #[case(Skipped, Running, false)]
    #[case(Succeeded, Failed, false)]
    fn transitions(#[case] from: TaskRunState, #[case] to: TaskRunState, #[case] legal: bool) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[test]
    fn terminal_states() {
        assert!(!Pending.is_terminal());
        assert!(!Running.is_terminal());
        assert!(Succeeded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Skipped.is_terminal());
    }
}
