//! What a task handler hands back to the scheduler.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::names::ResultName;

/// One captured line of task output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "line", rename_all = "lowercase")]
pub enum LogLine {
    Stdout(String),
    Stderr(String),
    /// Emitted by the handler itself rather than by a step.
    Info(String),
}

impl LogLine {
    pub fn text(&self) -> &str {
        match self {
            LogLine::Stdout(s) | LogLine::Stderr(s) | LogLine::Info(s) => s,
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLine::Stdout(s) => write!(f, "{s}"),
            LogLine::Stderr(s) => write!(f, "! {s}"),
            LogLine::Info(s) => write!(f, "# {s}"),
        }
    }
}

/// Successful completion of a task body.
///
/// `results` may contain more than the task declares; the scheduler keeps
/// only the declared names and fails the task if one is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub exit_code: i32,
    pub results: BTreeMap<ResultName, String>,
    pub log: Vec<LogLine>,
}

impl TaskOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, name: ResultName, value: impl Into<String>) -> Self {
        self.results.insert(name, value.into());
        self
    }

    pub fn info(&mut self, line: impl Into<String>) {
        self.log.push(LogLine::Info(line.into()));
    }
}
