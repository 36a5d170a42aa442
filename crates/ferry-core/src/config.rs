//! Engine configuration
//!
//! Every knob has a default; `from_env` overrides them from `FERRY_*`
//! variables. Command-line flags override both.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::app::reconcile::{CleanupPolicy, RoutePolicy};
use crate::app::scheduler::{FailurePolicy, SchedulerOptions};
use crate::domain::revision::{
    DEFAULT_REVISION_LEN, MAX_REVISION_LEN, MIN_REVISION_LEN, check_length,
};

pub const ENV_MAX_PARALLEL: &str = "FERRY_MAX_PARALLEL";
pub const ENV_FAILURE_POLICY: &str = "FERRY_FAILURE_POLICY";
pub const ENV_REVISION_LENGTH: &str = "FERRY_REVISION_LENGTH";
pub const ENV_TASK_TIMEOUT_SECS: &str = "FERRY_TASK_TIMEOUT_SECS";
pub const ENV_CLEANUP_POLICY: &str = "FERRY_CLEANUP_POLICY";
pub const ENV_ROUTE_POLICY: &str = "FERRY_ROUTE_POLICY";
pub const ENV_IGNORED_DIRS: &str = "FERRY_IGNORED_DIRS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("max_parallel must be greater than 0")]
    ZeroParallelism,

    #[error(
        "revision_length must be between {min} and {max}, got {0}",
        min = MIN_REVISION_LEN,
        max = MAX_REVISION_LEN
    )]
    RevisionLength(usize),

    #[error("task_timeout must be greater than 0")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Task bodies allowed to run at once; `None` means no cap.
    pub max_parallel: Option<usize>,

    pub failure_policy: FailurePolicy,

    /// Hex digits kept from the source digest.
    pub revision_length: usize,

    /// Per-task time limit. Tasks run unbounded when unset.
    pub task_timeout: Option<Duration>,

    pub cleanup_policy: CleanupPolicy,

    pub route_policy: RoutePolicy,

    /// Directory names skipped when hashing a source tree, on top of `.git`.
    pub ignored_dirs: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            failure_policy: FailurePolicy::default(),
            revision_length: DEFAULT_REVISION_LEN,
            task_timeout: None,
            cleanup_policy: CleanupPolicy::default(),
            route_policy: RoutePolicy::default(),
            ignored_dirs: vec!["target".to_string()],
        }
    }
}

impl EngineConfig {
    /// Creates configuration from environment variables
    ///
    /// - FERRY_MAX_PARALLEL (optional, default: unbounded)
    /// - FERRY_FAILURE_POLICY (optional, `stop` or `continue`, default: stop)
    /// - FERRY_REVISION_LENGTH (optional, default: 7)
    /// - FERRY_TASK_TIMEOUT_SECS (optional, default: none)
    /// - FERRY_CLEANUP_POLICY (optional, `strict` or `best-effort`, default: best-effort)
    /// - FERRY_ROUTE_POLICY (optional, `preserve` or `recreate`, default: preserve)
    /// - FERRY_IGNORED_DIRS (optional, comma separated, default: target)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            max_parallel: parse(&lookup, ENV_MAX_PARALLEL)?.or(defaults.max_parallel),
            failure_policy: parse(&lookup, ENV_FAILURE_POLICY)?.unwrap_or(defaults.failure_policy),
            revision_length: parse(&lookup, ENV_REVISION_LENGTH)?
                .unwrap_or(defaults.revision_length),
            task_timeout: parse::<u64, _>(&lookup, ENV_TASK_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .or(defaults.task_timeout),
            cleanup_policy: parse(&lookup, ENV_CLEANUP_POLICY)?.unwrap_or(defaults.cleanup_policy),
            route_policy: parse(&lookup, ENV_ROUTE_POLICY)?.unwrap_or(defaults.route_policy),
            ignored_dirs: lookup(ENV_IGNORED_DIRS)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.ignored_dirs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == Some(0) {
            return Err(ConfigError::ZeroParallelism);
        }
        check_length(self.revision_length)
            .map_err(|_| ConfigError::RevisionLength(self.revision_length))?;
        if self.task_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_parallel: self.max_parallel,
            failure_policy: self.failure_policy,
            task_timeout: self.task_timeout,
        }
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    let value = value.trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel, None);
        assert_eq!(config.failure_policy, FailurePolicy::StopDispatch);
        assert_eq!(config.revision_length, 7);
        assert_eq!(config.cleanup_policy, CleanupPolicy::BestEffort);
        assert_eq!(config.route_policy, RoutePolicy::Preserve);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_every_variable_is_read() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_MAX_PARALLEL, "4"),
            (ENV_FAILURE_POLICY, "continue"),
            (ENV_REVISION_LENGTH, "12"),
            (ENV_TASK_TIMEOUT_SECS, "30"),
            (ENV_CLEANUP_POLICY, "strict"),
            (ENV_ROUTE_POLICY, "recreate"),
            (ENV_IGNORED_DIRS, "node_modules, target ,"),
        ]))
        .unwrap();

        assert_eq!(config.max_parallel, Some(4));
        assert_eq!(config.failure_policy, FailurePolicy::ContinueIndependent);
        assert_eq!(config.revision_length, 12);
        assert_eq!(config.task_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.cleanup_policy, CleanupPolicy::Strict);
        assert_eq!(config.route_policy, RoutePolicy::Recreate);
        assert_eq!(config.ignored_dirs, vec!["node_modules", "target"]);

        let options = config.scheduler_options();
        assert_eq!(options.max_parallel, Some(4));
        assert_eq!(options.task_timeout, Some(Duration::from_secs(30)));
    }

    #[rstest]
    #[case(ENV_MAX_PARALLEL, "many")]
    #[case(ENV_MAX_PARALLEL, "0")]
    #[case(ENV_FAILURE_POLICY, "panic")]
    #[case(ENV_REVISION_LENGTH, "3")]
    #[case(ENV_REVISION_LENGTH, "65")]
    #[case(ENV_REVISION_LENGTH, "2")]
    #[case(ENV_TASK_TIMEOUT_SECS, "0")]
    #[case(ENV_TASK_TIMEOUT_SECS, "-1")]
    #[case(ENV_CLEANUP_POLICY, "lenient")]
    #[case(ENV_ROUTE_POLICY, "drop")]
    fn test_invalid_values_are_rejected(#[case] var: &str, #[case] value: &str) {
        assert!(EngineConfig::from_lookup(lookup(&[(var, value)])).is_err());
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_MAX_PARALLEL, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_MAX_PARALLEL, .. }));
        assert!(err.to_string().starts_with("FERRY_MAX_PARALLEL"));
    }
}
