//! Validated names used throughout pipeline and environment definitions.
//!
//! Every name is a non-empty run of ASCII alphanumerics, `-` and `_`, at most
//! 63 characters long. The `.` character is reserved because it separates the
//! parts of a reference such as `$(tasks.build.results.image)`.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DefinitionError;

const MAX_NAME_LEN: usize = 63;

fn validate(kind: &'static str, value: &str) -> Result<(), DefinitionError> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.len() > MAX_NAME_LEN {
        Some("must be at most 63 characters")
    } else if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Some("may only contain ASCII letters, digits, '-' and '_'")
    } else if value.starts_with('-') {
        Some("must not start with '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DefinitionError::InvalidName {
            kind,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, DefinitionError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = DefinitionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DefinitionError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// Name of a task, unique within a pipeline.
    TaskName,
    "task"
);
name_type!(
    /// Name of a result a task declares and publishes.
    ResultName,
    "result"
);
name_type!(
    /// Name of a task or pipeline parameter.
    ParamName,
    "parameter"
);
name_type!(
    /// Name of a pipeline.
    PipelineName,
    "pipeline"
);
name_type!(
    /// Name of an application deployed into environments.
    AppName,
    "application"
);
name_type!(
    /// Name of an isolated deployment target (project / namespace).
    EnvironmentName,
    "environment"
);
