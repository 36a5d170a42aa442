//! Revision id: the immutable version tag of a source snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::RevisionError;

/// Shortest accepted revision id.
pub const MIN_REVISION_LEN: usize = 4;

/// Longest accepted revision id (a full SHA-256 digest in hex).
pub const MAX_REVISION_LEN: usize = 64;

/// Default length of a derived revision id, as in `git rev-parse --short`.
pub const DEFAULT_REVISION_LEN: usize = 7;

/// Accept `len` as the length of a derived revision id.
pub fn check_length(len: usize) -> Result<usize, RevisionError> {
    if (MIN_REVISION_LEN..=MAX_REVISION_LEN).contains(&len) {
        Ok(len)
    } else {
        Err(RevisionError::InvalidLength(len))
    }
}

/// Short, content-derived identifier of a point-in-time source snapshot.
///
/// Joins "what was built", "what runs in dev" and "what is approved for
/// stage": images are tagged with it and promotion accepts it as input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
    pub fn parse(value: impl Into<String>) -> Result<Self, RevisionError> {
        let value = value.into();
        let reason = if value.len() < MIN_REVISION_LEN {
            Some("too short")
        } else if value.len() > MAX_REVISION_LEN {
            Some("too long")
        } else if !value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            Some("must be lowercase hexadecimal")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(RevisionError::InvalidRevision { value, reason }),
            None => Ok(Self(value)),
        }
    }

    /// Truncate a full hex digest to a revision id of `len` characters.
    pub fn from_digest(hex_digest: &str, len: usize) -> Result<Self, RevisionError> {
        let len = check_length(len)?;
        let short = hex_digest.get(..len).unwrap_or(hex_digest);
        Self::parse(short)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RevisionId {
    type Err = RevisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = RevisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.0
    }
}
