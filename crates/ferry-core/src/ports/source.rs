//! Read-only access to the source content a revision id is derived from.

use async_trait::async_trait;
use thiserror::Error;

/// One file of a source snapshot. `path` uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: String,
    pub content: Vec<u8>,
}

/// Point-in-time view of the source. Entry order is not significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub entries: Vec<SourceEntry>,
}

impl SourceSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source '{location}' is unavailable: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait SourceContent: Send + Sync {
    /// Human-readable location, used in logs.
    fn location(&self) -> String;

    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError>;
}
