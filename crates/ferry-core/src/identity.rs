//! Artifact identity: derives the revision id of a source snapshot.
//!
//! The digest covers every entry in path order, each as
//! `len(path) ‖ path ‖ len(content) ‖ content` with big-endian `u64`
//! lengths, so neither entry order nor boundaries between entries can be
//! confused.

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::domain::revision::{DEFAULT_REVISION_LEN, check_length};
use crate::domain::{RevisionError, RevisionId};
use crate::ports::SourceContent;

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut acc = String::with_capacity(bytes.len() * 2);

    for byte in bytes {
        let _ = write!(&mut acc, "{byte:02x}");
    }

    acc
}

#[derive(Debug, Clone, Copy)]
pub struct RevisionResolver {
    length: usize,
}

impl Default for RevisionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_REVISION_LEN)
    }
}

impl RevisionResolver {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// Same resolver, deriving ids of `length` characters.
    pub fn with_length(self, length: usize) -> Result<Self, RevisionError> {
        Ok(Self {
            length: check_length(length)?,
        })
    }

    /// Snapshot `source` and derive its revision id.
    ///
    /// An unavailable source is fatal and not retried.
    #[instrument(skip_all, fields(source = %source.location()))]
    pub async fn resolve(&self, source: &dyn SourceContent) -> Result<RevisionId, RevisionError> {
        let mut snapshot = source.snapshot().await?;
        if snapshot.is_empty() {
            return Err(RevisionError::EmptySource);
        }
        snapshot.entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hasher = Sha256::new();
        for entry in &snapshot.entries {
            hasher.update((entry.path.len() as u64).to_be_bytes());
            hasher.update(entry.path.as_bytes());
            hasher.update((entry.content.len() as u64).to_be_bytes());
            hasher.update(&entry.content);
        }
        let digest = hex(&hasher.finalize());
        let revision = RevisionId::from_digest(&digest, self.length)?;

        debug!(files = snapshot.entries.len(), %revision, "derived revision id");
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{DirectorySource, InMemorySource};

    fn source() -> InMemorySource {
        InMemorySource::new()
            .with_file("app.py", "print('hello')")
            .with_file("requirements.txt", "flask")
    }

    #[tokio::test]
    async fn same_content_same_revision() {
        let resolver = RevisionResolver::default();
        let first = resolver.resolve(&source()).await.unwrap();
        let second = resolver.resolve(&source()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), DEFAULT_REVISION_LEN);
    }

    #[tokio::test]
    async fn changed_content_changes_revision() {
        let resolver = RevisionResolver::default();
        let before = resolver.resolve(&source()).await.unwrap();
        let after = resolver
            .resolve(&source().with_file("app.py", "print('bye')"))
            .await
            .unwrap();

        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn entry_boundaries_matter() {
        let resolver = RevisionResolver::default();
        let a = resolver
            .resolve(&InMemorySource::new().with_file("ab", "c"))
            .await
            .unwrap();
        let b = resolver
            .resolve(&InMemorySource::new().with_file("a", "bc"))
            .await
            .unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unavailable_source_is_fatal() {
        let err = RevisionResolver::default()
            .resolve(&InMemorySource::unavailable())
            .await
            .unwrap_err();
        assert!(matches!(err, RevisionError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_source_is_rejected() {
        let err = RevisionResolver::default()
            .resolve(&InMemorySource::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RevisionError::EmptySource));
    }

    #[tokio::test]
    async fn directory_and_memory_sources_agree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('hello')").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask").unwrap();

        let resolver = RevisionResolver::new(12);
        let from_disk = resolver.resolve(&DirectorySource::new(dir.path())).await.unwrap();
        let from_memory = resolver.resolve(&source()).await.unwrap();

        assert_eq!(from_disk, from_memory);
        assert_eq!(from_disk.as_str().len(), 12);
    }
}
