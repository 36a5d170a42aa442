//! Source content implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::ports::{SourceContent, SourceEntry, SourceError, SourceSnapshot};

/// Directory names never included in a snapshot.
pub const ALWAYS_IGNORED: &[&str] = &[".git"];

/// Source content held in memory. Used in tests and demos.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    files: BTreeMap<String, Vec<u8>>,
    unavailable: bool,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose every snapshot fails.
    pub fn unavailable() -> Self {
        Self {
            files: BTreeMap::new(),
            unavailable: true,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

#[async_trait]
impl SourceContent for InMemorySource {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable {
                location: self.location(),
                reason: "source marked unavailable".to_string(),
            });
        }
        let entries = self
            .files
            .iter()
            .map(|(path, content)| SourceEntry {
                path: path.clone(),
                content: content.clone(),
            })
            .collect();
        Ok(SourceSnapshot { entries })
    }
}

/// A checkout on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    ignored: Vec<String>,
    excluded: Vec<PathBuf>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignored: ALWAYS_IGNORED.iter().map(|s| s.to_string()).collect(),
            excluded: Vec::new(),
        }
    }

    /// Also skip directories with these names.
    pub fn ignoring<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(names.into_iter().map(Into::into));
        self
    }

    /// Also skip these files, wherever they sit under the root.
    pub fn excluding<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.excluded.extend(paths.into_iter().map(|path| {
            let path = path.into();
            std::path::absolute(&path).unwrap_or(path)
        }));
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        !self.excluded.is_empty()
            && std::path::absolute(path).is_ok_and(|path| self.excluded.contains(&path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[async_trait]
impl SourceContent for DirectorySource {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn snapshot(&self) -> Result<SourceSnapshot, SourceError> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| SourceError::Unavailable {
                location: self.location(),
                reason: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(SourceError::Unavailable {
                location: self.location(),
                reason: "not a directory".to_string(),
            });
        }

        let read_err = |path: &Path, source: std::io::Error| SourceError::Read {
            path: path.display().to_string(),
            source,
        };

        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut listing = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| read_err(&dir, e))?;
            while let Some(entry) = listing.next_entry().await.map_err(|e| read_err(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| read_err(&path, e))?;
                if file_type.is_dir() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !self.ignored.contains(&name) {
                        pending.push(path);
                    }
                } else if file_type.is_file() && !self.is_excluded(&path) {
                    let content = tokio::fs::read(&path).await.map_err(|e| read_err(&path, e))?;
                    entries.push(SourceEntry {
                        path: self.relative(&path),
                        content,
                    });
                }
            }
        }
        Ok(SourceSnapshot { entries })
    }
}
