//! State file shared by `run`, `promote` and `status`.
//!
//! The simulated registry and platform live in one JSON document. Commands
//! that change it take an advisory lock first: `<state>.lock`, created
//! exclusively and removed when the guard drops.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use ferry_core::impls::ClusterState;
use tracing::debug;

pub const DEFAULT_STATE_PATH: &str = ".ferry/state.json";

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Every file this state writes: the document, its lock and its
    /// temporary copy. Kept out of hashed source trees.
    pub fn files(&self) -> Vec<PathBuf> {
        vec![self.path.clone(), self.lock_path(), self.tmp_path()]
    }

    /// Take the advisory lock for a read-modify-write cycle.
    pub fn lock(&self) -> Result<StateLock> {
        self.ensure_parent()?;
        let path = self.lock_path();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())
                    .with_context(|| format!("writing {}", path.display()))?;
                debug!(path = %path.display(), "state locked");
                Ok(StateLock { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => bail!(
                "state {} is locked by another ferry process (remove {} if it is stale)",
                self.path.display(),
                path.display()
            ),
            Err(e) => Err(e).with_context(|| format!("creating {}", path.display())),
        }
    }

    /// An absent file is an empty cluster.
    pub fn load(&self) -> Result<ClusterState> {
        match fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("parsing state file {}", self.path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ClusterState::default()),
            Err(e) => Err(e).with_context(|| format!("reading state file {}", self.path.display())),
        }
    }

    /// Write through a temporary file so readers never see half a document.
    pub fn save(&self, state: &ClusterState, _lock: &StateLock) -> Result<()> {
        self.ensure_parent()?;
        let json = serde_json::to_string_pretty(state).context("serializing state")?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing state file {}", self.path.display()))?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    fn ensure_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display())),
            _ => Ok(()),
        }
    }
}

pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
