//! Checkpoint destinations for state snapshots

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Receives full serialized snapshots of the state.
///
/// A checkpoint either lands completely or not at all; implementations
/// must never leave a partially written snapshot behind.
pub trait Backer: Send + Sync {
    /// Persist the serialized snapshot
    fn checkpoint(&self, data: &[u8]) -> Result<()>;
}

/// Backer that writes snapshots to a file via write-then-rename
#[derive(Debug, Clone)]
pub struct FileBacker {
    path: PathBuf,
}

impl FileBacker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backer for FileBacker {
    fn checkpoint(&self, data: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        // The temp file must live on the same filesystem for the rename to be atomic.
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        log::trace!("Checkpointed {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }
}

/// Backer that keeps the last snapshot in memory
#[derive(Debug, Default)]
pub struct MemoryBacker {
    last: Mutex<Option<Vec<u8>>>,
}

impl MemoryBacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent snapshot, if any checkpoint happened
    pub fn last_snapshot(&self) -> Option<Vec<u8>> {
        match self.last.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Backer for MemoryBacker {
    fn checkpoint(&self, data: &[u8]) -> Result<()> {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = Some(data.to_vec());
        Ok(())
    }
}
