//! Cross-process exclusion for a state file
//!
//! Checkpoints replace the state file by rename, so the advisory lock lives
//! on a sibling `<file>.lock` that is never replaced.

use crate::error::{Error, Result};
use fs4::fs_std::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive lock on a state file, held until dropped
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    /// Lock file guarding `state_path`
    pub fn path_for(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map_or_else(|| OsString::from("state"), OsString::from);
        name.push(".lock");
        state_path.with_file_name(name)
    }

    /// Take the lock without waiting
    ///
    /// Fails with [`Error::Locked`] when another open [`crate::State`]
    /// holds it, in this process or any other.
    pub fn acquire(state_path: &Path) -> Result<Self> {
        let path = Self::path_for(state_path);
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                log::debug!("Locked {}", path.display());
                Ok(Self { _file: file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::Locked {
                path: state_path.to_path_buf(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
