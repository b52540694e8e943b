//! # statestore
//!
//! Durable key/value state shared between the change runner and request
//! handlers.
//!
//! Values are arbitrary serde types stored as JSON under string keys. All
//! access goes through a single store-wide lock: callers take a
//! [`StateGuard`] with [`State::lock`], read with [`StateGuard::get`] and
//! write with [`StateGuard::set`]. Every `set` checkpoints the whole table
//! to the [`Backer`]; when the checkpoint fails the in-memory value is
//! rolled back, so memory and disk never disagree. Writes to several keys
//! that must land together go through [`StateGuard::batch`].
//!
//! A state opened from a file with [`State::open`] also holds an exclusive
//! [`StateLock`] on it, so a second process cannot silently overwrite the
//! first one's checkpoints.
//!
//! ## Example
//!
//! ```
//! use statestore::State;
//!
//! let state = State::in_memory();
//! let mut st = state.lock();
//! assert!(st.get::<u32>("counter").unwrap_err().is_no_state());
//! st.set("counter", &7u32).unwrap();
//! assert_eq!(st.get::<u32>("counter").unwrap(), 7);
//! ```

pub mod backer;
pub mod error;
pub mod lock;

pub use backer::{Backer, FileBacker, MemoryBacker};
pub use error::{Error, Result};
pub use lock::StateLock;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// On-disk layout of a checkpoint
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
}

/// Lock-serialized key/value state
pub struct State {
    data: Mutex<BTreeMap<String, serde_json::Value>>,
    backer: Box<dyn Backer>,
    _lock: Option<StateLock>,
}

impl State {
    /// Create an empty state checkpointing to the given backer
    pub fn new(backer: impl Backer + 'static) -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            backer: Box::new(backer),
            _lock: None,
        }
    }

    /// Create an empty state that only keeps snapshots in memory
    pub fn in_memory() -> Self {
        Self::new(MemoryBacker::new())
    }

    /// Open the state file at `path`, or start empty if it doesn't exist yet
    ///
    /// Fails with [`Error::Locked`] while another `State` has it open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let lock = StateLock::acquire(path)?;
        let data = match fs::read(path) {
            Ok(raw) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(&raw).map_err(|source| Error::Corrupt {
                        path: path.to_path_buf(),
                        source,
                    })?;
                log::debug!(
                    "Loaded {} state entries from {}",
                    snapshot.data.len(),
                    path.display()
                );
                snapshot.data
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("State file {} does not exist, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            data: Mutex::new(data),
            backer: Box::new(FileBacker::new(path)),
            _lock: Some(lock),
        })
    }

    /// Acquire the store-wide lock
    pub fn lock(&self) -> StateGuard<'_> {
        let data = match self.data.lock() {
            Ok(data) => data,
            // A panicking holder never leaves a half-applied set behind
            Err(poisoned) => poisoned.into_inner(),
        };
        StateGuard { state: self, data }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").finish_non_exhaustive()
    }
}

/// Exclusive access to the state while held
pub struct StateGuard<'a> {
    state: &'a State,
    data: MutexGuard<'a, BTreeMap<String, serde_json::Value>>,
}

impl<'a> StateGuard<'a> {
    /// Decode the value stored under `key`
    ///
    /// Fails with [`Error::NoState`] if the key was never set.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.data.get(key).ok_or_else(|| Error::NoState {
            key: key.to_string(),
        })?;
        T::deserialize(value).map_err(|source| Error::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Whether `key` has ever been set
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Overwrite the value under `key` and checkpoint
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let mut batch = self.batch();
        batch.set(key, value)?;
        batch.commit()
    }

    /// Stage several writes that land in a single checkpoint
    pub fn batch(&mut self) -> Batch<'_, 'a> {
        Batch {
            guard: self,
            staged: Vec::new(),
        }
    }

    fn apply(&mut self, staged: Vec<(String, serde_json::Value)>) -> Result<()> {
        let mut previous = Vec::with_capacity(staged.len());
        for (key, value) in staged {
            let old = self.data.insert(key.clone(), value);
            previous.push((key, old));
        }

        if let Err(e) = self.checkpoint() {
            for (key, old) in previous.into_iter().rev() {
                match old {
                    Some(old) => self.data.insert(key, old),
                    None => self.data.remove(&key),
                };
            }
            log::warn!("Checkpoint failed, keeping previous values: {e}");
            return Err(e);
        }
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        // Borrow-only view so we don't clone the whole table per write
        #[derive(Serialize)]
        struct SnapshotRef<'b> {
            data: &'b BTreeMap<String, serde_json::Value>,
        }

        let raw = serde_json::to_vec(&SnapshotRef { data: &self.data })?;
        self.state.backer.checkpoint(&raw)
    }
}

/// Writes staged against a [`StateGuard`], applied by [`Batch::commit`]
///
/// Either every staged value lands in the checkpoint or none of them do.
/// Dropping a batch without committing discards it.
pub struct Batch<'g, 'a> {
    guard: &'g mut StateGuard<'a>,
    staged: Vec<(String, serde_json::Value)>,
}

impl Batch<'_, '_> {
    /// Stage `value` under `key`
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.staged.push((key.to_string(), value));
        Ok(())
    }

    /// Apply all staged values and checkpoint once
    pub fn commit(self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.guard.apply(self.staged)
    }
}
