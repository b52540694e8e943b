//! Error types for the state store

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing state
#[derive(Error, Debug)]
pub enum Error {
    /// The key was never set
    #[error("no state entry for key {key:?}")]
    NoState {
        /// Key that was looked up
        key: String,
    },

    /// A stored value could not be decoded into the requested type
    #[error("cannot decode state entry {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing file exists but is not a valid state snapshot
    #[error("state file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Another open state holds the lock on this file
    #[error("state file {} is in use by another process", .path.display())]
    Locked { path: PathBuf },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is the "key never written" case rather than a real failure
    pub fn is_no_state(&self) -> bool {
        matches!(self, Self::NoState { .. })
    }
}

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, Error>;
