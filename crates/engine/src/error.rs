//! Error types for the change engine

use crate::snapstate::{Compensation, TaskKind};
use thiserror::Error;

/// Errors that can occur while planning, running or querying changes
#[derive(Error, Debug)]
pub enum Error {
    /// Change selector isn't one of `in-progress`, `ready`, `all`
    #[error("invalid change selector {value:?} (expected in-progress, ready or all)")]
    InvalidSelector {
        /// The rejected selector text
        value: String,
    },

    /// No change with this id exists
    #[error("cannot find change with id {id:?}")]
    ChangeNotFound { id: String },

    /// The change already reached a terminal state
    #[error("cannot abort change {id} with nothing pending")]
    ChangeReady { id: String },

    /// A forward task operation failed
    #[error("{kind} failed: {message}")]
    BackendOperationFailed { kind: TaskKind, message: String },

    /// A compensating operation failed
    #[error("{kind} failed: {message}")]
    CompensationFailed { kind: Compensation, message: String },

    /// The snap isn't in the installed-snap table
    #[error("snap {name:?} is not installed")]
    NotInstalled { name: String },

    /// The snap is already in the installed-snap table
    #[error("snap {name:?} is already installed")]
    AlreadyInstalled { name: String },

    /// The backend refused the removal
    #[error("snap {name:?} is not removable")]
    RemovalRefused { name: String },

    /// Another non-ready change already operates on this snap
    #[error("snap {name:?} has change {change} in progress")]
    ChangeConflict { name: String, change: String },

    /// Changes were still pending when the settle deadline passed
    #[error("{pending} change(s) still pending after waiting for the runner")]
    SettleTimeout { pending: usize },

    /// Worker pool or loop thread couldn't be created
    #[error("cannot start runner: {0}")]
    Runner(String),

    /// Credential lookup failed
    #[error(transparent)]
    Auth(#[from] auth::Error),

    /// Reading or writing state failed
    #[error(transparent)]
    State(#[from] statestore::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
