//! Error types for the credential registry

use thiserror::Error;

/// Errors that can occur during credential operations
#[derive(Error, Debug)]
pub enum Error {
    /// No user with this id is tracked
    #[error("invalid user")]
    InvalidUser {
        /// Id that was looked up
        id: u64,
    },

    /// The macaroon/discharges pair doesn't match any user
    #[error("invalid authentication")]
    InvalidAuth,

    /// Reading or writing the auth table failed
    #[error(transparent)]
    State(#[from] statestore::Error),
}

/// Result type for credential operations
pub type Result<T> = std::result::Result<T, Error>;
