//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// A contact's identifier does not hash from its public keys.
    #[error("contact identifier does not match its public keys")]
    IdentifierMismatch,

    /// Row (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Identity error.
    #[error("identity error: {0}")]
    Identity(#[from] zerotrace_identity::IdentityError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
