//! Error types for DHT operations.

use thiserror::Error;

/// Errors that can occur during DHT operations.
#[derive(Error, Debug)]
pub enum DhtError {
    /// An RPC could not reach the peer.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// An RPC timed out.
    #[error("operation timed out")]
    Timeout,

    /// No record was found for the requested key.
    #[error("no record found for key")]
    NotFound,

    /// A record's timestamp is too old to accept.
    #[error("record is stale")]
    StaleRecord,

    /// A record failed validation on ingest.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Too few replicas acknowledged a store.
    #[error("store under-replicated: {acks} acks of {required} required")]
    UnderReplicated {
        /// Acks received.
        acks: usize,
        /// Acks required.
        required: usize,
    },

    /// A malformed id, key, or wire field.
    #[error("malformed field: {0}")]
    Malformed(String),

    /// Persistent storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// (De)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Identity error.
    #[error("identity error: {0}")]
    Identity(#[from] zerotrace_identity::IdentityError),

    /// Cryptographic error.
    #[error("cryptographic error: {0}")]
    Crypto(#[from] zerotrace_crypto::CryptoError),
}

impl From<rusqlite::Error> for DhtError {
    fn from(e: rusqlite::Error) -> Self {
        DhtError::Storage(e.to_string())
    }
}

/// Result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;
