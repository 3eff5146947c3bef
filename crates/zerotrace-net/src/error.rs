//! Error types for networking operations.

use thiserror::Error;

/// Errors that can occur during transport and node operations.
#[derive(Error, Debug)]
pub enum NetError {
    /// The peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// An outbound request timed out.
    #[error("request timed out")]
    Timeout,

    /// An inbound body failed structural validation.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The recipient is not a known contact and could not be discovered.
    #[error("unknown contact: {0}")]
    UnknownContact(String),

    /// The peer answered with an unexpected status or body.
    #[error("bad reply from peer: {0}")]
    BadReply(String),

    /// Envelope error.
    #[error("envelope error: {0}")]
    Proto(#[from] zerotrace_proto::ProtoError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] zerotrace_store::StoreError),

    /// DHT error.
    #[error("dht error: {0}")]
    Dht(#[from] zerotrace_dht::DhtError),

    /// Identity error.
    #[error("identity error: {0}")]
    Identity(#[from] zerotrace_identity::IdentityError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetError::Timeout
        } else {
            NetError::Unreachable(e.to_string())
        }
    }
}

/// Result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
