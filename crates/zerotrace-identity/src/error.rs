//! Error types for identity operations.

use thiserror::Error;

/// Errors that can occur during identity operations.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The supplied password does not match the sealed keystore.
    #[error("wrong password")]
    WrongPassword,

    /// The keystore file is damaged or was sealed by different key material.
    #[error("corrupt keystore: {0}")]
    CorruptKeystore(String),

    /// An identifier string failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// An identifier does not match the hash of the presented public keys.
    #[error("identifier does not match public key material")]
    IdentifierMismatch,

    /// Keystore I/O failed.
    #[error("keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Keystore (de)serialization failed.
    #[error("keystore serialization error: {0}")]
    Serialization(String),

    /// Cryptographic error.
    #[error("cryptographic error: {0}")]
    Crypto(#[from] zerotrace_crypto::CryptoError),
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
