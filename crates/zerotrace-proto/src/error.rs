//! Error types for envelope operations.

use thiserror::Error;

/// Errors that can occur while sealing or opening wire messages.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// The wire message failed structural validation.
    #[error("malformed wire message: {0}")]
    Malformed(String),

    /// The payload signature did not verify.
    #[error("invalid payload signature")]
    InvalidSignature,

    /// The claimed sender identifier does not hash from the embedded keys.
    #[error("sender identifier does not match embedded public keys")]
    IdentifierMismatch,

    /// Decapsulation of the shared secret failed.
    #[error("shared secret decapsulation failed")]
    Decap,

    /// AEAD decryption failed (tampered ciphertext or wrong recipient).
    #[error("message ciphertext failed authentication")]
    Aead,

    /// The message is addressed to a different identifier.
    #[error("message is addressed to {0}")]
    WrongRecipient(String),

    /// Payload (de)serialization failed.
    #[error("payload serialization error: {0}")]
    Serialization(String),

    /// Underlying cryptographic failure outside the taxonomy above.
    #[error("cryptographic error: {0}")]
    Crypto(#[from] zerotrace_crypto::CryptoError),

    /// Identifier parsing failed.
    #[error("identity error: {0}")]
    Identity(#[from] zerotrace_identity::IdentityError),
}

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
