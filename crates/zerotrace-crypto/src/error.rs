//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (invalid ciphertext or key).
    #[error("decryption failed: invalid ciphertext or key")]
    Decryption,

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Key encapsulation failed.
    #[error("key encapsulation failed: {0}")]
    Encapsulation(String),

    /// Key decapsulation failed.
    #[error("key decapsulation failed")]
    Decapsulation,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length.
        expected: usize,
        /// Actual key length.
        actual: usize,
    },

    /// Invalid nonce length.
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected nonce length.
        expected: usize,
        /// Actual nonce length.
        actual: usize,
    },

    /// Invalid signature length.
    #[error("invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length.
        expected: usize,
        /// Actual signature length.
        actual: usize,
    },

    /// Invalid ciphertext length.
    #[error("invalid ciphertext length: expected {expected}, got {actual}")]
    InvalidCiphertextLength {
        /// Expected ciphertext length.
        expected: usize,
        /// Actual ciphertext length.
        actual: usize,
    },
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
