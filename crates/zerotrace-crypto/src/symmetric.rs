//! AES-256-GCM authenticated encryption.
//!
//! The message body travels as a single AEAD ciphertext under a key
//! derived from the per-message ML-KEM shared secret. Nonces are 96-bit
//! random values carried alongside the ciphertext on the wire.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Size of the symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, AES-GCM).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A 256-bit AES-GCM key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Create a key from an owned byte array.
    pub fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self { bytes: arr })
    }

    /// Get the key as a byte slice.
    ///
    /// # Security
    ///
    /// Avoid logging or persisting the returned bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// A 96-bit AES-GCM nonce.
#[derive(Clone)]
pub struct MessageNonce {
    bytes: [u8; NONCE_SIZE],
}

impl MessageNonce {
    /// Generate a fresh random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a nonce from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 12 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; NONCE_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self { bytes: arr })
    }

    /// Get the nonce as a byte slice.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for MessageNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageNonce({:02x}{:02x}..)", self.bytes[0], self.bytes[1])
    }
}

/// Encrypt plaintext under a fresh random nonce.
///
/// Returns the ciphertext (tag appended) and the nonce that must travel
/// with it.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<(Vec<u8>, MessageNonce)> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = MessageNonce::generate();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| CryptoError::Encryption("AES-256-GCM encryption failed".into()))?;

    Ok((ciphertext, nonce))
}

/// Decrypt and authenticate a ciphertext.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` if the tag does not verify, the
/// key is wrong, or the ciphertext is malformed.
pub fn decrypt(key: &SymmetricKey, nonce: &MessageNonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SymmetricKey {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        SymmetricKey::from_array(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"hello zerotrace";

        let (ciphertext, nonce) = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_decrypt_fails_with_wrong_key() {
        let key1 = test_key();
        let key2 = test_key();

        let (ciphertext, nonce) = encrypt(&key1, b"secret").unwrap();
        assert!(matches!(
            decrypt(&key2, &nonce, &ciphertext),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_decrypt_fails_with_tampered_ciphertext() {
        let key = test_key();
        let (mut ciphertext, nonce) = encrypt(&key, b"secret").unwrap();
        ciphertext[0] ^= 0xff;
        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn test_decrypt_fails_with_wrong_nonce() {
        let key = test_key();
        let (ciphertext, _) = encrypt(&key, b"secret").unwrap();
        let other = MessageNonce::generate();
        assert!(decrypt(&key, &other, &ciphertext).is_err());
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let key = test_key();
        let (c1, n1) = encrypt(&key, b"same message").unwrap();
        let (c2, n2) = encrypt(&key, b"same message").unwrap();
        assert_ne!(n1.as_bytes(), n2.as_bytes());
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_ciphertext_length() {
        let key = test_key();
        let plaintext = b"12345";
        let (ciphertext, _) = encrypt(&key, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_nonce_from_bytes_invalid_length() {
        assert!(MessageNonce::from_bytes(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = test_key();
        assert!(format!("{:?}", key).contains("REDACTED"));
    }
}
