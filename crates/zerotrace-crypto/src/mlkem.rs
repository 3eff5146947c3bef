//! ML-KEM-512 key encapsulation (FIPS 203).
//!
//! Every ZeroTrace message establishes a fresh shared secret by
//! encapsulating against the recipient's KEM public key. The shared
//! secret is fed through HKDF (see [`crate::kdf`]) to produce the
//! AES-256-GCM message key.
//!
//! ## Key sizes (FIPS 203, ML-KEM-512)
//!
//! - Public key:  800 bytes
//! - Private key: 1,632 bytes
//! - Ciphertext:  768 bytes
//! - Shared secret: 32 bytes

use fips203::ml_kem_512;
use fips203::traits::{Decaps, Encaps, KeyGen, SerDes};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Size of an ML-KEM-512 public (encapsulation) key in bytes.
pub const PUBLIC_KEY_SIZE: usize = ml_kem_512::EK_LEN;

/// Size of an ML-KEM-512 private (decapsulation) key in bytes.
pub const PRIVATE_KEY_SIZE: usize = ml_kem_512::DK_LEN;

/// Size of an ML-KEM-512 ciphertext in bytes.
pub const CIPHERTEXT_SIZE: usize = ml_kem_512::CT_LEN;

/// Size of the encapsulated shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// ML-KEM public key used by senders to encapsulate a shared secret.
#[derive(Clone)]
pub struct KemPublicKey {
    inner: ml_kem_512::EncapsKey,
}

impl KemPublicKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 800-byte key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        let inner = ml_kem_512::EncapsKey::try_from_bytes(arr)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get the key as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.clone().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemPublicKey({} bytes)", PUBLIC_KEY_SIZE)
    }
}

/// ML-KEM private key used by the recipient to decapsulate.
///
/// # Security
///
/// - Does NOT implement `Clone` to prevent accidental duplication
/// - The underlying key material is wiped when dropped
pub struct KemPrivateKey {
    inner: ml_kem_512::DecapsKey,
}

impl KemPrivateKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 1,632-byte key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PRIVATE_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PRIVATE_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        let inner = ml_kem_512::DecapsKey::try_from_bytes(arr)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get raw bytes (for sealed storage).
    ///
    /// # Security
    ///
    /// Handle with care - this exposes the private key material.
    /// The caller is responsible for zeroizing the returned buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.clone().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for KemPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemPrivateKey([REDACTED])")
    }
}

/// ML-KEM key pair.
pub struct KemKeyPair {
    /// The private key (for decapsulation).
    pub private: KemPrivateKey,
    /// The public key (for encapsulation).
    pub public: KemPublicKey,
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemKeyPair {{ private: [REDACTED], public: ... }}")
    }
}

impl KemKeyPair {
    /// Generate a new ML-KEM-512 key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate() -> Result<Self> {
        let (ek, dk) = ml_kem_512::KG::try_keygen()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            private: KemPrivateKey { inner: dk },
            public: KemPublicKey { inner: ek },
        })
    }

    /// Rebuild a key pair from its serialized halves.
    ///
    /// # Errors
    ///
    /// Returns an error if either half has the wrong size or encoding.
    pub fn from_bytes(public: &[u8], private: &[u8]) -> Result<Self> {
        Ok(Self {
            private: KemPrivateKey::from_bytes(private)?,
            public: KemPublicKey::from_bytes(public)?,
        })
    }
}

/// An ML-KEM ciphertext carrying an encapsulated shared secret.
#[derive(Clone)]
pub struct KemCiphertext {
    inner: ml_kem_512::CipherText,
}

impl KemCiphertext {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 768 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; CIPHERTEXT_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidCiphertextLength {
                    expected: CIPHERTEXT_SIZE,
                    actual: bytes.len(),
                })?;
        let inner = ml_kem_512::CipherText::try_from_bytes(arr)
            .map_err(|_| CryptoError::Decapsulation)?;
        Ok(Self { inner })
    }

    /// Get as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.clone().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for KemCiphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KemCiphertext({} bytes)", CIPHERTEXT_SIZE)
    }
}

/// A 32-byte shared secret produced by encapsulation or decapsulation.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SHARED_SECRET_SIZE],
}

impl SharedSecret {
    /// Get the secret as a byte slice.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// Encapsulate a fresh shared secret against the recipient's public key.
///
/// Returns the shared secret and the ciphertext to transmit.
///
/// # Errors
///
/// Returns an error if encapsulation fails.
pub fn encapsulate(public_key: &KemPublicKey) -> Result<(SharedSecret, KemCiphertext)> {
    let (ssk, ct) = public_key
        .inner
        .try_encaps()
        .map_err(|e| CryptoError::Encapsulation(e.to_string()))?;
    Ok((
        SharedSecret {
            bytes: ssk.into_bytes(),
        },
        KemCiphertext { inner: ct },
    ))
}

/// Decapsulate a shared secret with the recipient's private key.
///
/// # Errors
///
/// Returns `CryptoError::Decapsulation` on failure. Note that ML-KEM
/// uses implicit rejection: a malformed but well-sized ciphertext
/// yields a pseudo-random secret, and the mismatch surfaces later as
/// an AEAD failure.
pub fn decapsulate(private_key: &KemPrivateKey, ciphertext: &KemCiphertext) -> Result<SharedSecret> {
    let ssk = private_key
        .inner
        .try_decaps(&ciphertext.inner)
        .map_err(|_| CryptoError::Decapsulation)?;
    Ok(SharedSecret {
        bytes: ssk.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kem_key_sizes_match_fips203() {
        assert_eq!(PUBLIC_KEY_SIZE, 800);
        assert_eq!(PRIVATE_KEY_SIZE, 1632);
        assert_eq!(CIPHERTEXT_SIZE, 768);
    }

    #[test]
    fn test_kem_roundtrip() {
        let kp = KemKeyPair::generate().unwrap();
        let (ss_sender, ct) = encapsulate(&kp.public).unwrap();
        let ss_recipient = decapsulate(&kp.private, &ct).unwrap();
        assert_eq!(ss_sender.as_bytes(), ss_recipient.as_bytes());
    }

    #[test]
    fn test_kem_wrong_key_yields_different_secret() {
        let kp1 = KemKeyPair::generate().unwrap();
        let kp2 = KemKeyPair::generate().unwrap();

        let (ss_sender, ct) = encapsulate(&kp1.public).unwrap();
        // Implicit rejection: decapsulation succeeds but the secret differs.
        let ss_wrong = decapsulate(&kp2.private, &ct).unwrap();
        assert_ne!(ss_sender.as_bytes(), ss_wrong.as_bytes());
    }

    #[test]
    fn test_kem_key_serialization_roundtrip() {
        let kp = KemKeyPair::generate().unwrap();
        let pk_bytes = kp.public.to_bytes();
        let sk_bytes = kp.private.to_bytes();
        assert_eq!(pk_bytes.len(), PUBLIC_KEY_SIZE);
        assert_eq!(sk_bytes.len(), PRIVATE_KEY_SIZE);

        let restored = KemKeyPair::from_bytes(&pk_bytes, &sk_bytes).unwrap();
        let (ss, ct) = encapsulate(&restored.public).unwrap();
        let ss2 = decapsulate(&restored.private, &ct).unwrap();
        assert_eq!(ss.as_bytes(), ss2.as_bytes());
    }

    #[test]
    fn test_kem_invalid_lengths() {
        assert!(KemPublicKey::from_bytes(&[0u8; 100]).is_err());
        assert!(KemPrivateKey::from_bytes(&[0u8; 100]).is_err());
        assert!(KemCiphertext::from_bytes(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_ciphertext_roundtrip() {
        let kp = KemKeyPair::generate().unwrap();
        let (ss, ct) = encapsulate(&kp.public).unwrap();
        let restored = KemCiphertext::from_bytes(&ct.to_bytes()).unwrap();
        let ss2 = decapsulate(&kp.private, &restored).unwrap();
        assert_eq!(ss.as_bytes(), ss2.as_bytes());
    }
}
