//! ML-DSA-44 digital signatures (FIPS 204).
//!
//! Signatures bind the inner message payload to the sender's key pair.
//! The signature bytes double as the globally unique message id used by
//! the duplicate-suppression set, so they travel verbatim on the wire.
//!
//! ## Key sizes (FIPS 204, ML-DSA-44)
//!
//! - Public key:  1,312 bytes
//! - Private key: 2,560 bytes
//! - Signature:   2,420 bytes

use fips204::ml_dsa_44;
use fips204::traits::{SerDes, Signer, Verifier};

use crate::{CryptoError, Result};

/// Size of an ML-DSA-44 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = ml_dsa_44::PK_LEN;

/// Size of an ML-DSA-44 private key in bytes.
pub const PRIVATE_KEY_SIZE: usize = ml_dsa_44::SK_LEN;

/// Size of an ML-DSA-44 signature in bytes.
pub const SIGNATURE_SIZE: usize = ml_dsa_44::SIG_LEN;

/// ML-DSA public key for signature verification.
#[derive(Clone)]
pub struct SigPublicKey {
    inner: ml_dsa_44::PublicKey,
}

impl SigPublicKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 1,312-byte key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        let inner = ml_dsa_44::PublicKey::try_from_bytes(arr)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Get the key as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.clone().into_bytes().to_vec()
    }

    /// Verify a signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SignatureVerification` if the signature is invalid.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        if self.inner.verify(message, &signature.bytes, &[]) {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerification)
        }
    }
}

impl std::fmt::Debug for SigPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigPublicKey({} bytes)", PUBLIC_KEY_SIZE)
    }
}

/// ML-DSA private key for signing.
///
/// # Security
///
/// - Does NOT implement `Clone` to prevent accidental duplication
/// - The underlying key material is wiped when dropped
pub struct SigPrivateKey {
    inner: ml_dsa_44::PrivateKey,
}

impl SigPrivateKey {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 2,560-byte key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PRIVATE_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PRIVATE_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        let inner = ml_dsa_44::PrivateKey::try_from_bytes(arr)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Sign a message.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let bytes = self
            .inner
            .try_sign(message, &[])
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(Signature { bytes })
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

impl std::fmt::Debug for SigPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigPrivateKey([REDACTED])")
    }
}

/// ML-DSA key pair.
pub struct SigKeyPair {
    /// The private key (for signing).
    pub private: SigPrivateKey,
    /// The public key (for verification).
    pub public: SigPublicKey,
}

impl std::fmt::Debug for SigKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigKeyPair {{ private: [REDACTED], public: ... }}")
    }
}

impl SigKeyPair {
    /// Generate a new ML-DSA-44 key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate() -> Result<Self> {
        let (pk, sk) = ml_dsa_44::try_keygen()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            private: SigPrivateKey { inner: sk },
            public: SigPublicKey { inner: pk },
        })
    }

    /// Rebuild a key pair from its serialized halves.
    ///
    /// # Errors
    ///
    /// Returns an error if either half has the wrong size or encoding.
    pub fn from_bytes(public: &[u8], private: &[u8]) -> Result<Self> {
        Ok(Self {
            private: SigPrivateKey::from_bytes(private)?,
            public: SigPublicKey::from_bytes(public)?,
        })
    }
}

/// An ML-DSA-44 signature.
#[derive(Clone)]
pub struct Signature {
    bytes: [u8; SIGNATURE_SIZE],
}

impl Signature {
    /// Create from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 2,420 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidSignatureLength {
                    expected: SIGNATURE_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self { bytes: arr })
    }

    /// Get as a byte slice.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.bytes
    }

    /// Get as an owned buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Signature({:02x}{:02x}..{} bytes)",
            self.bytes[0],
            self.bytes[1],
            SIGNATURE_SIZE
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_sizes_match_fips204() {
        assert_eq!(PUBLIC_KEY_SIZE, 1312);
        assert_eq!(PRIVATE_KEY_SIZE, 2560);
        assert_eq!(SIGNATURE_SIZE, 2420);
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = SigKeyPair::generate().unwrap();
        let message = b"hello post-quantum world";

        let sig = kp.private.sign(message).unwrap();
        assert!(kp.public.verify(message, &sig).is_ok());
    }

    #[test]
    fn test_verify_wrong_message_fails() {
        let kp = SigKeyPair::generate().unwrap();
        let sig = kp.private.sign(b"correct message").unwrap();
        assert!(kp.public.verify(b"wrong message", &sig).is_err());
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let kp1 = SigKeyPair::generate().unwrap();
        let kp2 = SigKeyPair::generate().unwrap();

        let sig = kp1.private.sign(b"test message").unwrap();
        assert!(kp2.public.verify(b"test message", &sig).is_err());
    }

    #[test]
    fn test_key_serialization_roundtrip() {
        let kp = SigKeyPair::generate().unwrap();
        let pk_bytes = kp.public.to_bytes();
        let sk_bytes = kp.private.to_bytes();
        assert_eq!(pk_bytes.len(), PUBLIC_KEY_SIZE);
        assert_eq!(sk_bytes.len(), PRIVATE_KEY_SIZE);

        let restored = SigKeyPair::from_bytes(&pk_bytes, &sk_bytes).unwrap();
        let sig = restored.private.sign(b"roundtrip").unwrap();
        assert!(restored.public.verify(b"roundtrip", &sig).is_ok());
        // The restored public key must verify signatures from the original.
        let sig2 = kp.private.sign(b"roundtrip").unwrap();
        assert!(restored.public.verify(b"roundtrip", &sig2).is_ok());
    }

    #[test]
    fn test_signature_roundtrip() {
        let kp = SigKeyPair::generate().unwrap();
        let sig = kp.private.sign(b"roundtrip test").unwrap();
        let restored = Signature::from_bytes(&sig.to_vec()).unwrap();
        assert!(kp.public.verify(b"roundtrip test", &restored).is_ok());
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(SigPublicKey::from_bytes(&[0u8; 100]).is_err());
        assert!(SigPrivateKey::from_bytes(&[0u8; 100]).is_err());
        assert!(Signature::from_bytes(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let kp = SigKeyPair::generate().unwrap();
        let sig = kp.private.sign(b"message").unwrap();
        let mut bytes = sig.to_vec();
        bytes[0] ^= 0xff;
        let tampered = Signature::from_bytes(&bytes).unwrap();
        assert!(kp.public.verify(b"message", &tampered).is_err());
    }
}
