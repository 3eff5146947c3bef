//! Key derivation: HKDF-SHA256 for message keys, scrypt for the keystore.
//!
//! The HKDF invocation deliberately uses an empty salt and empty info so
//! that independently written nodes derive byte-identical message keys
//! from the same encapsulated secret. Changing either value is a wire
//! break.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use scrypt::Params;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::symmetric::{SymmetricKey, KEY_SIZE};
use crate::{CryptoError, Result};

/// Label the keystore HMAC commits to for fast password checks.
pub const KEYCHECK_LABEL: &[u8] = b"keycheck";

/// Size of the scrypt salt in bytes.
pub const SALT_SIZE: usize = 16;

// scrypt cost parameters for sealing the keystore: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Derive the AES-256-GCM message key from an ML-KEM shared secret.
///
/// `HKDF-SHA256: Extract(salt=empty, ikm=ss) -> Expand(info=empty, 32)`.
pub fn derive_message_key(shared_secret: &[u8]) -> SymmetricKey {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(&[], &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    let key = SymmetricKey::from_array(okm);
    okm.zeroize();
    key
}

/// Derive the keystore sealing key from a password and salt via scrypt.
///
/// # Errors
///
/// Returns an error if the scrypt parameters are rejected.
pub fn derive_storage_key(password: &[u8], salt: &[u8; SALT_SIZE]) -> Result<SymmetricKey> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut okm = [0u8; KEY_SIZE];
    scrypt::scrypt(password, salt, &params, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let key = SymmetricKey::from_array(okm);
    okm.zeroize();
    Ok(key)
}

/// Compute the keystore password-check tag: `HMAC-SHA256(k, "keycheck")`.
///
/// Verifying this tag before attempting AEAD decryption gives a fast
/// wrong-password answer without exposing a decryption oracle.
pub fn keycheck_tag(key: &SymmetricKey) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(KEYCHECK_LABEL);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use subtle::ConstantTimeEq;

    #[test]
    fn test_message_key_deterministic() {
        let ss = [7u8; 32];
        let k1 = derive_message_key(&ss);
        let k2 = derive_message_key(&ss);
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_message_key_differs_per_secret() {
        let k1 = derive_message_key(&[1u8; 32]);
        let k2 = derive_message_key(&[2u8; 32]);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_storage_key_deterministic() {
        let salt = [3u8; SALT_SIZE];
        let k1 = derive_storage_key(b"hunter2", &salt).unwrap();
        let k2 = derive_storage_key(b"hunter2", &salt).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_storage_key_salt_sensitivity() {
        let k1 = derive_storage_key(b"hunter2", &[0u8; SALT_SIZE]).unwrap();
        let k2 = derive_storage_key(b"hunter2", &[1u8; SALT_SIZE]).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_storage_key_password_sensitivity() {
        let salt = [5u8; SALT_SIZE];
        let k1 = derive_storage_key(b"password-a", &salt).unwrap();
        let k2 = derive_storage_key(b"password-b", &salt).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_keycheck_tag_matches_for_same_key() {
        let salt = [9u8; SALT_SIZE];
        let k1 = derive_storage_key(b"pw", &salt).unwrap();
        let k2 = derive_storage_key(b"pw", &salt).unwrap();
        let t1 = keycheck_tag(&k1);
        let t2 = keycheck_tag(&k2);
        assert!(bool::from(t1.ct_eq(&t2)));
    }

    #[test]
    fn test_keycheck_tag_differs_for_wrong_password() {
        let salt = [9u8; SALT_SIZE];
        let right = derive_storage_key(b"right", &salt).unwrap();
        let wrong = derive_storage_key(b"wrong", &salt).unwrap();
        assert!(!bool::from(keycheck_tag(&right).ct_eq(&keycheck_tag(&wrong))));
    }
}
