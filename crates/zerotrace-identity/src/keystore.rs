//! Password-sealed at-rest storage for an identity.
//!
//! The sealed file is JSON carrying the scrypt salt, the AEAD nonce,
//! both public keys, one ciphertext of the concatenated secret keys,
//! and an HMAC tag for fast password verification:
//!
//! ```text
//! { salt[16], nonce[12], kem_pk, sig_pk, enc(kem_sk || sig_sk), keycheck }
//! ```
//!
//! Unlocking derives the scrypt key and verifies the keycheck HMAC
//! *before* attempting AEAD decryption, so a wrong password is rejected
//! quickly and without exercising the ciphertext. The file is replaced
//! atomically (write temp, fsync, rename).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use zerotrace_crypto::kdf::SALT_SIZE;
use zerotrace_crypto::{
    decrypt, derive_storage_key, encrypt, keycheck_tag, mldsa, mlkem, MessageNonce,
};

use crate::{Identity, IdentityError, Result};

/// Default keystore filename inside the data directory.
pub const DEFAULT_KEYSTORE_FILE: &str = "user_keys.json";

/// The serialized, password-sealed form of an identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct SealedKeystore {
    /// scrypt salt (16 bytes, base64url).
    pub salt: String,
    /// AES-GCM nonce (12 bytes, base64url).
    pub nonce: String,
    /// ML-KEM-512 public key (base64url).
    pub kem_public_key: String,
    /// ML-DSA-44 public key (base64url).
    pub sig_public_key: String,
    /// AEAD ciphertext of `kem_sk || sig_sk` (base64url).
    pub encrypted_secret_keys: String,
    /// `HMAC-SHA256(storage_key, "keycheck")` (base64url).
    pub keycheck: String,
}

impl std::fmt::Debug for SealedKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedKeystore")
            .field("kem_public_key", &"...")
            .field("sig_public_key", &"...")
            .finish_non_exhaustive()
    }
}

impl SealedKeystore {
    /// Seal an identity under a password.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation or encryption fails.
    pub fn seal(identity: &Identity, password: &str) -> Result<Self> {
        let password_bytes = Zeroizing::new(password.as_bytes().to_vec());

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let storage_key = derive_storage_key(&password_bytes, &salt)?;

        let mut secret = Zeroizing::new(Vec::with_capacity(
            mlkem::PRIVATE_KEY_SIZE + mldsa::PRIVATE_KEY_SIZE,
        ));
        secret.extend_from_slice(&Zeroizing::new(identity.kem_private().to_bytes()));
        secret.extend_from_slice(&Zeroizing::new(identity.sig_private().to_bytes()));

        let (ciphertext, nonce) = encrypt(&storage_key, &secret)?;
        let keycheck = keycheck_tag(&storage_key);

        Ok(Self {
            salt: URL_SAFE.encode(salt),
            nonce: URL_SAFE.encode(nonce.as_bytes()),
            kem_public_key: URL_SAFE.encode(identity.kem_public().to_bytes()),
            sig_public_key: URL_SAFE.encode(identity.sig_public().to_bytes()),
            encrypted_secret_keys: URL_SAFE.encode(ciphertext),
            keycheck: URL_SAFE.encode(keycheck),
        })
    }

    /// Unlock the sealed identity with a password.
    ///
    /// # Errors
    ///
    /// - `IdentityError::WrongPassword` if the keycheck HMAC mismatches
    /// - `IdentityError::CorruptKeystore` if any field fails to decode
    ///   or the AEAD tag fails under the correct key
    pub fn unlock(&self, password: &str) -> Result<Identity> {
        let password_bytes = Zeroizing::new(password.as_bytes().to_vec());

        let salt: [u8; SALT_SIZE] = decode_field(&self.salt, "salt")?
            .try_into()
            .map_err(|_| IdentityError::CorruptKeystore("salt is not 16 bytes".into()))?;
        let nonce_bytes = decode_field(&self.nonce, "nonce")?;
        let keycheck_saved = decode_field(&self.keycheck, "keycheck")?;
        let kem_public = decode_field(&self.kem_public_key, "kem_public_key")?;
        let sig_public = decode_field(&self.sig_public_key, "sig_public_key")?;
        let ciphertext = decode_field(&self.encrypted_secret_keys, "encrypted_secret_keys")?;

        let storage_key = derive_storage_key(&password_bytes, &salt)?;

        // Fast password check: never touch the AEAD under a wrong key.
        let expected = keycheck_tag(&storage_key);
        if !bool::from(expected.ct_eq(keycheck_saved.as_slice())) {
            return Err(IdentityError::WrongPassword);
        }

        let nonce = MessageNonce::from_bytes(&nonce_bytes)
            .map_err(|_| IdentityError::CorruptKeystore("nonce is not 12 bytes".into()))?;
        let secret = Zeroizing::new(
            decrypt(&storage_key, &nonce, &ciphertext)
                .map_err(|_| IdentityError::CorruptKeystore("secret key AEAD failed".into()))?,
        );

        if secret.len() != mlkem::PRIVATE_KEY_SIZE + mldsa::PRIVATE_KEY_SIZE {
            return Err(IdentityError::CorruptKeystore(format!(
                "secret blob is {} bytes, expected {}",
                secret.len(),
                mlkem::PRIVATE_KEY_SIZE + mldsa::PRIVATE_KEY_SIZE
            )));
        }
        let (kem_private, sig_private) = secret.split_at(mlkem::PRIVATE_KEY_SIZE);

        Identity::from_key_material(&kem_public, kem_private, &sig_public, sig_private)
    }

    /// Load a sealed keystore from disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is unreadable or
    /// `IdentityError::CorruptKeystore` if it is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IdentityError::CorruptKeystore(e.to_string()))
    }

    /// Write the sealed keystore to disk atomically.
    ///
    /// The file is written to a temporary sibling, fsynced, and renamed
    /// over the destination so a crash never leaves a torn keystore.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| IdentityError::Serialization(e.to_string()))?;

        let tmp = temp_sibling(path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn decode_field(value: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(value)
        .map_err(|e| IdentityError::CorruptKeystore(format!("field {name}: {e}")))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "keystore".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Convenience handle tying a keystore file to its path.
#[derive(Debug, Clone)]
pub struct Keystore {
    path: PathBuf,
}

impl Keystore {
    /// Point at a keystore file (existing or to be created).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The keystore file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the keystore file exists on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Generate a fresh identity and seal it to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if generation, sealing, or the write fails.
    pub fn create(&self, password: &str) -> Result<Identity> {
        let identity = Identity::generate()?;
        SealedKeystore::seal(&identity, password)?.save(&self.path)?;
        Ok(identity)
    }

    /// Unlock the identity stored on disk.
    ///
    /// # Errors
    ///
    /// See [`SealedKeystore::unlock`].
    pub fn open(&self, password: &str) -> Result<Identity> {
        SealedKeystore::load(&self.path)?.unlock(password)
    }

    /// Re-seal an identity, optionally under a new password.
    ///
    /// Produces a fresh salt and nonce either way.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or the atomic write fails.
    pub fn reseal(&self, identity: &Identity, password: &str) -> Result<()> {
        SealedKeystore::seal(identity, password)?.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unlock_roundtrip() {
        let identity = Identity::generate().unwrap();
        let sealed = SealedKeystore::seal(&identity, "correct horse").unwrap();
        let unlocked = sealed.unlock("correct horse").unwrap();
        assert_eq!(identity.identifier(), unlocked.identifier());
    }

    #[test]
    fn test_wrong_password_detected_by_keycheck() {
        let identity = Identity::generate().unwrap();
        let sealed = SealedKeystore::seal(&identity, "a").unwrap();
        assert!(matches!(
            sealed.unlock("b"),
            Err(IdentityError::WrongPassword)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_is_corrupt_not_wrong_password() {
        let identity = Identity::generate().unwrap();
        let mut sealed = SealedKeystore::seal(&identity, "pw").unwrap();

        let mut ct = URL_SAFE.decode(&sealed.encrypted_secret_keys).unwrap();
        ct[0] ^= 0xff;
        sealed.encrypted_secret_keys = URL_SAFE.encode(ct);

        assert!(matches!(
            sealed.unlock("pw"),
            Err(IdentityError::CorruptKeystore(_))
        ));
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_seal() {
        let identity = Identity::generate().unwrap();
        let a = SealedKeystore::seal(&identity, "pw").unwrap();
        let b = SealedKeystore::seal(&identity, "pw").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Keystore::at(dir.path().join(DEFAULT_KEYSTORE_FILE));

        let created = store.create("correct horse").unwrap();
        assert!(store.exists());

        let opened = store.open("correct horse").unwrap();
        assert_eq!(created.identifier(), opened.identifier());
    }

    #[test]
    fn test_reseal_changes_password() {
        let dir = tempfile::tempdir().unwrap();
        let store = Keystore::at(dir.path().join(DEFAULT_KEYSTORE_FILE));

        let identity = store.create("old").unwrap();
        store.reseal(&identity, "new").unwrap();

        assert!(matches!(
            store.open("old"),
            Err(IdentityError::WrongPassword)
        ));
        let opened = store.open("new").unwrap();
        assert_eq!(identity.identifier(), opened.identifier());
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_KEYSTORE_FILE);
        fs::write(&path, b"{\"salt\":").unwrap();
        assert!(matches!(
            SealedKeystore::load(&path),
            Err(IdentityError::CorruptKeystore(_))
        ));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = Keystore::at(dir.path().join(DEFAULT_KEYSTORE_FILE));
        store.create("pw").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
