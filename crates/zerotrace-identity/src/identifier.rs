//! Self-certifying user identifiers.
//!
//! An [`Identifier`] is `base64url(SHA-256(kem_pk || sig_pk))` with
//! padding: exactly 44 case-sensitive characters for the 32-byte digest.
//! Anyone holding a claimed `(identifier, kem_pk, sig_pk)` triple can
//! recompute the hash, so identifiers need no registration authority.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{IdentityError, Result};

/// A 44-character base64url identifier binding a user to their keys.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    encoded: String,
}

impl Identifier {
    /// Length of the encoded identifier in characters.
    pub const LEN: usize = 44;

    /// Derive the identifier from the concatenated public keys.
    pub fn from_public_keys(kem_pk: &[u8], sig_pk: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kem_pk);
        hasher.update(sig_pk);
        let digest = hasher.finalize();
        Self {
            encoded: URL_SAFE.encode(digest),
        }
    }

    /// Parse and validate an identifier string.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidIdentifier` if the string is not
    /// 44 characters of padded base64url decoding to 32 bytes.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != Self::LEN {
            return Err(IdentityError::InvalidIdentifier(format!(
                "expected {} characters, got {}",
                Self::LEN,
                s.len()
            )));
        }
        let decoded = URL_SAFE
            .decode(s)
            .map_err(|e| IdentityError::InvalidIdentifier(e.to_string()))?;
        if decoded.len() != 32 {
            return Err(IdentityError::InvalidIdentifier(format!(
                "decodes to {} bytes, expected 32",
                decoded.len()
            )));
        }
        Ok(Self {
            encoded: s.to_string(),
        })
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Decode the underlying 32-byte digest.
    pub fn digest(&self) -> [u8; 32] {
        let decoded = URL_SAFE
            .decode(&self.encoded)
            .expect("identifier is validated base64url");
        decoded
            .try_into()
            .expect("identifier digest is 32 bytes")
    }

    /// Check that this identifier matches the given public key material.
    ///
    /// The comparison runs in constant time over the decoded digests.
    pub fn matches(&self, kem_pk: &[u8], sig_pk: &[u8]) -> bool {
        let expected = Self::from_public_keys(kem_pk, sig_pk);
        bool::from(self.digest().ct_eq(&expected.digest()))
    }

    /// A truncated form for logs: the first 8 characters.
    pub fn short(&self) -> &str {
        &self.encoded[..8]
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> String {
        id.encoded
    }
}

impl std::str::FromStr for Identifier {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encoded)
    }
}

impl std::fmt::Debug for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identifier({}...)", self.short())
    }
}
