//! The signed, encrypted inner payload.
//!
//! The serialized bytes of this struct are both the AEAD plaintext and
//! the message the sender signs, so the field order below is canonical:
//! `addr`, `msg`, `sender_id`, `ts`, `sig_pk`, `kem_pk`. Reordering the
//! fields breaks signature verification against other nodes.

use serde::{Deserialize, Serialize};

use zerotrace_identity::Identifier;

use crate::error::{ProtoError, Result};

/// Sender metadata and message content, visible only after decryption.
#[derive(Clone, Serialize, Deserialize)]
pub struct InnerPayload {
    /// The sender's anonymous address (their reachable destination).
    pub addr: String,
    /// The message body.
    #[serde(with = "crate::b64")]
    pub msg: Vec<u8>,
    /// The sender's claimed identifier.
    pub sender_id: String,
    /// Creation time, unix seconds.
    pub ts: u64,
    /// The sender's ML-DSA-44 public key.
    #[serde(with = "crate::b64")]
    pub sig_pk: Vec<u8>,
    /// The sender's ML-KEM-512 public key.
    #[serde(with = "crate::b64")]
    pub kem_pk: Vec<u8>,
}

impl InnerPayload {
    /// Serialize to the canonical byte form used for signing and AEAD.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtoError::Serialization(e.to_string()))
    }

    /// Parse a decrypted payload.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Serialization` on malformed JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtoError::Serialization(e.to_string()))
    }

    /// Enforce the identifier equation over the embedded public keys.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::IdentifierMismatch` if `sender_id` is not
    /// the hash of `kem_pk || sig_pk`, or is not a valid identifier.
    pub fn verify_sender_binding(&self) -> Result<Identifier> {
        let claimed = Identifier::parse(&self.sender_id)
            .map_err(|_| ProtoError::IdentifierMismatch)?;
        if !claimed.matches(&self.kem_pk, &self.sig_pk) {
            return Err(ProtoError::IdentifierMismatch);
        }
        Ok(claimed)
    }
}

impl std::fmt::Debug for InnerPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InnerPayload")
            .field("addr", &self.addr)
            .field("sender_id", &self.sender_id)
            .field("ts", &self.ts)
            .field("msg_len", &self.msg.len())
            .finish_non_exhaustive()
    }
}
