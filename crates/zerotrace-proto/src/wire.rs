//! The outer wire message relayed between nodes.
//!
//! Byte fields are base64 (standard alphabet, padded) inside JSON.
//! `ttl` and `max_recursive_contact` are mutated by relays; everything
//! else is opaque to them. The signature bytes double as the global
//! message id for duplicate suppression.

use serde::{Deserialize, Serialize};

use zerotrace_crypto::{mldsa, mlkem, symmetric};

use crate::error::{ProtoError, Result};

/// Upper bound on `ttl` anywhere on the wire.
pub const TTL_MAX: u8 = 12;

/// Lower bound on `ttl` at message creation.
pub const TTL_MIN_INITIAL: u8 = 8;

/// Upper bound on `max_recursive_contact` anywhere on the wire.
pub const RETRY_MAX: u8 = 7;

/// Lower bound on `max_recursive_contact` at message creation.
pub const RETRY_MIN_INITIAL: u8 = 3;

/// The outer envelope POSTed to `/send`.
#[derive(Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Identifier of the node that last forwarded this message.
    pub current_node_identifier: String,
    /// Identifier of the final recipient.
    pub recipient_identifier: String,
    /// ML-KEM-512 ciphertext of the per-message shared secret (768 bytes).
    #[serde(with = "crate::b64")]
    pub shared_secret_ciphertext: Vec<u8>,
    /// AES-256-GCM ciphertext of the inner payload.
    #[serde(with = "crate::b64")]
    pub message_ciphertext: Vec<u8>,
    /// AES-GCM nonce (12 bytes).
    #[serde(with = "crate::b64")]
    pub nonce: Vec<u8>,
    /// ML-DSA-44 signature over the inner payload bytes (2,420 bytes).
    #[serde(with = "crate::b64")]
    pub signature: Vec<u8>,
    /// Remaining hop budget, decremented randomly per hop.
    pub ttl: u8,
    /// Remaining forward-queue budget, decremented randomly per hop.
    pub max_recursive_contact: u8,
}

impl WireMessage {
    /// Structurally validate the fixed-size fields and budget bounds.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::Malformed` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.shared_secret_ciphertext.len() != mlkem::CIPHERTEXT_SIZE {
            return Err(ProtoError::Malformed(format!(
                "shared_secret_ciphertext is {} bytes, expected {}",
                self.shared_secret_ciphertext.len(),
                mlkem::CIPHERTEXT_SIZE
            )));
        }
        if self.nonce.len() != symmetric::NONCE_SIZE {
            return Err(ProtoError::Malformed(format!(
                "nonce is {} bytes, expected {}",
                self.nonce.len(),
                symmetric::NONCE_SIZE
            )));
        }
        if self.signature.len() != mldsa::SIGNATURE_SIZE {
            return Err(ProtoError::Malformed(format!(
                "signature is {} bytes, expected {}",
                self.signature.len(),
                mldsa::SIGNATURE_SIZE
            )));
        }
        if self.message_ciphertext.len() < symmetric::TAG_SIZE {
            return Err(ProtoError::Malformed(
                "message_ciphertext shorter than an AEAD tag".into(),
            ));
        }
        if self.ttl > TTL_MAX {
            return Err(ProtoError::Malformed(format!(
                "ttl {} exceeds {}",
                self.ttl, TTL_MAX
            )));
        }
        if self.max_recursive_contact > RETRY_MAX {
            return Err(ProtoError::Malformed(format!(
                "max_recursive_contact {} exceeds {}",
                self.max_recursive_contact, RETRY_MAX
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireMessage")
            .field("recipient_identifier", &self.recipient_identifier)
            .field("ttl", &self.ttl)
            .field("max_recursive_contact", &self.max_recursive_contact)
            .field("ciphertext_len", &self.message_ciphertext.len())
            .finish_non_exhaustive()
    }
}
