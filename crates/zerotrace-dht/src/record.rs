//! Signed directory records: the values the DHT stores.
//!
//! A record maps a self-certifying identifier to the owner's public
//! keys and current anonymous address. The ML-DSA signature covers the
//! address bytes, so only the key owner can move their mailbox. Every
//! node validates records on ingest and on lookup; nothing unsigned is
//! ever served back.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use zerotrace_crypto::{SigPublicKey, Signature};
use zerotrace_identity::{Identifier, Identity};

use crate::error::{DhtError, Result};
use crate::id::NodeId;

/// Maximum serialized record size accepted on ingest.
pub const MAX_RECORD_BYTES: usize = 10 * 1024;

/// Maximum age of a record's timestamp on ingest.
pub const MAX_RECORD_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How long stored values live without a refresh.
pub const VALUE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often originators re-publish their own records.
pub const REPUBLISH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// A signed identifier -> (keys, address) directory entry.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// The owner's self-certifying identifier.
    pub identifier: String,
    /// The owner's ML-KEM-512 public key.
    #[serde(with = "crate::b64")]
    pub kem_public_key: Vec<u8>,
    /// The owner's ML-DSA-44 public key.
    #[serde(with = "crate::b64")]
    pub sig_public_key: Vec<u8>,
    /// The owner's reachable anonymous address.
    pub addr: String,
    /// Publication time, unix seconds.
    pub ts: u64,
    /// ML-DSA-44 signature over the `addr` bytes.
    #[serde(with = "crate::b64")]
    pub addr_signature: Vec<u8>,
}

impl DirectoryRecord {
    /// Create and sign a record for this identity's current address.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn create(identity: &Identity, addr: &str) -> Result<Self> {
        let signature = identity.sig_private().sign(addr.as_bytes())?;
        Ok(Self {
            identifier: identity.identifier().as_str().to_string(),
            kem_public_key: identity.kem_public().to_bytes(),
            sig_public_key: identity.sig_public().to_bytes(),
            addr: addr.to_string(),
            ts: now_unix(),
            addr_signature: signature.to_vec(),
        })
    }

    /// The DHT key this record is stored under: `SHA-256(identifier)`.
    pub fn key(&self) -> NodeId {
        record_key(&self.identifier)
    }

    /// Serialize for storage and transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DhtError::Serialization(e.to_string()))
    }

    /// Parse a serialized record.
    ///
    /// # Errors
    ///
    /// Returns `DhtError::InvalidRecord` on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_RECORD_BYTES {
            return Err(DhtError::InvalidRecord(format!(
                "record is {} bytes, limit {}",
                bytes.len(),
                MAX_RECORD_BYTES
            )));
        }
        serde_json::from_slice(bytes).map_err(|e| DhtError::InvalidRecord(e.to_string()))
    }

    /// Validate a record before trusting or storing it.
    ///
    /// Checks, in order: size, the identifier equation over the
    /// embedded keys, the address signature, and freshness.
    ///
    /// # Errors
    ///
    /// - `DhtError::InvalidRecord` on size, identifier, or signature failure
    /// - `DhtError::StaleRecord` if the timestamp is older than 7 days
    pub fn validate(&self, now: u64) -> Result<()> {
        let serialized = self.to_bytes()?;
        if serialized.len() > MAX_RECORD_BYTES {
            return Err(DhtError::InvalidRecord(format!(
                "record serializes to {} bytes, limit {}",
                serialized.len(),
                MAX_RECORD_BYTES
            )));
        }

        let identifier = Identifier::parse(&self.identifier)
            .map_err(|e| DhtError::InvalidRecord(e.to_string()))?;
        if !identifier.matches(&self.kem_public_key, &self.sig_public_key) {
            return Err(DhtError::InvalidRecord(
                "identifier does not match embedded keys".into(),
            ));
        }

        let key = SigPublicKey::from_bytes(&self.sig_public_key)
            .map_err(|e| DhtError::InvalidRecord(e.to_string()))?;
        let signature = Signature::from_bytes(&self.addr_signature)
            .map_err(|_| DhtError::InvalidRecord("bad address signature encoding".into()))?;
        key.verify(self.addr.as_bytes(), &signature)
            .map_err(|_| DhtError::InvalidRecord("address signature does not verify".into()))?;

        let age = now.saturating_sub(self.ts);
        if age > MAX_RECORD_AGE.as_secs() {
            return Err(DhtError::StaleRecord);
        }
        Ok(())
    }
}

impl std::fmt::Debug for DirectoryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryRecord")
            .field("identifier", &self.identifier)
            .field("addr", &self.addr)
            .field("ts", &self.ts)
            .finish_non_exhaustive()
    }
}

/// The DHT key an identifier's record lives under.
pub fn record_key(identifier: &str) -> NodeId {
    NodeId::hash_of(identifier.as_bytes())
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> (Identity, DirectoryRecord) {
        let identity = Identity::generate().unwrap();
        let record = DirectoryRecord::create(&identity, "owner.b32.i2p").unwrap();
        (identity, record)
    }

    #[test]
    fn test_valid_record_passes() {
        let (_, record) = record();
        record.validate(now_unix()).unwrap();
    }

    #[test]
    fn test_bytes_roundtrip() {
        let (_, record) = record();
        let bytes = record.to_bytes().unwrap();
        assert!(bytes.len() <= MAX_RECORD_BYTES);
        let back = DirectoryRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back.identifier, record.identifier);
        assert_eq!(back.addr, record.addr);
        back.validate(now_unix()).unwrap();
    }

    #[test]
    fn test_forged_address_rejected() {
        let (_, mut record) = record();
        record.addr = "attacker.b32.i2p".into();
        assert!(matches!(
            record.validate(now_unix()),
            Err(DhtError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (_, mut record) = record();
        record.addr_signature[0] ^= 0xff;
        assert!(record.validate(now_unix()).is_err());
    }

    #[test]
    fn test_identifier_mismatch_rejected() {
        let (_, mut record) = record();
        let other = Identity::generate().unwrap();
        record.identifier = other.identifier().as_str().to_string();
        assert!(matches!(
            record.validate(now_unix()),
            Err(DhtError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_stale_record_rejected() {
        let (_, mut record) = record();
        record.ts = now_unix() - MAX_RECORD_AGE.as_secs() - 60;
        // Staleness is judged after the signature, but the signature only
        // covers addr, so the aged copy still verifies and fails on age.
        assert!(matches!(
            record.validate(now_unix()),
            Err(DhtError::StaleRecord)
        ));
    }

    #[test]
    fn test_oversize_record_rejected() {
        let (_, mut record) = record();
        record.addr = "x".repeat(MAX_RECORD_BYTES);
        assert!(matches!(
            DirectoryRecord::from_bytes(&serde_json::to_vec(&record).unwrap()),
            Err(DhtError::InvalidRecord(_))
        ));
        assert!(record.validate(now_unix()).is_err());
    }

    #[test]
    fn test_record_key_is_hash_of_identifier() {
        let (identity, record) = record();
        assert_eq!(
            record.key(),
            NodeId::hash_of(identity.identifier().as_str().as_bytes())
        );
    }
}
