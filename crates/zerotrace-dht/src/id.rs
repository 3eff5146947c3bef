//! 256-bit node identifiers and the XOR distance metric.
//!
//! Node ids and value keys live in the same space: SHA-256 outputs.
//! Bucket `i` of a routing table holds peers whose distance from the
//! local id has its highest set bit at position `i` (bit 255 = the most
//! significant, bucket 255 = the far half of the keyspace).

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DhtError, Result};

/// Width of the id space in bits.
pub const ID_BITS: usize = 256;

/// A 256-bit node identifier or value key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Generate a cryptographically random id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap an owned 32-byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DhtError::Malformed(format!("node id is {} bytes, expected 32", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Parse a 64-character hex id.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| DhtError::Malformed(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Hash arbitrary bytes into the id space.
    pub fn hash_of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    /// The id as raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// XOR distance to another id.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Index of the bucket `other` falls into relative to `self`.
    ///
    /// Returns `None` for the id itself (distance zero).
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let distance = self.distance(other);
        let lz = distance.leading_zeros();
        if lz == ID_BITS {
            None
        } else {
            Some(ID_BITS - 1 - lz)
        }
    }

    /// A random id whose distance from `self` lands in bucket `index`.
    ///
    /// Used by the bucket-refresh loop to probe a specific region of
    /// the keyspace.
    pub fn random_in_bucket(&self, index: usize) -> NodeId {
        debug_assert!(index < ID_BITS);
        let mut bytes = self.0;
        let byte_idx = 31 - index / 8;
        let bit_idx = index % 8;

        // Flip the bucket bit so the distance's top bit is exactly `index`.
        bytes[byte_idx] ^= 1 << bit_idx;

        // Randomize every bit below it.
        let mut rand_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut rand_bytes);
        for bit in 0..index {
            let b = 31 - bit / 8;
            let mask = 1 << (bit % 8);
            bytes[b] = (bytes[b] & !mask) | (rand_bytes[b] & mask);
        }
        NodeId(bytes)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({}...)", &self.to_hex()[..8])
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// XOR distance between two ids; ordered lexicographically, which for
/// big-endian byte layout matches numeric order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; 32]);

impl Distance {
    /// Number of leading zero bits (0..=256).
    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count
    }

    /// Whether this is the zero distance.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl std::fmt::Debug for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Distance(lz={})", self.leading_zeros())
    }
}
