//! The k-bucket routing table.
//!
//! One bucket per bit of the id space, each holding up to `K` peers
//! ordered least-recently-seen first, plus a bounded replacement cache
//! that feeds the bucket when a live entry is evicted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, ID_BITS};

/// Bucket capacity (Kademlia `k`).
pub const K: usize = 20;

/// Lookup parallelism (Kademlia `alpha`).
pub const ALPHA: usize = 3;

/// Bounded size of each bucket's replacement cache.
const REPLACEMENT_CACHE_LIMIT: usize = 8;

/// A reachable DHT peer address.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    /// Hostname, loopback IP, or `.b32.i2p` destination.
    pub host: String,
    /// TCP port of the peer's HTTP endpoint.
    pub port: u16,
}

impl NodeAddr {
    /// Create an address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeAddr({self})")
    }
}

/// A routing-table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// The peer's id.
    pub id: NodeId,
    /// Where to reach it.
    pub addr: NodeAddr,
    /// Unix seconds the peer was last heard from.
    pub last_seen: u64,
}

#[derive(Default)]
struct Bucket {
    /// Least-recently-seen first; refreshed entries move to the back.
    entries: Vec<Peer>,
    replacements: VecDeque<Peer>,
    refreshed_at: u64,
}

impl Bucket {
    fn touch(&mut self, peer: Peer, k: usize) -> bool {
        if let Some(pos) = self.entries.iter().position(|p| p.id == peer.id) {
            let mut existing = self.entries.remove(pos);
            existing.last_seen = peer.last_seen;
            existing.addr = peer.addr;
            self.entries.push(existing);
            return false;
        }
        if self.entries.len() < k {
            self.entries.push(peer);
            return true;
        }
        // Bucket full: remember the candidate for later promotion.
        self.replacements.retain(|p| p.id != peer.id);
        self.replacements.push_back(peer);
        if self.replacements.len() > REPLACEMENT_CACHE_LIMIT {
            self.replacements.pop_front();
        }
        false
    }

    fn remove(&mut self, id: &NodeId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|p| p.id != *id);
        let removed = self.entries.len() < before;
        if removed {
            if let Some(promoted) = self.replacements.pop_back() {
                self.entries.push(promoted);
            }
        } else {
            self.replacements.retain(|p| p.id != *id);
        }
        removed
    }
}

/// The 256-bucket Kademlia routing table.
pub struct RoutingTable {
    local: NodeId,
    k: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create an empty table around the local id.
    pub fn new(local: NodeId) -> Self {
        Self::with_k(local, K)
    }

    /// Create a table with a non-default bucket size (tests).
    pub fn with_k(local: NodeId, k: usize) -> Self {
        Self {
            local,
            k,
            buckets: (0..ID_BITS).map(|_| Bucket::default()).collect(),
        }
    }

    /// The local node id.
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Record contact with a peer.
    ///
    /// Returns `true` if the peer newly entered a bucket (as opposed to
    /// being refreshed or parked in a replacement cache). The local id
    /// is never inserted.
    pub fn update(&mut self, id: NodeId, addr: NodeAddr, now: u64) -> bool {
        let Some(index) = self.local.bucket_index(&id) else {
            return false;
        };
        self.buckets[index].touch(
            Peer {
                id,
                addr,
                last_seen: now,
            },
            self.k,
        )
    }

    /// Drop a peer, promoting a replacement-cache candidate if one is
    /// waiting. Returns whether a live entry was removed.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        match self.local.bucket_index(id) {
            Some(index) => self.buckets[index].remove(id),
            None => false,
        }
    }

    /// Whether a peer is currently a live bucket entry.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.local
            .bucket_index(id)
            .map(|i| self.buckets[i].entries.iter().any(|p| p.id == *id))
            .unwrap_or(false)
    }

    /// The `count` live peers closest to `target` by XOR distance.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter().cloned())
            .collect();
        peers.sort_by_key(|p| p.id.distance(target));
        peers.truncate(count);
        peers
    }

    /// All live peers.
    pub fn peers(&self) -> Vec<Peer> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter().cloned())
            .collect()
    }

    /// Live peers not heard from since `cutoff` (unix seconds).
    pub fn idle_peers(&self, cutoff: u64) -> Vec<Peer> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|p| p.last_seen < cutoff)
            .cloned()
            .collect()
    }

    /// Indices of non-empty buckets not refreshed since `cutoff`.
    pub fn stale_buckets(&self, cutoff: u64) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.entries.is_empty() && b.refreshed_at < cutoff)
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark a bucket as refreshed.
    pub fn mark_refreshed(&mut self, index: usize, now: u64) {
        if let Some(bucket) = self.buckets.get_mut(index) {
            bucket.refreshed_at = now;
        }
    }

    /// A random probe id inside bucket `index`.
    pub fn random_id_in_bucket(&self, index: usize) -> NodeId {
        self.local.random_in_bucket(index)
    }

    /// Number of live entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    /// Whether the table holds no peers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("local", &self.local)
            .field("peers", &self.len())
            .finish()
    }
}
