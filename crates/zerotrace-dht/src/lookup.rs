//! Iterative Kademlia lookups.
//!
//! A lookup keeps a shortlist of the k closest known candidates to the
//! target, repeatedly queries the alpha closest not-yet-queried ones in
//! parallel, and merges every response back in. It stops when the k
//! closest candidates have all been queried (no closer node surfaced in
//! the final round). Value lookups short-circuit on the first response
//! whose payload passes the caller's validation.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::id::NodeId;
use crate::routing::NodeAddr;
use crate::rpc::{DhtTransport, FindValueResult, SelfInfo};

/// Hard cap on query rounds; a stable network converges in O(log n).
const MAX_ROUNDS: usize = 32;

/// Result of an iterative lookup.
#[derive(Debug)]
pub enum LookupOutcome {
    /// The k closest nodes found (or the validated value was absent).
    Nodes(Vec<(NodeId, NodeAddr)>),
    /// A value that passed validation.
    Value(Vec<u8>),
}

struct Candidate {
    id: NodeId,
    addr: NodeAddr,
    queried: bool,
}

/// The sorted shortlist of lookup candidates.
struct Shortlist {
    target: NodeId,
    entries: Vec<Candidate>,
    known: HashSet<NodeId>,
}

impl Shortlist {
    fn new(target: NodeId) -> Self {
        Self {
            target,
            entries: Vec::new(),
            known: HashSet::new(),
        }
    }

    fn insert(&mut self, id: NodeId, addr: NodeAddr) -> bool {
        if !self.known.insert(id) {
            return false;
        }
        self.entries.push(Candidate {
            id,
            addr,
            queried: false,
        });
        let target = self.target;
        self.entries.sort_by_key(|c| c.id.distance(&target));
        true
    }

    /// Up to `alpha` unqueried candidates among the `k` closest.
    fn next_batch(&mut self, alpha: usize, k: usize) -> Vec<(NodeId, NodeAddr)> {
        let mut batch = Vec::new();
        for candidate in self.entries.iter_mut().take(k) {
            if batch.len() == alpha {
                break;
            }
            if !candidate.queried {
                candidate.queried = true;
                batch.push((candidate.id, candidate.addr.clone()));
            }
        }
        batch
    }

    fn closest(&self, k: usize) -> Vec<(NodeId, NodeAddr)> {
        self.entries
            .iter()
            .take(k)
            .map(|c| (c.id, c.addr.clone()))
            .collect()
    }
}

/// Run an iterative lookup.
///
/// When `find_value` is set, peers are queried with `find_value` RPCs
/// and the first payload for which `accept_value` returns `true` ends
/// the lookup; rejected payloads are skipped and the lookup continues
/// through the remaining candidates.
///
/// Returns the outcome plus every peer that answered, so the caller can
/// fold responders into its routing table.
pub async fn lookup(
    transport: Arc<dyn DhtTransport>,
    info: &SelfInfo,
    target: &NodeId,
    seeds: Vec<(NodeId, NodeAddr)>,
    k: usize,
    alpha: usize,
    find_value: bool,
    mut accept_value: impl FnMut(&[u8]) -> bool,
) -> (LookupOutcome, Vec<(NodeId, NodeAddr)>) {
    let mut shortlist = Shortlist::new(*target);
    for (id, addr) in seeds {
        if id != info.id {
            shortlist.insert(id, addr);
        }
    }

    let mut responders: Vec<(NodeId, NodeAddr)> = Vec::new();

    for round in 0..MAX_ROUNDS {
        let batch = shortlist.next_batch(alpha, k);
        if batch.is_empty() {
            break;
        }
        trace!(round, batch = batch.len(), "lookup round");

        let mut queries: JoinSet<(NodeId, NodeAddr, Option<FindValueResult>)> = JoinSet::new();
        for (peer_id, peer_addr) in batch {
            let transport = Arc::clone(&transport);
            let info = info.clone();
            let target = *target;
            queries.spawn(async move {
                let reply = if find_value {
                    transport.find_value(&peer_addr, &info, &target).await.ok()
                } else {
                    transport
                        .find_node(&peer_addr, &info, &target)
                        .await
                        .ok()
                        .map(FindValueResult::Nodes)
                };
                (peer_id, peer_addr, reply)
            });
        }

        while let Some(joined) = queries.join_next().await {
            let Ok((peer_id, peer_addr, reply)) = joined else {
                continue;
            };
            match reply {
                Some(FindValueResult::Value(value)) => {
                    responders.push((peer_id, peer_addr));
                    if accept_value(&value) {
                        queries.abort_all();
                        return (LookupOutcome::Value(value), responders);
                    }
                    debug!(peer = %peer_id, "discarding invalid value from lookup");
                }
                Some(FindValueResult::Nodes(nodes)) => {
                    responders.push((peer_id, peer_addr));
                    for (id, addr) in nodes {
                        if id != info.id {
                            shortlist.insert(id, addr);
                        }
                    }
                }
                None => {}
            }
        }
    }

    (LookupOutcome::Nodes(shortlist.closest(k)), responders)
}
