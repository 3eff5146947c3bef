//! The DHT RPC surface: request/response bodies and the transport seam.
//!
//! Ids and keys travel as lowercase hex; node lists are `[id, host,
//! port]` triples. The HTTP implementation lives in the networking
//! crate; tests plug in an in-memory transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::routing::NodeAddr;
use crate::Result;

/// This node's identity on the DHT plane.
#[derive(Clone, Debug)]
pub struct SelfInfo {
    /// The local node id.
    pub id: NodeId,
    /// The address peers can reach this node at.
    pub addr: NodeAddr,
}

/// Body of `/ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingBody {
    /// Caller's node id, hex.
    pub node_id: String,
    /// Caller's reachable host.
    #[serde(default)]
    pub ip: String,
    /// Caller's reachable port.
    #[serde(default)]
    pub port: u16,
}

/// Body of `/store` and `/set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreBody {
    /// Caller's node id, hex.
    pub node_id: String,
    /// Caller's reachable host.
    #[serde(default)]
    pub ip: String,
    /// Caller's reachable port.
    #[serde(default)]
    pub port: u16,
    /// Value key, hex.
    pub key: String,
    /// Serialized value, hex.
    pub value: String,
}

/// Body of `/find_node` and `/find_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindBody {
    /// Caller's node id, hex.
    pub node_id: String,
    /// Caller's reachable host.
    #[serde(default)]
    pub ip: String,
    /// Caller's reachable port.
    #[serde(default)]
    pub port: u16,
    /// Target id or value key, hex.
    pub key: String,
}

/// Body of `/bootstrap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapBody {
    /// The node to add, hex id.
    pub node_id: String,
    /// Its reachable host.
    pub ip: String,
    /// Its reachable port.
    pub port: u16,
}

/// A `[id_hex, host, port]` triple in node lists.
pub type NodeTriple = (String, String, u16);

/// Reply carrying this node's id (`/id`, `/ping`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdReply {
    /// Node id, hex.
    pub id: String,
}

/// Success/failure reply (`/store`, `/set`, `/bootstrap`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkReply {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Failure detail, when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to `/find_node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesReply {
    /// The k closest known nodes to the target.
    pub nodes: Vec<NodeTriple>,
}

/// Reply to `/find_value`: either the value or the closest nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueReply {
    /// The value, hex, when held locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Otherwise the closest known nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeTriple>>,
}

/// Outcome of a `find_value` RPC.
#[derive(Debug, Clone)]
pub enum FindValueResult {
    /// The peer held the value.
    Value(Vec<u8>),
    /// The peer returned its closest nodes instead.
    Nodes(Vec<(NodeId, NodeAddr)>),
}

/// The RPC transport the DHT runs over.
///
/// Implementations carry requests over the anonymous overlay; tests use
/// an in-memory network. Every call has request-scoped deadlines; a
/// timed-out call simply returns an error and the caller moves on to
/// other candidates.
#[async_trait]
pub trait DhtTransport: Send + Sync {
    /// Liveness probe; returns the peer's id.
    async fn ping(&self, peer: &NodeAddr, from: &SelfInfo) -> Result<NodeId>;

    /// Ask `peer` to store `value` under `key`.
    async fn store(&self, peer: &NodeAddr, from: &SelfInfo, key: &NodeId, value: &[u8])
        -> Result<bool>;

    /// Ask `peer` for its k closest nodes to `target`.
    async fn find_node(
        &self,
        peer: &NodeAddr,
        from: &SelfInfo,
        target: &NodeId,
    ) -> Result<Vec<(NodeId, NodeAddr)>>;

    /// Ask `peer` for the value under `key`, or its closest nodes.
    async fn find_value(
        &self,
        peer: &NodeAddr,
        from: &SelfInfo,
        key: &NodeId,
    ) -> Result<FindValueResult>;

    /// Fetch a peer's node id (`GET /id`).
    async fn fetch_id(&self, peer: &NodeAddr) -> Result<NodeId>;

    /// Ask `peer` to add `node` to its routing table (`POST /bootstrap`).
    async fn announce(&self, peer: &NodeAddr, node: &SelfInfo) -> Result<bool>;
}

/// Decode a `[id, host, port]` triple list, skipping malformed entries.
pub fn decode_triples(triples: &[NodeTriple]) -> Vec<(NodeId, NodeAddr)> {
    triples
        .iter()
        .filter_map(|(id, host, port)| {
            NodeId::from_hex(id)
                .ok()
                .map(|id| (id, NodeAddr::new(host.clone(), *port)))
        })
        .collect()
}

/// Encode peers as wire triples.
pub fn encode_triples(peers: &[(NodeId, NodeAddr)]) -> Vec<NodeTriple> {
    peers
        .iter()
        .map(|(id, addr)| (id.to_hex(), addr.host.clone(), addr.port))
        .collect()
}
