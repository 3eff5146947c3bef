//! # zerotrace-dht
//!
//! The ZeroTrace user directory: a Kademlia DHT carried over the same
//! anonymous HTTP transport as the messaging plane.
//!
//! This crate provides:
//! - **NodeId / RoutingTable**: 256-bit XOR metric, 256 k-buckets with
//!   replacement caches
//! - **DirectoryRecord**: the signed identifier -> (keys, address)
//!   mapping users publish and discover
//! - **Dht**: iterative lookup, randomized-replica publish, validated
//!   ingest, and the four background maintenance loops
//! - **DhtTransport**: the RPC seam (`ping`, `store`, `find_node`,
//!   `find_value`) implemented over HTTP by the networking crate
//!
//! The DHT does not resist a determined Sybil adversary; its defenses
//! are k-redundancy, parallel queries, mandatory record validation, and
//! randomized replica placement.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod b64;
pub mod dht;
pub mod error;
pub mod id;
pub mod lookup;
pub mod record;
pub mod routing;
pub mod rpc;
pub mod store;

pub use dht::{Dht, DhtConfig, DhtStats, DhtStatsSnapshot};
pub use error::{DhtError, Result};
pub use id::{Distance, NodeId};
pub use record::DirectoryRecord;
pub use routing::{NodeAddr, Peer, RoutingTable, ALPHA, K};
pub use rpc::{DhtTransport, FindValueResult, SelfInfo};
pub use store::DhtDatabase;
