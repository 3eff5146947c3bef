//! # zerotrace-net
//!
//! Transport and runtime for a ZeroTrace node.
//!
//! This crate provides:
//! - **OverlayClient**: a proxy-aware HTTP client (`.i2p` hosts through
//!   the overlay's HTTP proxy, loopback direct)
//! - **Router**: the store-and-forward routing engine with duplicate
//!   suppression and randomized fanout
//! - **create_router / handlers**: the HTTP surface (`/send`,
//!   `/get_messages`, and the DHT RPCs)
//! - **Node**: the value tying identity, stores, DHT, and background
//!   tasks together, with graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod dto;
pub mod error;
pub mod node;
pub mod overlay;
pub mod router;
pub mod server;

pub use client::{HttpDhtTransport, OverlayClient};
pub use error::{NetError, Result};
pub use node::{Node, NodeConfig, SendOutcome};
pub use overlay::OverlayInfo;
pub use router::{Router, RouterStatsSnapshot, WireSender};
pub use server::create_router;
