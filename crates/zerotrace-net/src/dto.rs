//! Shared request/response bodies for the messaging endpoints.
//!
//! The DHT RPC bodies live in `zerotrace_dht::rpc`; these are the
//! message-plane shapes.

use serde::{Deserialize, Serialize};

use zerotrace_proto::WireMessage;

/// Reply to `POST /send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReply {
    /// `"OK"` whenever the request parsed; crypto failures are
    /// deliberately indistinguishable from successes.
    pub status: String,
}

impl SendReply {
    /// The canonical success reply.
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}

/// Reply to `POST /get_messages/{identifier}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesReply {
    /// The drained wire messages, oldest first.
    pub messages: Vec<WireMessage>,
}
