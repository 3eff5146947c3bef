//! Proxy-aware HTTP client for the anonymous overlay.
//!
//! Overlay destinations (`.i2p`) are routed through the overlay's HTTP
//! proxy; loopback addresses go direct. Timeouts follow the transport
//! contract: 10 s connect, 30 s read, 60 s per operation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use zerotrace_dht::rpc::{
    decode_triples, BootstrapBody, FindBody, FindValueReply, IdReply, NodesReply, OkReply,
    PingBody, StoreBody,
};
use zerotrace_dht::{DhtError, DhtTransport, FindValueResult, NodeAddr, NodeId, SelfInfo};
use zerotrace_proto::WireMessage;

use crate::dto::{MessagesReply, SendReply};
use crate::error::{NetError, Result};
use crate::overlay::{host_of, is_overlay_host};
use crate::router::WireSender;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client with per-destination proxy routing.
pub struct OverlayClient {
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
}

impl OverlayClient {
    /// Build a client; `proxy` is the overlay HTTP proxy endpoint
    /// (`host:port`), absent in developer mode.
    ///
    /// # Errors
    ///
    /// Returns an error if either underlying client fails to build.
    pub fn new(proxy: Option<&str>) -> Result<Self> {
        let direct = base_builder()
            .build()
            .map_err(|e| NetError::Unreachable(e.to_string()))?;
        let proxied = match proxy {
            Some(endpoint) => Some(
                base_builder()
                    .proxy(
                        reqwest::Proxy::http(format!("http://{endpoint}"))
                            .map_err(|e| NetError::Unreachable(e.to_string()))?,
                    )
                    .build()
                    .map_err(|e| NetError::Unreachable(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self { direct, proxied })
    }

    fn client_for(&self, addr: &str) -> &reqwest::Client {
        if is_overlay_host(host_of(addr)) {
            if let Some(proxied) = &self.proxied {
                return proxied;
            }
        }
        &self.direct
    }

    /// POST a JSON body to `http://{addr}{path}` and parse the reply.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable`/`Timeout` on transport failure and
    /// `BadReply` on a non-success status or unparsable body.
    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        addr: &str,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("http://{addr}{path}");
        let response = self.client_for(addr).post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::BadReply(format!("{url} answered {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| NetError::BadReply(e.to_string()))
    }

    /// GET `http://{addr}{path}` and parse the JSON reply.
    ///
    /// # Errors
    ///
    /// See [`OverlayClient::post_json`].
    pub async fn get_json<R: DeserializeOwned>(&self, addr: &str, path: &str) -> Result<R> {
        let url = format!("http://{addr}{path}");
        let response = self.client_for(addr).get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::BadReply(format!("{url} answered {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| NetError::BadReply(e.to_string()))
    }

    /// Deliver a wire message to a peer's `/send`.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable or did not answer OK.
    pub async fn deliver(&self, addr: &str, wire: &WireMessage) -> Result<()> {
        let reply: SendReply = self.post_json(addr, "/send", wire).await?;
        if reply.status != "OK" {
            return Err(NetError::BadReply(format!(
                "peer answered status {:?}",
                reply.status
            )));
        }
        debug!(peer = addr, "wire message delivered");
        Ok(())
    }

    /// Drain messages queued for `identifier` at a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable or the body is
    /// unparsable.
    pub async fn fetch_messages(&self, addr: &str, identifier: &str) -> Result<Vec<WireMessage>> {
        let reply: MessagesReply = self
            .post_json(addr, &format!("/get_messages/{identifier}"), &())
            .await?;
        Ok(reply.messages)
    }
}

#[async_trait]
impl WireSender for OverlayClient {
    async fn send_wire(&self, addr: &str, wire: &WireMessage) -> Result<()> {
        self.deliver(addr, wire).await
    }
}

/// [`DhtTransport`] carried over the overlay HTTP client.
pub struct HttpDhtTransport {
    client: Arc<OverlayClient>,
}

impl HttpDhtTransport {
    /// Wrap a client.
    pub fn new(client: Arc<OverlayClient>) -> Self {
        Self { client }
    }
}

fn to_dht_error(e: NetError) -> DhtError {
    match e {
        NetError::Timeout => DhtError::Timeout,
        other => DhtError::Unreachable(other.to_string()),
    }
}

fn rpc_addr(peer: &NodeAddr) -> String {
    format!("{}:{}", peer.host, peer.port)
}

#[async_trait]
impl DhtTransport for HttpDhtTransport {
    async fn ping(&self, peer: &NodeAddr, from: &SelfInfo) -> zerotrace_dht::Result<NodeId> {
        let body = PingBody {
            node_id: from.id.to_hex(),
            ip: from.addr.host.clone(),
            port: from.addr.port,
        };
        let reply: IdReply = self
            .client
            .post_json(&rpc_addr(peer), "/ping", &body)
            .await
            .map_err(to_dht_error)?;
        NodeId::from_hex(&reply.id)
    }

    async fn store(
        &self,
        peer: &NodeAddr,
        from: &SelfInfo,
        key: &NodeId,
        value: &[u8],
    ) -> zerotrace_dht::Result<bool> {
        let body = StoreBody {
            node_id: from.id.to_hex(),
            ip: from.addr.host.clone(),
            port: from.addr.port,
            key: key.to_hex(),
            value: hex::encode(value),
        };
        let reply: OkReply = self
            .client
            .post_json(&rpc_addr(peer), "/store", &body)
            .await
            .map_err(to_dht_error)?;
        Ok(reply.ok)
    }

    async fn find_node(
        &self,
        peer: &NodeAddr,
        from: &SelfInfo,
        target: &NodeId,
    ) -> zerotrace_dht::Result<Vec<(NodeId, NodeAddr)>> {
        let body = FindBody {
            node_id: from.id.to_hex(),
            ip: from.addr.host.clone(),
            port: from.addr.port,
            key: target.to_hex(),
        };
        let reply: NodesReply = self
            .client
            .post_json(&rpc_addr(peer), "/find_node", &body)
            .await
            .map_err(to_dht_error)?;
        Ok(decode_triples(&reply.nodes))
    }

    async fn find_value(
        &self,
        peer: &NodeAddr,
        from: &SelfInfo,
        key: &NodeId,
    ) -> zerotrace_dht::Result<FindValueResult> {
        let body = FindBody {
            node_id: from.id.to_hex(),
            ip: from.addr.host.clone(),
            port: from.addr.port,
            key: key.to_hex(),
        };
        let reply: FindValueReply = self
            .client
            .post_json(&rpc_addr(peer), "/find_value", &body)
            .await
            .map_err(to_dht_error)?;
        if let Some(value) = reply.value {
            let bytes = hex::decode(&value).map_err(|e| DhtError::Malformed(e.to_string()))?;
            return Ok(FindValueResult::Value(bytes));
        }
        Ok(FindValueResult::Nodes(decode_triples(
            &reply.nodes.unwrap_or_default(),
        )))
    }

    async fn fetch_id(&self, peer: &NodeAddr) -> zerotrace_dht::Result<NodeId> {
        let reply: IdReply = self
            .client
            .get_json(&rpc_addr(peer), "/id")
            .await
            .map_err(to_dht_error)?;
        NodeId::from_hex(&reply.id)
    }

    async fn announce(&self, peer: &NodeAddr, node: &SelfInfo) -> zerotrace_dht::Result<bool> {
        let body = BootstrapBody {
            node_id: node.id.to_hex(),
            ip: node.addr.host.clone(),
            port: node.addr.port,
        };
        let reply: OkReply = self
            .client
            .post_json(&rpc_addr(peer), "/bootstrap", &body)
            .await
            .map_err(to_dht_error)?;
        Ok(reply.ok)
    }
}

fn base_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .timeout(OPERATION_TIMEOUT)
}
