//! The HTTP surface of a node.
//!
//! One axum router serves both planes: the messaging endpoints
//! (`/send`, `/get_messages/{id}`) and the DHT RPCs (`/id`, `/ping`,
//! `/store`, `/set`, `/bootstrap`, `/find_node`, `/find_value`). The
//! server binds a loopback port and is reachable from outside only
//! through the overlay tunnel, so handlers never see a caller address
//! worth logging.
//!
//! Malformed JSON answers 400. Cryptographic rejections inside `/send`
//! still answer 200, keeping failure invisible to probing senders.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use zerotrace_dht::rpc::{
    encode_triples, BootstrapBody, FindBody, FindValueReply, IdReply, NodesReply, OkReply,
    PingBody, StoreBody,
};
use zerotrace_dht::{FindValueResult, NodeAddr, NodeId};
use zerotrace_proto::WireMessage;

use crate::dto::{MessagesReply, SendReply};
use crate::error::NetError;
use crate::node::Node;

/// Build the router over a node.
pub fn create_router(node: Arc<Node>) -> axum::Router {
    axum::Router::new()
        // Messaging plane
        .route("/send", post(send))
        .route("/get_messages/:identifier", post(get_messages))
        // Directory plane
        .route("/id", get(node_id))
        .route("/ping", post(ping))
        .route("/store", post(store_value))
        .route("/set", post(set_value))
        .route("/bootstrap", post(bootstrap))
        .route("/find_node", post(find_node))
        .route("/find_value", post(find_value))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Error shape for the HTTP layer.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<NetError> for ApiError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Malformed(m) => ApiError::bad_request(m),
            NetError::Proto(p) => ApiError::bad_request(p.to_string()),
            other => {
                tracing::error!(error = %other, "handler failure");
                ApiError::internal("internal error")
            }
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Every body extractor funnels through this so malformed JSON is a
/// uniform 400.
fn required_json<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(inner)| inner)
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

async fn send(
    State(node): State<Arc<Node>>,
    body: Result<Json<WireMessage>, JsonRejection>,
) -> ApiResult<Json<SendReply>> {
    let wire = required_json(body)?;
    node.router().handle_inbound(wire).await?;
    Ok(Json(SendReply::ok()))
}

async fn get_messages(
    State(node): State<Arc<Node>>,
    Path(identifier): Path<String>,
) -> ApiResult<Json<MessagesReply>> {
    let messages = node
        .forward_queue()
        .drain_for(&identifier, node.config().drain_batch)
        .await
        .map_err(NetError::from)?;
    debug!(identifier, count = messages.len(), "drained for pull");
    Ok(Json(MessagesReply { messages }))
}

async fn node_id(State(node): State<Arc<Node>>) -> Json<IdReply> {
    Json(IdReply {
        id: node.dht().local_id().to_hex(),
    })
}

/// Fold the calling node into the routing table when it sent a usable
/// return address.
async fn welcome_caller(node: &Node, node_id: &str, ip: &str, port: u16) {
    if ip.is_empty() || port == 0 {
        return;
    }
    if let Ok(id) = NodeId::from_hex(node_id) {
        node.dht().observe(id, NodeAddr::new(ip, port)).await;
    }
}

async fn ping(
    State(node): State<Arc<Node>>,
    body: Result<Json<PingBody>, JsonRejection>,
) -> ApiResult<Json<IdReply>> {
    let req = required_json(body)?;
    welcome_caller(&node, &req.node_id, &req.ip, req.port).await;
    Ok(Json(IdReply {
        id: node.dht().local_id().to_hex(),
    }))
}

async fn store_value(
    State(node): State<Arc<Node>>,
    body: Result<Json<StoreBody>, JsonRejection>,
) -> ApiResult<Json<OkReply>> {
    let req = required_json(body)?;
    welcome_caller(&node, &req.node_id, &req.ip, req.port).await;

    let key = NodeId::from_hex(&req.key).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let value = hex::decode(&req.value).map_err(|e| ApiError::bad_request(e.to_string()))?;

    match node.dht().ingest_value(&key, &value).await {
        Ok(()) => Ok(Json(OkReply {
            ok: true,
            error: None,
        })),
        Err(e) => Ok(Json(OkReply {
            ok: false,
            error: Some(e.to_string()),
        })),
    }
}

async fn set_value(
    State(node): State<Arc<Node>>,
    body: Result<Json<StoreBody>, JsonRejection>,
) -> ApiResult<Json<OkReply>> {
    let req = required_json(body)?;
    welcome_caller(&node, &req.node_id, &req.ip, req.port).await;

    let key = NodeId::from_hex(&req.key).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let value = hex::decode(&req.value).map_err(|e| ApiError::bad_request(e.to_string()))?;

    match node.dht().publish_value(&key, &value).await {
        Ok(_) => Ok(Json(OkReply {
            ok: true,
            error: None,
        })),
        Err(e) => Ok(Json(OkReply {
            ok: false,
            error: Some(e.to_string()),
        })),
    }
}

async fn bootstrap(
    State(node): State<Arc<Node>>,
    body: Result<Json<BootstrapBody>, JsonRejection>,
) -> ApiResult<Json<OkReply>> {
    let req = required_json(body)?;
    let id = NodeId::from_hex(&req.node_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    node.dht().observe(id, NodeAddr::new(req.ip, req.port)).await;
    Ok(Json(OkReply {
        ok: true,
        error: None,
    }))
}

async fn find_node(
    State(node): State<Arc<Node>>,
    body: Result<Json<FindBody>, JsonRejection>,
) -> ApiResult<Json<NodesReply>> {
    let req = required_json(body)?;
    welcome_caller(&node, &req.node_id, &req.ip, req.port).await;

    let target = NodeId::from_hex(&req.key).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let peers: Vec<_> = node
        .dht()
        .handle_find_node(&target)
        .into_iter()
        .map(|p| (p.id, p.addr))
        .collect();
    Ok(Json(NodesReply {
        nodes: encode_triples(&peers),
    }))
}

async fn find_value(
    State(node): State<Arc<Node>>,
    body: Result<Json<FindBody>, JsonRejection>,
) -> ApiResult<Json<FindValueReply>> {
    let req = required_json(body)?;
    welcome_caller(&node, &req.node_id, &req.ip, req.port).await;

    let key = NodeId::from_hex(&req.key).map_err(|e| ApiError::bad_request(e.to_string()))?;
    match node
        .dht()
        .handle_find_value(&key)
        .await
        .map_err(NetError::from)?
    {
        FindValueResult::Value(value) => Ok(Json(FindValueReply {
            value: Some(hex::encode(value)),
            nodes: None,
        })),
        FindValueResult::Nodes(peers) => Ok(Json(FindValueReply {
            value: None,
            nodes: Some(encode_triples(&peers)),
        })),
    }
}
