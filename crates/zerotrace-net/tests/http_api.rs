//! HTTP surface tests driven through the router in-process.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use zerotrace_identity::Identity;
use zerotrace_net::{create_router, Node, NodeConfig, OverlayInfo};
use zerotrace_proto::envelope;
use zerotrace_store::Contact;

async fn test_node() -> (Arc<Node>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig::new(dir.path())
        .with_overlay(OverlayInfo::direct("127.0.0.1:18625"));
    let node = Node::new(config, Identity::generate().unwrap())
        .await
        .unwrap();
    (node, dir)
}

fn json_request(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_id_endpoint() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["id"], node.dht().local_id().to_hex());
}

#[tokio::test]
async fn test_send_rejects_malformed_json() {
    let (node, _dir) = test_node().await;
    let app = create_router(node);

    let response = app
        .oneshot(json_request("/send", "{\"not\": \"a wire message\"".into()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_rejects_wrong_field_shapes() {
    let (node, _dir) = test_node().await;
    let app = create_router(node);

    let body = serde_json::json!({
        "current_node_identifier": "n",
        "recipient_identifier": "r",
        "shared_secret_ciphertext": "AAAA",
        "message_ciphertext": "AAAA",
        "nonce": "AAAA",
        "signature": "AAAA",
        "ttl": 9,
        "max_recursive_contact": 4
    });
    let response = app
        .oneshot(json_request("/send", body.to_string()))
        .await
        .unwrap();
    // Parses as JSON but fails structural validation.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_is_idempotent() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    let alice = Identity::generate().unwrap();
    let wire = envelope::seal(
        &alice,
        "alice.b32.i2p",
        node.identifier(),
        &node.identity().kem_public().to_bytes(),
        b"hello",
    )
    .unwrap();
    let body = serde_json::to_string(&wire).unwrap();

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(json_request("/send", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "OK");
    }

    // Three submissions, exactly one inbox row.
    assert_eq!(node.inbox().count().await.unwrap(), 1);
    assert_eq!(node.router().stats().duplicates, 2);
}

#[tokio::test]
async fn test_send_hides_crypto_failures_behind_200() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    // Structurally valid, cryptographically garbage, addressed to us.
    let wire = zerotrace_proto::WireMessage {
        current_node_identifier: "hop".into(),
        recipient_identifier: node.identifier().as_str().to_string(),
        shared_secret_ciphertext: vec![1u8; zerotrace_crypto::mlkem::CIPHERTEXT_SIZE],
        message_ciphertext: vec![2u8; 64],
        nonce: vec![3u8; zerotrace_crypto::symmetric::NONCE_SIZE],
        signature: vec![4u8; zerotrace_crypto::mldsa::SIGNATURE_SIZE],
        ttl: 10,
        max_recursive_contact: 5,
    };
    let response = app
        .oneshot(json_request("/send", serde_json::to_string(&wire).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(node.inbox().count().await.unwrap(), 0);
    assert_eq!(node.router().stats().dropped_crypto, 1);
}

#[tokio::test]
async fn test_get_messages_drains_atomically() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    // A contact with a queued message.
    let carol = Identity::generate().unwrap();
    let contact = Contact {
        identifier: carol.identifier().clone(),
        name: None,
        addr: "carol.b32.i2p".into(),
        kem_public_key: carol.kem_public().to_bytes(),
        sig_public_key: carol.sig_public().to_bytes(),
    };
    node.contacts().add(&contact).await.unwrap();

    let alice = Identity::generate().unwrap();
    let wire = envelope::seal(
        &alice,
        "alice.b32.i2p",
        carol.identifier(),
        &carol.kem_public().to_bytes(),
        b"for carol",
    )
    .unwrap();
    node.forward_queue().push(&wire).await.unwrap();

    let uri = format!("/get_messages/{}", carol.identifier());
    let response = app
        .clone()
        .oneshot(json_request(&uri, "{}".into()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["messages"].as_array().unwrap().len(), 1);

    // Drained: a second pull returns nothing.
    let response = app.oneshot(json_request(&uri, "{}".into())).await.unwrap();
    let json = body_json(response).await;
    assert!(json["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_bootstrap_adds_peer() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    let body = serde_json::json!({
        "node_id": zerotrace_dht::NodeId::random().to_hex(),
        "ip": "127.0.0.1",
        "port": 19000
    });
    let response = app
        .oneshot(json_request("/bootstrap", body.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(node.dht().peer_count(), 1);
}

#[tokio::test]
async fn test_store_rejects_invalid_record() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    let key = zerotrace_dht::NodeId::random();
    let body = serde_json::json!({
        "node_id": zerotrace_dht::NodeId::random().to_hex(),
        "ip": "",
        "port": 0,
        "key": key.to_hex(),
        "value": hex::encode(b"not a record"),
    });
    let response = app
        .oneshot(json_request("/store", body.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
    assert!(json["error"].as_str().is_some());
    assert_eq!(node.dht().stats().records_rejected, 1);
}

#[tokio::test]
async fn test_store_accepts_valid_record() {
    let (node, _dir) = test_node().await;
    let app = create_router(node.clone());

    let owner = Identity::generate().unwrap();
    let record = zerotrace_dht::DirectoryRecord::create(&owner, "owner.b32.i2p").unwrap();
    let body = serde_json::json!({
        "node_id": zerotrace_dht::NodeId::random().to_hex(),
        "ip": "",
        "port": 0,
        "key": record.key().to_hex(),
        "value": hex::encode(record.to_bytes().unwrap()),
    });
    let response = app
        .clone()
        .oneshot(json_request("/store", body.to_string()))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);

    // The record is now served back by find_value.
    let body = serde_json::json!({
        "node_id": zerotrace_dht::NodeId::random().to_hex(),
        "ip": "",
        "port": 0,
        "key": record.key().to_hex(),
    });
    let response = app
        .oneshot(json_request("/find_value", body.to_string()))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert!(json["value"].as_str().is_some());
}

#[tokio::test]
async fn test_find_value_returns_nodes_when_absent() {
    let (node, _dir) = test_node().await;
    let app = create_router(node);

    let body = serde_json::json!({
        "node_id": zerotrace_dht::NodeId::random().to_hex(),
        "ip": "",
        "port": 0,
        "key": zerotrace_dht::NodeId::random().to_hex(),
    });
    let response = app
        .oneshot(json_request("/find_value", body.to_string()))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert!(json["value"].is_null() || json.get("value").is_none());
    assert!(json["nodes"].is_array());
}
