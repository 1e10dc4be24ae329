//! Integration tests driving the router in-process via `tower::ServiceExt::oneshot`
//! (§A.4), with no real sockets involved.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chord_node::node::{ConsistencyMode, NodeState};
use chord_node::routes::router;
use serde_json::{json, Value};
use tower::ServiceExt;

fn single_node_state() -> Arc<NodeState> {
    NodeState::new(
        "127.0.0.1".into(),
        9400,
        true,
        None,
        1,
        ConsistencyMode::Eventual,
    )
}

async fn post(
    app: &axum::Router,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get_query(app: &axum::Router, key: &str) -> (StatusCode, Value) {
    let uri = format!("/query?key={}", urlencoding_escape(key));
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn urlencoding_escape(s: &str) -> String {
    s.replace('*', "%2A")
}

#[tokio::test]
async fn insert_then_query_on_single_node_ring() {
    let app = router(single_node_state());

    let (status, body) = post(&app, "/insert", json!({"key": "song", "value": "A"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "inserted");

    let (status, body) = get_query(&app, "song").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "A");
    assert_eq!(body["source"], "primary");
    assert_eq!(body["Result from"]["port"], 9400);
}

#[tokio::test]
async fn insert_concatenates_on_repeated_key() {
    let app = router(single_node_state());

    post(&app, "/insert", json!({"key": "k", "value": "v1"})).await;
    post(&app, "/insert", json!({"key": "k", "value": "v2"})).await;

    let (_, body) = get_query(&app, "k").await;
    assert_eq!(body["result"], "v1 | v2");
}

#[tokio::test]
async fn delete_removes_key_and_query_reports_null() {
    let app = router(single_node_state());

    post(&app, "/insert", json!({"key": "song", "value": "A"})).await;
    let (status, body) = post(&app, "/delete", json!({"key": "song"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["existed"], true);

    let (_, body) = get_query(&app, "song").await;
    assert_eq!(body["result"], Value::Null);
}

#[tokio::test]
async fn wildcard_query_returns_single_node_contents() {
    let app = router(single_node_state());

    post(&app, "/insert", json!({"key": "a", "value": "1"})).await;
    post(&app, "/insert", json!({"key": "b", "value": "2"})).await;

    let (status, body) = get_query(&app, "*").await;
    assert_eq!(status, StatusCode::OK);
    let nodes = body["all_songs"].as_array().unwrap();
    assert_eq!(body["nodes_count"], 1);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["primary_count"], 2);
}

#[tokio::test]
async fn nodeinfo_reports_bootstrap_identity() {
    let app = router(single_node_state());

    let request = Request::builder()
        .method("GET")
        .uri("/nodeinfo")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["is_bootstrap"], true);
    assert_eq!(body["port"], 9400);
}

#[tokio::test]
async fn join_is_rejected_on_a_non_bootstrap_node() {
    let state = NodeState::new(
        "127.0.0.1".into(),
        9401,
        false,
        Some(("127.0.0.1".into(), 9400)),
        1,
        ConsistencyMode::Eventual,
    );
    let app = router(state);

    let (status, _) = post(
        &app,
        "/join",
        json!({"ip": "127.0.0.1", "port": 9402}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
