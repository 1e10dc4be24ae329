//! HTTP route table (§6): thin `axum` handlers translating requests into
//! calls on the node's core modules.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::coordinator::{self, JoinRequest, RemoveNodeRequest, UpdateSettingsRequest};
use crate::error::AppError;
use crate::membership::{
    self, AbsorbKeysPayload, RingBroadcastPayload, TransferKeysPayload, UpdateNeighborsPayload,
};
use crate::node::NodeState;
use crate::ops::{self, DeleteRequest, InsertRequest, QueryParams};
use crate::replication::Origin;

pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        // Coordinator-only ring membership.
        .route("/join", post(join))
        .route("/remove_node", post(remove_node))
        .route("/overlay", get(overlay))
        .route("/update_settings", post(update_settings))
        // Member-side membership and handoff.
        .route("/depart", post(depart))
        .route("/update_neighbors", post(update_neighbors))
        .route("/absorb_keys", post(absorb_keys))
        .route("/transfer_keys", post(transfer_keys))
        .route("/cleanup_replicas_all", post(cleanup_replicas_all))
        .route("/repair_replicas_all", post(repair_replicas_all))
        .route("/update_config", post(update_config))
        // Client-facing data operations.
        .route("/insert", post(insert))
        .route("/query", get(query))
        .route("/delete", post(delete))
        .route("/local_query", post(local_query))
        // Replication hops.
        .route("/chain_replicate_insert", post(chain_replicate_insert))
        .route("/chain_replicate_delete", post(chain_replicate_delete))
        .route("/async_replicate_insert", post(async_replicate_insert))
        .route("/async_replicate_delete", post(async_replicate_delete))
        .route("/replicate_delete", post(replicate_delete))
        // Write-chain and read-chain callbacks.
        .route("/insert_response", post(write_callback))
        .route("/delete_response", post(write_callback))
        .route("/query_response", post(write_callback))
        // Diagnostics.
        .route("/nodeinfo", get(nodeinfo))
        .with_state(state)
}

async fn join(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<Value>, AppError> {
    let resp = coordinator::handle_join(&state, req).await?;
    Ok(Json(json!(resp)))
}

async fn remove_node(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<RemoveNodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    coordinator::handle_remove_node(&state, req).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn overlay(State(state): State<Arc<NodeState>>) -> Result<Json<Value>, AppError> {
    let ring = coordinator::handle_overlay(&state).await?;
    Ok(Json(json!({"ring": ring})))
}

async fn update_settings(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse, AppError> {
    coordinator::handle_update_settings(&state, req).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn depart(State(state): State<Arc<NodeState>>) -> impl IntoResponse {
    let spawned = state.clone();
    tokio::spawn(async move {
        membership::handle_depart(&spawned).await;
    });
    axum::http::StatusCode::ACCEPTED
}

async fn update_neighbors(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<UpdateNeighborsPayload>,
) -> impl IntoResponse {
    membership::handle_update_neighbors(&state, payload).await;
    axum::http::StatusCode::NO_CONTENT
}

async fn absorb_keys(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<AbsorbKeysPayload>,
) -> impl IntoResponse {
    membership::handle_absorb_keys(&state, payload).await;
    axum::http::StatusCode::NO_CONTENT
}

async fn transfer_keys(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<TransferKeysPayload>,
) -> impl IntoResponse {
    membership::handle_transfer_keys(&state, payload).await;
    axum::http::StatusCode::NO_CONTENT
}

async fn cleanup_replicas_all(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<RingBroadcastPayload>,
) -> impl IntoResponse {
    membership::handle_cleanup_replicas_all(&state, payload).await;
    axum::http::StatusCode::NO_CONTENT
}

async fn repair_replicas_all(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<RingBroadcastPayload>,
) -> impl IntoResponse {
    membership::handle_repair_replicas_all(&state, payload).await;
    axum::http::StatusCode::NO_CONTENT
}

#[derive(serde::Deserialize)]
struct UpdateConfigPayload {
    replication_factor: u32,
    consistency: crate::node::ConsistencyMode,
}

async fn update_config(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<UpdateConfigPayload>,
) -> impl IntoResponse {
    membership::handle_update_config(&state, payload.replication_factor, payload.consistency)
        .await;
    axum::http::StatusCode::NO_CONTENT
}

async fn insert(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<InsertRequest>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(ops::handle_insert(&state, req).await?))
}

/// `GET /query` (§6): a hop already inside a linearizable read chain
/// (`chain_count` present) is advanced in the background and acknowledged
/// immediately, mirroring `chain_replicate_insert`/`_delete` — the actual
/// answer reaches the origin later via `/query_response`. Every other call
/// (plain forwarding, or the initial query at the owner) is answered
/// synchronously by `ops::handle_query`.
async fn query(
    State(state): State<Arc<NodeState>>,
    Query(params): Query<QueryParams>,
) -> Result<axum::response::Response, AppError> {
    if let Some(chain_count) = params.chain_count {
        let origin = Origin {
            ip: params.origin_ip.clone().unwrap_or_default(),
            port: params.origin_port.unwrap_or_default(),
            request_id: params.request_id.unwrap_or_default(),
        };
        tokio::spawn(async move {
            ops::advance_read_chain(&state, params.key, chain_count, origin).await;
        });
        return Ok(axum::http::StatusCode::ACCEPTED.into_response());
    }

    Ok(Json(ops::handle_query(&state, params).await?).into_response())
}

async fn delete(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(ops::handle_delete(&state, req).await?))
}

#[derive(serde::Deserialize)]
struct LocalQueryRequest {
    key: String,
}

async fn local_query(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<LocalQueryRequest>,
) -> Json<Value> {
    Json(ops::handle_local_query(&state, &req.key).await)
}

async fn chain_replicate_insert(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<crate::replication::ChainReplicatePayload>,
) -> impl IntoResponse {
    tokio::spawn(async move {
        crate::replication::chain_replicate(&state, payload).await;
    });
    axum::http::StatusCode::ACCEPTED
}

async fn chain_replicate_delete(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<crate::replication::ChainReplicatePayload>,
) -> impl IntoResponse {
    tokio::spawn(async move {
        crate::replication::chain_replicate(&state, payload).await;
    });
    axum::http::StatusCode::ACCEPTED
}

async fn async_replicate_insert(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<crate::replication::AsyncReplicatePayload>,
) -> impl IntoResponse {
    tokio::spawn(async move {
        crate::replication::async_replicate(
            &state,
            payload.key,
            payload.value,
            payload.replication_count,
            false,
        )
        .await;
    });
    axum::http::StatusCode::ACCEPTED
}

async fn async_replicate_delete(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<crate::replication::AsyncReplicatePayload>,
) -> impl IntoResponse {
    tokio::spawn(async move {
        crate::replication::async_replicate(
            &state,
            payload.key,
            None,
            payload.replication_count,
            false,
        )
        .await;
    });
    axum::http::StatusCode::ACCEPTED
}

async fn replicate_delete(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<crate::replication::AsyncReplicatePayload>,
) -> impl IntoResponse {
    crate::replication::replicate_delete_local(&state, &payload.key).await;
    axum::http::StatusCode::NO_CONTENT
}

#[derive(serde::Deserialize)]
struct WriteCallback {
    request_id: Uuid,
    final_result: Value,
}

async fn write_callback(
    State(state): State<Arc<NodeState>>,
    Json(payload): Json<WriteCallback>,
) -> Result<impl IntoResponse, AppError> {
    ops::handle_write_callback(&state, payload.request_id, payload.final_result).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn nodeinfo(State(state): State<Arc<NodeState>>) -> Json<Value> {
    let neighbors = state.neighbors.read().await;
    let config = *state.config.read().await;
    let primary: Vec<(String, String)> = state
        .primary
        .read()
        .await
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let replica: Vec<(String, String)> = state
        .replica
        .read()
        .await
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Json(json!({
        "id": state.addr.id,
        "ip": state.addr.ip,
        "port": state.addr.port,
        "is_bootstrap": state.is_bootstrap,
        "successor": neighbors.successor,
        "predecessor": neighbors.predecessor,
        "replication_factor": config.replication_factor,
        "consistency": config.consistency,
        // Mirrors `ops::WildcardEntry`'s field names so a wildcard query can
        // deserialize this same payload while walking the ring.
        "node_ip": state.addr.ip,
        "node_port": state.addr.port,
        "primary_count": primary.len(),
        "replica_count": replica.len(),
        "primary": primary,
        "replica": replica,
    }))
}
