//! Client-facing data operations (§4): a node either serves an operation
//! locally, when it owns the key, or relays it unchanged to its successor
//! (§4.3). The owning node additionally drives replication (§4.5) and, for
//! inserts and deletes under linearizability, blocks on its own pending-
//! request table until the chain tail calls back.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::hash::NodeId;
use crate::node::{ConsistencyMode, NodeState, HOP_TIMEOUT};
use crate::pending::{INSERT_TIMEOUT, READ_TIMEOUT};
use crate::replication::{self, ChainReplicatePayload, Origin};
use crate::routing::post_json;

#[derive(Debug, Clone, Deserialize)]
pub struct InsertRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

/// `GET /query` parameters (§6): a plain key lookup carries only `key`; a
/// hop already inside a linearizable read chain (§4.5.3) additionally
/// carries the origin to call back and the remaining chain length. The same
/// struct serializes the outbound query string for every hop, so there is
/// one definition of this wire shape for both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParams {
    pub key: String,
    pub origin_ip: Option<String>,
    pub origin_port: Option<u16>,
    pub request_id: Option<Uuid>,
    pub chain_count: Option<u32>,
}

impl QueryParams {
    fn plain(key: String) -> Self {
        QueryParams {
            key,
            origin_ip: None,
            origin_port: None,
            request_id: None,
            chain_count: None,
        }
    }
}

/// `POST /insert`: relay to the owner, who writes the primary copy and
/// drives replication per the node's configured consistency mode (§4.5.1,
/// §4.5.2).
pub async fn handle_insert(state: &Arc<NodeState>, req: InsertRequest) -> Result<Value, AppError> {
    let hash = NodeId::of(&req.key);
    if !state.is_responsible(hash).await {
        let successor = state.successor().await.ok_or(AppError::Rejected(
            "no successor known; ring is not yet formed",
        ))?;
        let response = post_json(&state.http, &successor, "/insert", &req, HOP_TIMEOUT).await?;
        return response.json::<Value>().await.map_err(AppError::from);
    }

    state
        .primary
        .write()
        .await
        .insert(req.key.clone(), req.value.clone());

    let config = *state.config.read().await;
    let final_result = json!({"key": req.key, "value": req.value, "status": "inserted"});

    if config.replication_factor <= 1 {
        return Ok(final_result);
    }

    match config.consistency {
        ConsistencyMode::Linearizability => {
            drive_chain(
                state,
                req.key,
                Some(req.value),
                config.replication_factor - 1,
                final_result,
            )
            .await
        }
        ConsistencyMode::Eventual => {
            let state = state.clone();
            let key = req.key.clone();
            let value = req.value.clone();
            let count = config.replication_factor - 1;
            tokio::spawn(async move {
                replication::async_replicate(&state, key, Some(value), count, false).await;
            });
            Ok(final_result)
        }
    }
}

/// `POST /delete`: symmetric to insert (§4.5.4).
pub async fn handle_delete(state: &Arc<NodeState>, req: DeleteRequest) -> Result<Value, AppError> {
    let hash = NodeId::of(&req.key);
    if !state.is_responsible(hash).await {
        let successor = state.successor().await.ok_or(AppError::Rejected(
            "no successor known; ring is not yet formed",
        ))?;
        let response = post_json(&state.http, &successor, "/delete", &req, HOP_TIMEOUT).await?;
        return response.json::<Value>().await.map_err(AppError::from);
    }

    let existed = state.primary.write().await.remove(&req.key).is_some();
    let config = *state.config.read().await;
    let final_result = json!({"key": req.key, "existed": existed, "status": "deleted"});

    if config.replication_factor <= 1 {
        return Ok(final_result);
    }

    match config.consistency {
        ConsistencyMode::Linearizability => {
            drive_chain(
                state,
                req.key,
                None,
                config.replication_factor - 1,
                final_result,
            )
            .await
        }
        ConsistencyMode::Eventual => {
            let state = state.clone();
            let key = req.key.clone();
            let count = config.replication_factor - 1;
            tokio::spawn(async move {
                replication::async_replicate(&state, key, None, count, false).await;
            });
            Ok(final_result)
        }
    }
}

/// Registers a pending slot addressed at this node, kicks off chain
/// replication, and blocks for the tail's callback (§4.4, §4.5.1).
async fn drive_chain(
    state: &Arc<NodeState>,
    key: String,
    value: Option<String>,
    replication_count: u32,
    final_result: Value,
) -> Result<Value, AppError> {
    let request_id = state.pending.register().await;
    let origin = Origin {
        ip: state.addr.ip.clone(),
        port: state.addr.port,
        request_id,
    };

    let Some(successor) = state.successor().await else {
        return Ok(final_result);
    };
    let payload = ChainReplicatePayload {
        key,
        value: value.clone(),
        replication_count: replication_count - 1,
        origin,
        final_result: final_result.clone(),
    };
    let path = if value.is_some() {
        "/chain_replicate_insert"
    } else {
        "/chain_replicate_delete"
    };
    post_json(&state.http, &successor, path, &payload, HOP_TIMEOUT).await?;

    state.pending.wait(request_id, INSERT_TIMEOUT).await
}

/// `POST /insert_response` / `/delete_response`: the chain tail's callback,
/// waking this node's own pending wait (§4.5.1 step 4).
pub async fn handle_write_callback(
    state: &NodeState,
    request_id: uuid::Uuid,
    final_result: Value,
) -> Result<(), AppError> {
    if state.pending.complete(request_id, final_result).await {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

/// `GET /query` (§4.5.3, §6): serves a point read, or the wildcard dump
/// when `key == "*"`. Under linearizability, the owner starts a read chain
/// down its replica set (chain-count = k−1) so a query observes every write
/// that has fully propagated; under eventual consistency any node already
/// holding a copy answers directly (§4.5.2 "read from any replica"), and
/// otherwise routing keeps forwarding unchanged until the owner is found
/// (§4.3).
pub async fn handle_query(state: &Arc<NodeState>, params: QueryParams) -> Result<Value, AppError> {
    if params.key == "*" {
        let entries = handle_query_wildcard(state).await?;
        return Ok(json!({"all_songs": entries, "nodes_count": entries.len()}));
    }

    let hash = NodeId::of(&params.key);
    if !state.is_responsible(hash).await {
        let config = *state.config.read().await;
        if matches!(config.consistency, ConsistencyMode::Eventual) {
            let local = local_point_result(state, &params.key).await;
            if local["result"] != Value::Null {
                return Ok(local);
            }
        }

        let successor = state.successor().await.ok_or(AppError::Rejected(
            "no successor known; ring is not yet formed",
        ))?;
        let response = state
            .http
            .get(format!("{}/query", successor.base_url()))
            .query(&QueryParams::plain(params.key.clone()))
            .timeout(HOP_TIMEOUT)
            .send()
            .await
            .map_err(AppError::from)?;
        return response.json::<Value>().await.map_err(AppError::from);
    }

    let config = *state.config.read().await;
    if matches!(config.consistency, ConsistencyMode::Linearizability) && config.replication_factor > 1
    {
        return drive_read_chain(state, params.key, config.replication_factor - 1).await;
    }
    Ok(local_point_result(state, &params.key).await)
}

/// The owner's side of a linearizable read (§4.5.3): register a pending
/// slot addressed at this node, kick off the read chain, and block for the
/// tail's `/query_response` callback — the read-side counterpart of
/// `drive_chain`.
async fn drive_read_chain(
    state: &Arc<NodeState>,
    key: String,
    chain_count: u32,
) -> Result<Value, AppError> {
    let Some(successor) = state.successor().await else {
        return Ok(local_point_result(state, &key).await);
    };

    let request_id = state.pending.register().await;
    let outbound = QueryParams {
        key: key.clone(),
        origin_ip: Some(state.addr.ip.clone()),
        origin_port: Some(state.addr.port),
        request_id: Some(request_id),
        chain_count: Some(chain_count),
    };
    state
        .http
        .get(format!("{}/query", successor.base_url()))
        .query(&outbound)
        .timeout(HOP_TIMEOUT)
        .send()
        .await
        .map_err(AppError::from)?;

    state.pending.wait(request_id, READ_TIMEOUT).await
}

/// Advances a hop already inside a linearizable read chain (§4.5.3): either
/// decrements and forwards, or, as the tail, reads its own copy and posts
/// the result to the origin's `/query_response`.
pub async fn advance_read_chain(
    state: &Arc<NodeState>,
    key: String,
    chain_count: u32,
    origin: Origin,
) {
    if chain_count > 0 {
        let Some(successor) = state.successor().await else {
            warn!("read chain has no successor to forward to");
            return;
        };
        let outbound = QueryParams {
            key,
            origin_ip: Some(origin.ip.clone()),
            origin_port: Some(origin.port),
            request_id: Some(origin.request_id),
            chain_count: Some(chain_count - 1),
        };
        if let Err(err) = state
            .http
            .get(format!("{}/query", successor.base_url()))
            .query(&outbound)
            .timeout(HOP_TIMEOUT)
            .send()
            .await
        {
            warn!(?err, "read-chain forward failed");
        }
        return;
    }

    let final_result = local_point_result(state, &key).await;
    let body = json!({"request_id": origin.request_id, "final_result": final_result});
    if let Err(err) = post_json(
        &state.http,
        &origin.addr(),
        "/query_response",
        &body,
        HOP_TIMEOUT,
    )
    .await
    {
        warn!(?err, "read-chain tail callback failed");
    }
}

/// Answers from this node's own stores, including the responding node's
/// identifier for test observability (§4.6, §8 scenario 1 "responder =
/// owner").
async fn local_point_result(state: &NodeState, key: &str) -> Value {
    let responder = json!({"ip": state.addr.ip, "port": state.addr.port, "id": state.addr.id});
    if let Some(value) = state.primary.read().await.get(key) {
        return json!({"Result from": responder, "key": key, "result": value, "source": "primary"});
    }
    if let Some(value) = state.replica.read().await.get(key) {
        return json!({"Result from": responder, "key": key, "result": value, "source": "replica"});
    }
    json!({"Result from": responder, "key": key, "result": Value::Null, "source": "none"})
}

/// `POST /local_query`: answers strictly from this node's own stores,
/// never forwarding (supplemental diagnostic endpoint carried over from
/// the original implementation).
pub async fn handle_local_query(state: &NodeState, key: &str) -> Value {
    local_point_result(state, key).await
}

#[derive(Debug, Serialize)]
pub struct WildcardEntry {
    pub node_ip: String,
    pub node_port: u16,
    pub primary_count: usize,
    pub replica_count: usize,
    pub primary: Vec<(String, String)>,
    pub replica: Vec<(String, String)>,
}

/// `POST /query` with `key: "*"` (§6 wildcard query): walks the whole ring
/// along successor pointers, collecting each node's local contents,
/// grouped per node.
pub async fn handle_query_wildcard(state: &Arc<NodeState>) -> Result<Vec<WildcardEntry>, AppError> {
    let mut entries = vec![local_wildcard_entry(state).await];

    let start_id = state.addr.id;
    let mut cursor = state.successor().await;
    let mut hops = 0usize;
    while let Some(next) = cursor {
        if next.id == start_id || hops > 4096 {
            break;
        }
        let url = format!("{}/nodeinfo", next.base_url());
        let response = crate::routing::get(&state.http, &url, Duration::from_secs(3)).await?;
        let info: Value = response.json().await.map_err(AppError::from)?;
        entries.push(serde_json::from_value(info).unwrap_or(WildcardEntry {
            node_ip: next.ip.clone(),
            node_port: next.port,
            primary_count: 0,
            replica_count: 0,
            primary: Vec::new(),
            replica: Vec::new(),
        }));
        cursor = reqwest_successor_of(state, &next).await;
        hops += 1;
    }
    Ok(entries)
}

async fn local_wildcard_entry(state: &NodeState) -> WildcardEntry {
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
    WildcardEntry {
        node_ip: state.addr.ip.clone(),
        node_port: state.addr.port,
        primary_count: primary.len(),
        replica_count: replica.len(),
        primary,
        replica,
    }
}

async fn reqwest_successor_of(
    state: &NodeState,
    of: &crate::node::NodeAddress,
) -> Option<crate::node::NodeAddress> {
    let url = format!("{}/nodeinfo", of.base_url());
    let response = crate::routing::get(&state.http, &url, Duration::from_secs(3))
        .await
        .ok()?;
    let info: Value = response.json().await.ok()?;
    serde_json::from_value(info.get("successor")?.clone()).ok()
}
