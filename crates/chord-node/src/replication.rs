//! The replication engine (§4.5): synchronous chain replication for
//! linearizability, asynchronous fan-forward for eventual consistency, and
//! the post-topology-change cleanup/repair broadcasts (§4.5.6).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::hash::NodeId;
use crate::node::{NodeAddress, NodeState, CHAIN_TIMEOUT, HOP_TIMEOUT};
use crate::routing::{owner_index, post_json, replica_set_indices};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub ip: String,
    pub port: u16,
    pub request_id: Uuid,
}

impl Origin {
    pub fn addr(&self) -> NodeAddress {
        NodeAddress {
            ip: self.ip.clone(),
            port: self.port,
            // The origin's id is never consulted for forwarding decisions;
            // callbacks are addressed by ip:port alone.
            id: NodeId::ZERO,
        }
    }

    pub fn is(&self, state: &NodeState) -> bool {
        self.ip == state.addr.ip && self.port == state.addr.port
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainReplicatePayload {
    pub key: String,
    pub value: Option<String>,
    pub replication_count: u32,
    pub origin: Origin,
    pub final_result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncReplicatePayload {
    pub key: String,
    pub value: Option<String>,
    pub replication_count: u32,
}

/// Writes `value` into `key`'s entry in `store`, applying the concatenation
/// rule (§4.6) if `value` is `Some`, or removing the entry if `None`
/// (delete). Idempotent for inserts: a value already present as the
/// trailing `" | "`-delimited segment is not appended again (§9 "duplicate
/// async deliveries").
async fn apply_replica(store: &crate::node::Store, key: &str, value: Option<&str>) {
    let mut guard = store.write().await;
    match value {
        Some(v) => {
            let entry = guard.entry(key.to_string()).or_insert_with(String::new);
            if entry.is_empty() {
                *entry = v.to_string();
            } else if !is_trailing_segment(entry, v) {
                entry.push_str(" | ");
                entry.push_str(v);
            }
        }
        None => {
            guard.remove(key);
        }
    }
}

fn is_trailing_segment(stored: &str, value: &str) -> bool {
    stored == value || stored.ends_with(&format!(" | {value}"))
}

/// Writes a replica only if this node does not already primary the key
/// (invariant 4, "not-if-primary" rule, §4.5.1 step 3 / §4.5.2).
async fn store_replica_not_if_primary(state: &NodeState, key: &str, value: Option<&str>) {
    if state.primary.read().await.contains_key(key) {
        debug!(key, "skipping replica write: node primaries this key");
        return;
    }
    apply_replica(&state.replica, key, value).await;
}

/// Synchronous chain replication (§4.5.1 steps 2-4, §4.5.4 delete —
/// "symmetric to insert" per spec, unlike `original_source`'s divergent
/// ack-bubbling delete path: here both insert and delete propagate down the
/// chain and only the tail posts the callback).
pub async fn chain_replicate(state: &Arc<NodeState>, mut payload: ChainReplicatePayload) {
    store_replica_not_if_primary(state, &payload.key, payload.value.as_deref()).await;
    debug!(key = %payload.key, count = payload.replication_count, "chain replication hop");

    if payload.replication_count > 0 {
        let Some(successor) = state.successor().await else {
            warn!("chain replication has no successor to forward to");
            return;
        };
        payload.replication_count -= 1;
        if let Err(err) = post_json(
            &state.http,
            &successor,
            if payload.value.is_some() {
                "/chain_replicate_insert"
            } else {
                "/chain_replicate_delete"
            },
            &payload,
            CHAIN_TIMEOUT,
        )
        .await
        {
            warn!(?err, "chain replication forward failed");
        }
        return;
    }

    // Tail of the chain: assign a commit sequence (inserts only, §4.5.1
    // step 4) and post the callback to the origin.
    let mut final_result = payload.final_result;
    if payload.value.is_some() {
        let mut seqs = state.commit_seq.lock().await;
        let seq = seqs.entry(payload.key.clone()).or_insert(0);
        *seq += 1;
        if let Some(obj) = final_result.as_object_mut() {
            obj.insert("commit_seq".to_string(), Value::from(*seq));
        }
    }

    let callback_path = if payload.value.is_some() {
        "/insert_response"
    } else {
        "/delete_response"
    };
    let body = serde_json::json!({
        "request_id": payload.origin.request_id,
        "final_result": final_result,
    });
    if let Err(err) = post_json(
        &state.http,
        &payload.origin.addr(),
        callback_path,
        &body,
        HOP_TIMEOUT,
    )
    .await
    {
        warn!(?err, "chain tail callback failed");
    }
}

/// Asynchronous fan-forward propagation (§4.5.2, §4.5.4 eventual delete).
/// Fire-and-forget: each hop applies the write and forwards with a
/// decremented count, regardless of downstream failure (§7 "replication
/// failures in eventual mode are logged, not surfaced").
pub async fn async_replicate(
    state: &Arc<NodeState>,
    key: String,
    value: Option<String>,
    mut replication_count: u32,
    from_new_join: bool,
) {
    store_replica_not_if_primary(state, &key, value.as_deref()).await;

    if replication_count > 0 {
        let Some(successor) = state.successor().await else {
            return;
        };
        replication_count -= 1;
        let payload = AsyncReplicatePayload {
            key,
            value,
            replication_count,
        };
        let path = if payload.value.is_some() {
            "/async_replicate_insert"
        } else {
            "/async_replicate_delete"
        };
        if let Err(err) = post_json(&state.http, &successor, path, &payload, HOP_TIMEOUT).await {
            warn!(?err, "async replication forward failed");
        }
        return;
    }

    // Count exhausted. For deletes, always nudge the next node beyond the
    // chain to drop any stale replica (original_source's unconditional
    // cleanup hop). For inserts, only do so when this propagation exists
    // because a join/absorb just shifted the replica-set boundary.
    if value.is_none() || from_new_join {
        let Some(successor) = state.successor().await else {
            return;
        };
        let payload = AsyncReplicatePayload {
            key,
            value: None,
            replication_count: 0,
        };
        if let Err(err) =
            post_json(&state.http, &successor, "/replicate_delete", &payload, HOP_TIMEOUT).await
        {
            warn!(?err, "stale replica cleanup hop failed");
        }
    }
}

/// `/replicate_delete`: a single-hop instruction to drop a stale replica.
pub async fn replicate_delete_local(state: &NodeState, key: &str) {
    state.replica.write().await.remove(key);
}

/// `cleanup_replicas` (§4.5.6): prune any replica this node no longer
/// belongs in the replica set for, given the current ring and replication
/// factor.
pub async fn cleanup_replicas(state: &NodeState, ring: &[NodeAddress], k: u32) {
    let keys: Vec<String> = state.replica.read().await.keys().cloned().collect();
    let mut to_remove = Vec::new();
    for key in keys {
        let hash = NodeId::of(&key);
        let owner = owner_index(ring, hash);
        let holders = replica_set_indices(ring, owner, k);
        let still_holds = holders.iter().any(|&i| ring[i].id == state.addr.id);
        if !still_holds {
            to_remove.push(key);
        }
    }
    if !to_remove.is_empty() {
        let mut guard = state.replica.write().await;
        for key in &to_remove {
            guard.remove(key);
        }
    }
}

/// `repair_replicas` (§4.5.6): re-propagate every primary key so that any
/// node newly belonging to the replica set receives it.
pub async fn repair_replicas(state: &Arc<NodeState>, k: u32) {
    if k <= 1 {
        return;
    }
    let entries: Vec<(String, String)> = state
        .primary
        .read()
        .await
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (key, value) in entries {
        let state = state.clone();
        tokio::spawn(async move {
            async_replicate(&state, key, Some(value), k - 1, false).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concatenation_rule_joins_with_pipe() {
        let store: crate::node::Store = Default::default();
        apply_replica(&store, "song", Some("A")).await;
        apply_replica(&store, "song", Some("B")).await;
        assert_eq!(store.read().await.get("song").unwrap(), "A | B");
    }

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let store: crate::node::Store = Default::default();
        apply_replica(&store, "song", Some("A")).await;
        apply_replica(&store, "song", Some("A")).await;
        assert_eq!(store.read().await.get("song").unwrap(), "A");

        apply_replica(&store, "song", Some("B")).await;
        apply_replica(&store, "song", Some("B")).await;
        assert_eq!(store.read().await.get("song").unwrap(), "A | B");
    }

    #[tokio::test]
    async fn delete_removes_whole_key() {
        let store: crate::node::Store = Default::default();
        apply_replica(&store, "song", Some("A")).await;
        apply_replica(&store, "song", Some("B")).await;
        apply_replica(&store, "song", None).await;
        assert!(!store.read().await.contains_key("song"));
    }

    #[tokio::test]
    async fn not_if_primary_rule_skips_replica_write() {
        let state = NodeState::new(
            "127.0.0.1".into(),
            9000,
            true,
            None,
            1,
            crate::node::ConsistencyMode::Eventual,
        );
        state
            .primary
            .write()
            .await
            .insert("song".into(), "A".into());

        store_replica_not_if_primary(&state, "song", Some("B")).await;
        assert!(!state.replica.read().await.contains_key("song"));
    }
}
