//! Node-side membership and handoff endpoints (§4.2, §4.5.5): everything a
//! ring member does in response to the coordinator's join/depart
//! orchestration, plus the depart flow a member initiates itself.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hash::NodeId;
use crate::node::{NodeAddress, NodeConfig, NodeState};
use crate::routing::post_json;

const HANDOFF_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNeighborsPayload {
    pub successor: Option<NodeAddress>,
    pub predecessor: Option<NodeAddress>,
}

/// `POST /update_neighbors`: installs whichever of successor/predecessor
/// the coordinator supplies, leaving the other untouched.
pub async fn handle_update_neighbors(state: &NodeState, payload: UpdateNeighborsPayload) {
    let mut neighbors = state.neighbors.write().await;
    if let Some(successor) = payload.successor {
        neighbors.successor = Some(successor);
    }
    if let Some(predecessor) = payload.predecessor {
        neighbors.predecessor = Some(predecessor);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferKeysPayload {
    pub lower_exclusive: NodeId,
    pub upper_inclusive: NodeId,
    pub to: NodeAddress,
}

/// `POST /transfer_keys`: pushes every primary key in `(lower, upper]`,
/// together with this node's *entire* current ReplicaStore (§4.2 "hand off
/// ... from its PrimaryStore together with its entire current
/// ReplicaStore"), to `to` via `/absorb_keys`. Only the handed-off primary
/// range is dropped locally afterward (§4.5.5 "handoff is a move, not a
/// copy") — the donated replica snapshot is left in place here; the
/// recipient's copy of it is pruned down to what it actually belongs to by
/// the cleanup broadcast that follows the join.
pub async fn handle_transfer_keys(state: &Arc<NodeState>, payload: TransferKeysPayload) {
    let moving: Vec<(String, String)> = {
        let guard = state.primary.read().await;
        guard
            .iter()
            .filter(|(k, _)| {
                crate::hash::in_interval(
                    NodeId::of(k),
                    payload.lower_exclusive,
                    payload.upper_inclusive,
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    let replica_snapshot: Vec<(String, String)> = state
        .replica
        .read()
        .await
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if moving.is_empty() && replica_snapshot.is_empty() {
        return;
    }

    let keys: Vec<String> = moving.iter().map(|(k, _)| k.clone()).collect();
    if let Err(err) = post_json(
        &state.http,
        &payload.to,
        "/absorb_keys",
        &AbsorbKeysPayload {
            entries: moving,
            replica_entries: replica_snapshot,
        },
        HANDOFF_TIMEOUT,
    )
    .await
    {
        warn!(?err, "key handoff failed, keeping keys locally");
        return;
    }

    let mut guard = state.primary.write().await;
    for key in keys {
        guard.remove(&key);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbsorbKeysPayload {
    pub entries: Vec<(String, String)>,
    /// The donor's replica-store snapshot handed off alongside the primary
    /// range on a join (§4.2); empty for a depart handoff (§4.8), which
    /// only ever moves PrimaryStore.
    #[serde(default)]
    pub replica_entries: Vec<(String, String)>,
}

/// `POST /absorb_keys`: receives a batch of keys handed off from a
/// neighbor (a join handoff, §4.7, or a departing node's handoff, §4.8)
/// and installs them as primaries, plus whatever replica-store snapshot
/// came along with a join handoff, installed as-is (a later cleanup
/// broadcast prunes whatever doesn't belong). The *propagating* phase
/// follows immediately for the absorbed primaries: each is re-propagated
/// down the replica chain so the node's new replica set gets filled, since
/// absorbing a key here just moved the ring's ownership boundary.
pub async fn handle_absorb_keys(state: &Arc<NodeState>, payload: AbsorbKeysPayload) {
    {
        let mut guard = state.primary.write().await;
        for (key, value) in &payload.entries {
            guard.insert(key.clone(), value.clone());
        }
    }
    if !payload.replica_entries.is_empty() {
        let mut guard = state.replica.write().await;
        for (key, value) in payload.replica_entries {
            guard.insert(key, value);
        }
    }

    let replication_factor = state.config.read().await.replication_factor;
    if replication_factor <= 1 {
        return;
    }
    for (key, value) in payload.entries {
        let state = state.clone();
        tokio::spawn(async move {
            crate::replication::async_replicate(
                &state,
                key,
                Some(value),
                replication_factor - 1,
                true,
            )
            .await;
        });
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RingBroadcastPayload {
    pub ring: Vec<NodeAddress>,
    pub replication_factor: u32,
}

/// `POST /cleanup_replicas_all`: this node's slice of the coordinator's
/// post-topology-change cleanup broadcast (§4.5.6).
pub async fn handle_cleanup_replicas_all(state: &NodeState, payload: RingBroadcastPayload) {
    crate::replication::cleanup_replicas(state, &payload.ring, payload.replication_factor).await;
}

/// `POST /repair_replicas_all`: this node's slice of the coordinator's
/// post-topology-change repair broadcast (§4.5.6).
pub async fn handle_repair_replicas_all(state: &Arc<NodeState>, payload: RingBroadcastPayload) {
    crate::replication::repair_replicas(state, payload.replication_factor).await;
}

/// `POST /update_config`: applies a cluster-wide settings change pushed by
/// the coordinator (§4.2 `updateConfig`, §9 "destructive by design"). Since
/// changing `k` changes replica-set membership for every key, this first
/// purges the node's entire PrimaryStore — a stale primary under the old
/// factor is strictly worse than a missing one, which a client simply
/// re-inserts — before installing the new settings.
pub async fn handle_update_config(state: &NodeState, replication_factor: u32, consistency: crate::node::ConsistencyMode) {
    state.primary.write().await.clear();

    let mut config = state.config.write().await;
    *config = NodeConfig {
        replication_factor,
        consistency,
    };
}

/// `POST /depart`: a member's voluntary departure (§4.2, §4.5.5). Unlike
/// every other endpoint, this does not reply before the process exits —
/// the node hands its primary keys to its successor, tells the coordinator
/// it is leaving, and then exits, so there is no steady state in which it
/// could answer a follow-up request.
pub async fn handle_depart(state: &Arc<NodeState>) {
    let successor = state.successor().await;
    if let Some(successor) = successor {
        let entries: Vec<(String, String)> = state
            .primary
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !entries.is_empty() {
            if let Err(err) = post_json(
                &state.http,
                &successor,
                "/absorb_keys",
                &AbsorbKeysPayload {
                    entries,
                    replica_entries: Vec::new(),
                },
                HANDOFF_TIMEOUT,
            )
            .await
            {
                warn!(?err, "key handoff to successor failed during depart");
            }
        }
    }

    if let Some((bootstrap_ip, bootstrap_port)) = state.bootstrap_addr.clone() {
        let bootstrap = NodeAddress {
            ip: bootstrap_ip,
            port: bootstrap_port,
            id: NodeId::ZERO,
        };
        let body = serde_json::json!({"ip": state.addr.ip, "port": state.addr.port});
        if let Err(err) = post_json(
            &state.http,
            &bootstrap,
            "/remove_node",
            &body,
            HANDOFF_TIMEOUT,
        )
        .await
        {
            warn!(?err, "failed to notify coordinator of departure");
        }
    }

    info!("departing the ring");
    // A brief delay lets the HTTP response to this endpoint's own caller
    // flush before the process exits.
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::process::exit(0);
}
