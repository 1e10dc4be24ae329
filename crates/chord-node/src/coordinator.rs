//! Ring coordinator (§3, §4.2): the bootstrap node is the single
//! authoritative source of ring membership. Every join and depart is
//! serialized through it, after which it pushes updated neighbor pointers,
//! triggers key handoff, and broadcasts the cleanup/repair pass (§4.5.6).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;
use crate::hash::NodeId;
use crate::membership::{TransferKeysPayload, UpdateNeighborsPayload};
use crate::node::{ConsistencyMode, NodeAddress, NodeState};
use crate::routing::post_json;

const MEMBERSHIP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveNodeRequest {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinResponse {
    pub id: NodeId,
    pub successor: NodeAddress,
    pub predecessor: NodeAddress,
    pub replication_factor: u32,
    pub consistency: ConsistencyMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingsRequest {
    pub replication_factor: Option<u32>,
    pub consistency: Option<ConsistencyMode>,
}

/// `POST /join` (coordinator-only): admits a new member, computes its
/// neighbor pointers, hands off the slice of keys it now owns, and
/// broadcasts the replica repair pass.
pub async fn handle_join(
    state: &Arc<NodeState>,
    req: JoinRequest,
) -> Result<JoinResponse, AppError> {
    if !state.is_bootstrap {
        return Err(AppError::Rejected(
            "only the bootstrap coordinator accepts joins",
        ));
    }

    let new_id = NodeId::of(&format!("{}:{}", req.ip, req.port));
    let new_addr = NodeAddress {
        ip: req.ip.clone(),
        port: req.port,
        id: new_id,
    };

    let mut ring = state.ring.write().await;
    if ring.is_empty() {
        ring.push(state.addr);
    }
    if ring.iter().any(|m| m.id == new_id) {
        return Err(AppError::Rejected("node already present in the ring"));
    }

    let insert_at = ring.partition_point(|m| m.id < new_id);
    ring.insert(insert_at, new_addr);
    let n = ring.len();

    let successor_idx = (insert_at + 1) % n;
    let predecessor_idx = (insert_at + n - 1) % n;
    let successor = ring[successor_idx];
    let predecessor = ring[predecessor_idx];

    let config = *state.config.read().await;
    let snapshot = ring.clone();
    drop(ring);

    info!(%new_id, ip = %req.ip, port = req.port, "node joined the ring");

    if n > 1 {
        // The old owner of the joining node's range becomes its successor;
        // update its predecessor pointer and ask it to hand off the keys
        // that the new node now owns.
        if let Err(err) = post_json(
            &state.http,
            &successor,
            "/update_neighbors",
            &UpdateNeighborsPayload {
                successor: None,
                predecessor: Some(new_addr),
            },
            MEMBERSHIP_TIMEOUT,
        )
        .await
        {
            warn!(?err, "failed to update successor's predecessor pointer");
        }

        if let Err(err) = post_json(
            &state.http,
            &predecessor,
            "/update_neighbors",
            &UpdateNeighborsPayload {
                successor: Some(new_addr),
                predecessor: None,
            },
            MEMBERSHIP_TIMEOUT,
        )
        .await
        {
            warn!(?err, "failed to update predecessor's successor pointer");
        }

        if let Err(err) = post_json(
            &state.http,
            &successor,
            "/transfer_keys",
            &TransferKeysPayload {
                lower_exclusive: predecessor.id,
                upper_inclusive: new_id,
                to: new_addr,
            },
            MEMBERSHIP_TIMEOUT,
        )
        .await
        {
            warn!(?err, "key handoff to new node failed");
        }
    }

    if let Err(err) = post_json(
        &state.http,
        &new_addr,
        "/update_neighbors",
        &UpdateNeighborsPayload {
            successor: Some(successor),
            predecessor: Some(predecessor),
        },
        MEMBERSHIP_TIMEOUT,
    )
    .await
    {
        warn!(?err, "failed to install neighbors on the new node");
    }

    // Only cleanup is broadcast after a join (§4.2); a coordinator-wide
    // repair here would be redundant with the new node's own "propagating"
    // phase (§4.7), which re-propagates the keys it just absorbed. See
    // DESIGN.md for the "repair after join" open question.
    broadcast_cleanup(state, &snapshot, config.replication_factor).await;

    Ok(JoinResponse {
        id: new_id,
        successor,
        predecessor,
        replication_factor: config.replication_factor,
        consistency: config.consistency,
    })
}

/// `POST /remove_node` (coordinator-only): the counterpart the coordinator
/// runs when a member departs (§4.2 "depart"). The departing node's own
/// keys were already handed off to its successor by the time this runs
/// (§4.5.5); here the coordinator only updates the ring list and stitches
/// the departing node's neighbors together.
pub async fn handle_remove_node(
    state: &Arc<NodeState>,
    req: RemoveNodeRequest,
) -> Result<(), AppError> {
    if !state.is_bootstrap {
        return Err(AppError::Rejected(
            "only the bootstrap coordinator accepts departures",
        ));
    }

    let departing_id = NodeId::of(&format!("{}:{}", req.ip, req.port));
    let mut ring = state.ring.write().await;
    let Some(idx) = ring.iter().position(|m| m.id == departing_id) else {
        return Err(AppError::NotFound);
    };
    let n = ring.len();
    if n <= 1 {
        ring.clear();
        return Ok(());
    }

    let successor = ring[(idx + 1) % n];
    let predecessor = ring[(idx + n - 1) % n];
    ring.remove(idx);
    let config = *state.config.read().await;
    let snapshot = ring.clone();
    drop(ring);

    info!(%departing_id, "node departed the ring");

    if let Err(err) = post_json(
        &state.http,
        &successor,
        "/update_neighbors",
        &UpdateNeighborsPayload {
            successor: None,
            predecessor: Some(predecessor),
        },
        MEMBERSHIP_TIMEOUT,
    )
    .await
    {
        warn!(?err, "failed to update successor's predecessor pointer");
    }

    if let Err(err) = post_json(
        &state.http,
        &predecessor,
        "/update_neighbors",
        &UpdateNeighborsPayload {
            successor: Some(successor),
            predecessor: None,
        },
        MEMBERSHIP_TIMEOUT,
    )
    .await
    {
        warn!(?err, "failed to update predecessor's successor pointer");
    }

    // Depart broadcasts both passes (§4.8 "cleanup_and_repair_broadcast"):
    // cleanup prunes now-misplaced replicas, repair fills gaps left by the
    // departed member.
    broadcast_cleanup(state, &snapshot, config.replication_factor).await;
    broadcast_repair(state, &snapshot, config.replication_factor).await;
    Ok(())
}

/// `GET /overlay` (§6): returns the coordinator's current ring snapshot.
pub async fn handle_overlay(state: &NodeState) -> Result<Vec<NodeAddress>, AppError> {
    if !state.is_bootstrap {
        return Err(AppError::Rejected(
            "only the bootstrap coordinator tracks the ring overlay",
        ));
    }
    Ok(state.ring.read().await.clone())
}

/// `POST /update_settings` (§4.2 `updateConfig`, §9 "destructive by
/// design"): changes replication factor or consistency mode cluster-wide.
/// The config push to each member's `/update_config` (`membership::
/// handle_update_config`) carries out the mandated global purge of every
/// member's PrimaryStore before installing the new factor/mode; the
/// cleanup+repair broadcast that follows then rebuilds replica sets under
/// the new factor.
pub async fn handle_update_settings(
    state: &Arc<NodeState>,
    req: UpdateSettingsRequest,
) -> Result<(), AppError> {
    if !state.is_bootstrap {
        return Err(AppError::Rejected(
            "only the bootstrap coordinator can change cluster settings",
        ));
    }

    let ring = state.ring.read().await.clone();
    let mut config = state.config.write().await;
    if let Some(factor) = req.replication_factor {
        if factor == 0 {
            return Err(AppError::ConfigInvalid("replication_factor must be >= 1"));
        }
        config.replication_factor = factor;
    }
    if let Some(mode) = req.consistency {
        config.consistency = mode;
    }
    let updated = *config;
    drop(config);

    for member in &ring {
        let body = UpdateSettingsRequest {
            replication_factor: Some(updated.replication_factor),
            consistency: Some(updated.consistency),
        };
        if let Err(err) = post_json(
            &state.http,
            member,
            "/update_config",
            &body,
            MEMBERSHIP_TIMEOUT,
        )
        .await
        {
            warn!(?err, ip = %member.ip, port = member.port, "failed to push updated settings");
        }
    }

    broadcast_cleanup(state, &ring, updated.replication_factor).await;
    broadcast_repair(state, &ring, updated.replication_factor).await;
    Ok(())
}

async fn broadcast_cleanup(state: &NodeState, ring: &[NodeAddress], k: u32) {
    for member in ring {
        let body = serde_json::json!({"ring": ring, "replication_factor": k});
        if let Err(err) = post_json(
            &state.http,
            member,
            "/cleanup_replicas_all",
            &body,
            MEMBERSHIP_TIMEOUT,
        )
        .await
        {
            warn!(?err, ip = %member.ip, port = member.port, "cleanup broadcast hop failed");
        }
    }
}

async fn broadcast_repair(state: &NodeState, ring: &[NodeAddress], k: u32) {
    for member in ring {
        let body = serde_json::json!({"ring": ring, "replication_factor": k});
        if let Err(err) = post_json(
            &state.http,
            member,
            "/repair_replicas_all",
            &body,
            MEMBERSHIP_TIMEOUT,
        )
        .await
        {
            warn!(?err, ip = %member.ip, port = member.port, "repair broadcast hop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_rejected_on_non_bootstrap() {
        let state = NodeState::new(
            "127.0.0.1".into(),
            9200,
            false,
            Some(("127.0.0.1".into(), 9100)),
            1,
            ConsistencyMode::Eventual,
        );
        let err = handle_join(
            &state,
            JoinRequest {
                ip: "127.0.0.1".into(),
                port: 9201,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));
    }

    #[tokio::test]
    async fn remove_unknown_node_is_not_found() {
        let state = NodeState::new(
            "127.0.0.1".into(),
            9200,
            true,
            None,
            1,
            ConsistencyMode::Eventual,
        );
        state.ring.write().await.push(state.addr);
        let err = handle_remove_node(
            &state,
            RemoveNodeRequest {
                ip: "10.0.0.9".into(),
                port: 1,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}
