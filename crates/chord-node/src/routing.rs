//! Deterministic forwarding of an operation around the successor ring
//! (§4.3): if responsible, process locally; else forward to the successor
//! unchanged.

use serde::Serialize;
use std::time::Duration;

use crate::error::AppError;
use crate::node::NodeAddress;

/// POSTs `payload` as JSON to `{target}{path}`, with the given per-hop
/// timeout. Used for forwards, chain replication, and callbacks alike —
/// the single outbound primitive every other component builds on.
pub async fn post_json<T: Serialize>(
    client: &reqwest::Client,
    target: &NodeAddress,
    path: &str,
    payload: &T,
    timeout: Duration,
) -> Result<reqwest::Response, AppError> {
    client
        .post(format!("{}{path}", target.base_url()))
        .timeout(timeout)
        .json(payload)
        .send()
        .await
        .map_err(AppError::from)
}

pub async fn get(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<reqwest::Response, AppError> {
    client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(AppError::from)
}

/// Computes the ring-position index of the node responsible for `hash` in a
/// ring sorted ascending by id: the first member whose id is `>= hash`, or
/// the first member of the ring if none is (wraparound to the smallest id,
/// which is how the bootstrap's zero id absorbs the tail of the ring, §9).
pub fn owner_index(ring: &[NodeAddress], hash: crate::hash::NodeId) -> usize {
    ring.iter()
        .position(|m| m.id >= hash)
        .unwrap_or(0)
}

/// The indices (within `ring`) of the up-to `k-1` distinct members holding
/// `owner_idx`'s replica set — the members immediately following the owner
/// on the ring, capped at the ring's size (§GLOSSARY "successor list").
pub fn replica_set_indices(ring: &[NodeAddress], owner_idx: usize, k: u32) -> Vec<usize> {
    let n = ring.len();
    if n <= 1 {
        return Vec::new();
    }
    let count = ((k.saturating_sub(1)) as usize).min(n - 1);
    (1..=count).map(|offset| (owner_idx + offset) % n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::NodeId;

    fn addr(id: NodeId) -> NodeAddress {
        NodeAddress {
            ip: "127.0.0.1".into(),
            port: 0,
            id,
        }
    }

    #[test]
    fn owner_index_wraps_to_smallest() {
        let ids: Vec<NodeId> = (0..5).map(|i| NodeId::of(&format!("n{i}"))).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        let ring: Vec<NodeAddress> = sorted.iter().map(|&id| addr(id)).collect();

        // A hash greater than every member's id must wrap to index 0.
        let max = *sorted.last().unwrap();
        let beyond = NodeId::from_hex(&"f".repeat(40)).unwrap();
        assert!(beyond > max);
        assert_eq!(owner_index(&ring, beyond), 0);
    }

    #[test]
    fn replica_set_caps_at_ring_size() {
        let ring: Vec<NodeAddress> = (0..3)
            .map(|i| addr(NodeId::of(&format!("r{i}"))))
            .collect();
        // k=5 but only 2 other members exist.
        assert_eq!(replica_set_indices(&ring, 0, 5).len(), 2);
        assert_eq!(replica_set_indices(&ring, 0, 1).len(), 0);
    }
}
