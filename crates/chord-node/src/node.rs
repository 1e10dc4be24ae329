//! The per-process node record (§3 "NodeAddress", "Node record (N)").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::hash::NodeId;
use crate::pending::PendingTable;

pub const HOP_TIMEOUT: Duration = Duration::from_secs(3);
pub const CHAIN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub ip: String,
    pub port: u16,
    pub id: NodeId,
}

impl NodeAddress {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ConsistencyMode {
    #[serde(rename = "linearizability")]
    Linearizability,
    #[serde(rename = "eventual")]
    Eventual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeConfig {
    pub replication_factor: u32,
    pub consistency: ConsistencyMode,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Neighbors {
    pub successor: Option<NodeAddress>,
    pub predecessor: Option<NodeAddress>,
}

/// A key/value store. Single-writer-at-a-time via the `RwLock`'s write
/// guard; concurrent reads of distinct keys may proceed under a read guard.
pub type Store = RwLock<HashMap<String, String>>;

/// Per-process node state: identity, neighbor pointers, stores, pending
/// request table, and config (§3). Exclusively owned by this node — only
/// `NeighborPtr`s are eventually-consistent projections of the coordinator's
/// ring.
pub struct NodeState {
    pub addr: NodeAddress,
    pub is_bootstrap: bool,
    pub bootstrap_addr: Option<(String, u16)>,
    pub neighbors: RwLock<Neighbors>,
    pub primary: Store,
    pub replica: Store,
    pub config: RwLock<NodeConfig>,
    pub pending: PendingTable,
    /// Per-key monotonic commit sequence, assigned by the chain tail (§4.5.1).
    pub commit_seq: tokio::sync::Mutex<HashMap<String, u64>>,
    pub http: reqwest::Client,
    /// Authoritative ring membership, sorted ascending by id. Only
    /// meaningful on the bootstrap node (§3 "Ring coordinator"); other
    /// nodes leave this empty and rely solely on their own neighbor
    /// pointers.
    pub ring: RwLock<Vec<NodeAddress>>,
}

impl NodeState {
    pub fn new(
        ip: String,
        port: u16,
        is_bootstrap: bool,
        bootstrap_addr: Option<(String, u16)>,
        replication_factor: u32,
        consistency: ConsistencyMode,
    ) -> Arc<NodeState> {
        let id = if is_bootstrap {
            NodeId::ZERO
        } else {
            NodeId::of(&format!("{ip}:{port}"))
        };
        Arc::new(NodeState {
            addr: NodeAddress { ip, port, id },
            is_bootstrap,
            bootstrap_addr,
            neighbors: RwLock::new(Neighbors::default()),
            primary: RwLock::new(HashMap::new()),
            replica: RwLock::new(HashMap::new()),
            config: RwLock::new(NodeConfig {
                replication_factor,
                consistency,
            }),
            pending: PendingTable::new(),
            commit_seq: tokio::sync::Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
            ring: RwLock::new(Vec::new()),
        })
    }

    /// Responsibility test (§4.1): is this node the owner of `key_hash`?
    pub async fn is_responsible(&self, key_hash: NodeId) -> bool {
        let pred = match self.neighbors.read().await.predecessor {
            Some(p) => p.id,
            // No predecessor yet (single-node ring): this node owns everything.
            None => return true,
        };
        crate::hash::in_interval(key_hash, pred, self.addr.id)
    }

    pub async fn successor(&self) -> Option<NodeAddress> {
        self.neighbors.read().await.successor
    }

    pub async fn predecessor(&self) -> Option<NodeAddress> {
        self.neighbors.read().await.predecessor
    }

    pub async fn set_neighbors(&self, successor: NodeAddress, predecessor: NodeAddress) {
        let mut n = self.neighbors.write().await;
        n.successor = Some(successor);
        n.predecessor = Some(predecessor);
    }
}
