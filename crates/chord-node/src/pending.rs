//! The request/callback coordinator (§4.4): a per-origin table of in-flight
//! requests, each woken exactly once by a callback bearing its request id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::AppError;

/// Bounded waits named in §4.4/§6.
pub const INSERT_TIMEOUT: Duration = Duration::from_secs(20);
pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

struct Slot {
    notify: Notify,
    result: Mutex<Option<Value>>,
}

/// Single lock protecting the whole map; callbacks are O(1) (§5).
#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<Uuid, Arc<Slot>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh pending request and returns its id.
    pub async fn register(&self) -> Uuid {
        let id = Uuid::new_v4();
        let slot = Arc::new(Slot {
            notify: Notify::new(),
            result: Mutex::new(None),
        });
        self.slots.lock().await.insert(id, slot);
        id
    }

    /// Waits for `request_id`'s callback up to `timeout`. Removes the entry
    /// either way: on wake (consuming the result) or on timeout (purging the
    /// stale entry, per §5 "a timed-out pending request is purged").
    pub async fn wait(&self, request_id: Uuid, timeout: Duration) -> Result<Value, AppError> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(&request_id).cloned()
        }
        .ok_or(AppError::NotFound)?;

        let woke = tokio::time::timeout(timeout, slot.notify.notified())
            .await
            .is_ok();

        self.slots.lock().await.remove(&request_id);

        if !woke {
            return Err(AppError::Timeout);
        }
        slot.result.lock().await.take().ok_or(AppError::Timeout)
    }

    /// Delivers a callback result and fires the slot's signal exactly once.
    /// Unknown ids (already woken, timed out, or never registered) are
    /// reported back as not-found so the caller can return a 404-equivalent
    /// error, per §7 "unknown-request-id callbacks are dropped".
    pub async fn complete(&self, request_id: Uuid, result: Value) -> bool {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(&request_id).cloned()
        };
        let Some(slot) = slot else {
            return false;
        };
        *slot.result.lock().await = Some(result);
        slot.notify.notify_one();
        true
    }
}
