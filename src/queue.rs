//! Pending-operation queue.
//!
//! Durable FIFO log of backend mutations that have not been confirmed yet.
//! Every mutation rewrites the full snapshot through the [`KvStore`] port so
//! a restart reconstructs the same queue. Persist failures are logged and
//! swallowed: the in-memory queue stays authoritative for this process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::kv::{self, KvStore};
use crate::models::OperationPayload;

pub const DEFAULT_QUEUE_KEY: &str = "pending_operations";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub payload: OperationPayload,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

pub struct PendingQueue {
    store: Arc<dyn KvStore>,
    key: String,
    items: Mutex<Vec<QueuedOperation>>,
}

impl PendingQueue {
    /// Rebuild the queue from its persisted snapshot. A missing or
    /// unreadable snapshot yields an empty queue.
    pub fn load(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let items = match kv::read_json::<Vec<QueuedOperation>>(store.as_ref(), &key) {
            Ok(Some(items)) => items,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "pending queue: failed to read snapshot");
                Vec::new()
            }
        };
        if !items.is_empty() {
            info!(key = %key, pending = items.len(), "pending queue restored");
        }
        Self {
            store,
            key,
            items: Mutex::new(items),
        }
    }

    /// Append an operation and return its generated id.
    pub fn enqueue(&self, payload: OperationPayload) -> String {
        let op = QueuedOperation {
            id: Uuid::new_v4().to_string(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        };
        let id = op.id.clone();
        let kind = op.payload.kind();

        let mut items = self.lock_items();
        items.push(op);
        self.persist(&items);
        debug!(operation_id = %id, kind, pending = items.len(), "operation queued");
        id
    }

    /// Remove an operation. Returns `false` when the id is not queued.
    pub fn dequeue(&self, id: &str) -> bool {
        let mut items = self.lock_items();
        let before = items.len();
        items.retain(|op| op.id != id);
        if items.len() == before {
            return false;
        }
        self.persist(&items);
        true
    }

    /// Snapshot of the queue in enqueue order.
    pub fn list(&self) -> Vec<QueuedOperation> {
        self.lock_items().clone()
    }

    pub fn get(&self, id: &str) -> Option<QueuedOperation> {
        self.lock_items().iter().find(|op| op.id == id).cloned()
    }

    /// Bump the retry counter after a failed delivery attempt and return the
    /// new count, or `None` if the operation is no longer queued.
    pub fn record_failure(&self, id: &str) -> Option<u32> {
        let mut items = self.lock_items();
        let op = items.iter_mut().find(|op| op.id == id)?;
        op.retry_count = op.retry_count.saturating_add(1);
        let count = op.retry_count;
        self.persist(&items);
        Some(count)
    }

    /// Swap the payload of a queued operation, keeping its place and retry
    /// count. Returns `false` when the id is not queued.
    pub fn replace_payload(&self, id: &str, payload: OperationPayload) -> bool {
        let mut items = self.lock_items();
        let Some(op) = items.iter_mut().find(|op| op.id == id) else {
            return false;
        };
        op.payload = payload;
        self.persist(&items);
        true
    }

    /// Re-point every queued reference to customer `from` at `to`, e.g. once
    /// a provisional customer has been created on the backend. Returns how
    /// many operations changed.
    pub fn rewrite_customer_id(&self, from: &str, to: &str) -> usize {
        let mut items = self.lock_items();
        let changed = items
            .iter_mut()
            .map(|op| op.payload.rewrite_customer_id(from, to))
            .filter(|changed| *changed)
            .count();
        if changed > 0 {
            self.persist(&items);
            debug!(from, to, changed, "queued customer references rewritten");
        }
        changed
    }

    /// Drop every queued operation. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.lock_items();
        let removed = items.len();
        items.clear();
        self.persist(&items);
        if removed > 0 {
            info!(removed, "pending queue cleared");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, Vec<QueuedOperation>> {
        // A poisoned lock only means another thread panicked mid-update; the
        // Vec itself is still structurally valid.
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, items: &[QueuedOperation]) {
        if let Err(e) = kv::write_json(self.store.as_ref(), &self.key, items) {
            error!(key = %self.key, error = %e, "pending queue: failed to persist snapshot");
        }
    }
}
