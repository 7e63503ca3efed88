//! Background sync engine.
//!
//! Replays the pending-operation queue against the backend whenever
//! connectivity comes back. A drain pass walks the queue in FIFO order and
//! sends each operation once; a failure bumps that operation's retry count
//! without stopping the pass, and an operation that reaches the retry
//! ceiling is dropped with an error notice. Only one pass runs at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::connectivity::{ConnectivityMonitor, NetworkStatus};
use crate::customers::{self, CustomerCache};
use crate::error::{Error, Result};
use crate::models::OperationPayload;
use crate::notify::{Notice, Notifier};
use crate::queue::{PendingQueue, QueuedOperation};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    QueueEmpty,
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub skipped: Option<SkipReason>,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    pub is_online: bool,
    pub is_syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

enum Delivery {
    Synced,
    Failed(Error),
}

pub struct SyncEngine {
    queue: Arc<PendingQueue>,
    backend: Arc<dyn Backend>,
    connectivity: Arc<ConnectivityMonitor>,
    notifier: Notifier,
    customers: Option<Arc<CustomerCache>>,
    max_retries: u32,
    is_draining: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<PendingQueue>,
        backend: Arc<dyn Backend>,
        connectivity: Arc<ConnectivityMonitor>,
        notifier: Notifier,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            backend,
            connectivity,
            notifier,
            customers: None,
            max_retries: max_retries.max(1),
            is_draining: AtomicBool::new(false),
            last_sync: Mutex::new(None),
        }
    }

    /// Keep the customer cache in step with replayed customer writes.
    pub fn with_customer_cache(mut self, cache: Arc<CustomerCache>) -> Self {
        self.customers = Some(cache);
        self
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            pending: self.queue.len(),
            is_online: self.connectivity.current(),
            is_syncing: self.is_draining.load(Ordering::SeqCst),
            last_sync: self.last_sync(),
        }
    }

    /// Run one drain pass over the queue.
    pub async fn drain(&self) -> DrainReport {
        if !self.connectivity.current() {
            return DrainReport::skipped(SkipReason::Offline);
        }
        if self.queue.is_empty() {
            return DrainReport::skipped(SkipReason::QueueEmpty);
        }
        if self
            .is_draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in progress, skipping");
            return DrainReport::skipped(SkipReason::AlreadyRunning);
        }

        let report = self.drain_pass().await;

        if let Ok(mut guard) = self.last_sync.lock() {
            *guard = Some(Utc::now());
        }
        self.is_draining.store(false, Ordering::SeqCst);

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                abandoned = report.abandoned,
                "Sync pass complete"
            );
        }
        report
    }

    /// Manual trigger from the UI.
    pub async fn force_sync(&self) -> Result<DrainReport> {
        if !self.connectivity.current() {
            return Err(Error::Offline);
        }
        Ok(self.drain().await)
    }

    async fn drain_pass(&self) -> DrainReport {
        let mut report = DrainReport::default();

        for queued in self.queue.list() {
            // Re-read so references rewritten earlier in this pass are seen.
            let Some(op) = self.queue.get(&queued.id) else {
                continue;
            };
            report.attempted += 1;
            match self.deliver(&op).await {
                Delivery::Synced => {
                    self.queue.dequeue(&op.id);
                    report.synced += 1;
                    debug!(operation_id = %op.id, kind = op.payload.kind(), "operation synced");
                }
                Delivery::Failed(err) => {
                    report.failed += 1;
                    let Some(attempts) = self.queue.record_failure(&op.id) else {
                        continue;
                    };
                    warn!(
                        operation_id = %op.id,
                        kind = op.payload.kind(),
                        attempts,
                        error = %err,
                        "operation sync failed"
                    );
                    if attempts >= self.max_retries {
                        self.queue.dequeue(&op.id);
                        report.abandoned += 1;
                        self.notifier.publish(Notice::SyncAbandoned {
                            operation_id: op.id.clone(),
                            kind: op.payload.kind().to_string(),
                            attempts,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        report
    }

    async fn deliver(&self, op: &QueuedOperation) -> Delivery {
        let result = match &op.payload {
            OperationPayload::Sale(sale) => self.backend.submit_sale(sale).await.map(|_| ()),
            OperationPayload::CustomerCreate(draft) => {
                self.backend.create_customer(draft).await.map(|created| {
                    let Some(customer) = created else {
                        return;
                    };
                    // Later operations may still reference the provisional id.
                    let local_id = customers::provisional_id(&op.id);
                    self.queue.rewrite_customer_id(&local_id, &customer.id);
                    if let Some(cache) = &self.customers {
                        customers::replace_provisional(cache, &op.id, customer);
                    }
                })
            }
            OperationPayload::CustomerUpdate { id, draft } => {
                self.backend.update_customer(id, draft).await.map(|updated| {
                    if let (Some(cache), Some(customer)) = (&self.customers, updated) {
                        customers::upsert_cached(cache, customer);
                    }
                })
            }
        };
        match result {
            Ok(()) => Delivery::Synced,
            Err(e) => Delivery::Failed(e),
        }
    }
}

/// Spawn the loop that drains the queue once per offline→online transition,
/// and once at startup when already online with pending work.
pub fn start_sync_loop(engine: Arc<SyncEngine>, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut status_rx = engine.connectivity.subscribe();

    tokio::spawn(async move {
        info!("Sync loop started");

        if engine.connectivity.current() && !engine.queue.is_empty() {
            engine.drain().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *status_rx.borrow_and_update();
                    if status == NetworkStatus::Online {
                        info!(pending = engine.queue.len(), "Network restored; draining queue");
                        engine.drain().await;
                    } else {
                        info!("Network offline; keeping queue pending");
                    }
                }
            }
        }

        info!("Sync loop stopped");
    })
}
