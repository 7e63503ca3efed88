//! Sale submission: send now when possible, otherwise keep it for replay.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::Backend;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::models::{OperationPayload, SalePayload};
use crate::notify::{Notice, Notifier};
use crate::queue::PendingQueue;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Confirmed by the backend; carries its `data` field when present.
    Sent(Option<Value>),
    /// Stored in the pending queue under this id.
    Queued(String),
}

pub struct SalesService {
    backend: Arc<dyn Backend>,
    queue: Arc<PendingQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    notifier: Notifier,
}

impl SalesService {
    pub fn new(
        backend: Arc<dyn Backend>,
        queue: Arc<PendingQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            backend,
            queue,
            connectivity,
            notifier,
        }
    }

    pub async fn submit(&self, sale: SalePayload) -> Result<SubmitOutcome> {
        validate_sale(&sale)?;

        if self.connectivity.current() {
            match self.backend.submit_sale(&sale).await {
                Ok(data) => {
                    info!(total = sale.total, items = sale.items.len(), "sale recorded");
                    return Ok(SubmitOutcome::Sent(data));
                }
                Err(e) => warn!(error = %e, "sale submission failed, storing locally"),
            }
        }

        Ok(SubmitOutcome::Queued(self.queue_sale(sale)))
    }

    /// Queue without trying the network.
    pub fn defer(&self, sale: SalePayload) -> Result<String> {
        validate_sale(&sale)?;
        Ok(self.queue_sale(sale))
    }

    fn queue_sale(&self, sale: SalePayload) -> String {
        let operation_id = self.queue.enqueue(OperationPayload::Sale(sale));
        self.notifier.publish(Notice::SavedLocally {
            operation_id: operation_id.clone(),
            kind: "sale".to_string(),
        });
        operation_id
    }
}

fn validate_sale(sale: &SalePayload) -> Result<()> {
    if sale.items.is_empty() {
        return Err(Error::InvalidPayload("Sale has no items".into()));
    }
    let computed = sale
        .computed_total()
        .ok_or_else(|| Error::InvalidPayload("Sale total is out of range".into()))?;
    if computed != sale.total {
        warn!(
            declared = sale.total,
            computed, "sale total differs from item sum; sending declared total"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::test_support::{sale, FakeBackend};

    fn service(online: bool) -> (SalesService, Arc<FakeBackend>, Arc<PendingQueue>, Notifier) {
        let backend = Arc::new(FakeBackend::default());
        let queue = Arc::new(PendingQueue::load(Arc::new(MemoryKvStore::new()), "queue"));
        let notifier = Notifier::new();
        let connectivity = Arc::new(ConnectivityMonitor::new(online, notifier.clone()));
        let svc = SalesService::new(backend.clone(), queue.clone(), connectivity, notifier.clone());
        (svc, backend, queue, notifier)
    }

    #[tokio::test]
    async fn online_success_is_sent_not_queued() {
        let (svc, backend, queue, _) = service(true);
        let outcome = svc.submit(sale(25_000)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Sent(Some(_))));
        assert!(queue.is_empty());
        assert_eq!(backend.sale_totals(), vec![25_000]);
    }

    #[tokio::test]
    async fn offline_sale_is_queued_with_notice() {
        let (svc, backend, queue, notifier) = service(false);
        let mut notices = notifier.subscribe();

        let outcome = svc.submit(sale(30_000)).await.unwrap();
        let SubmitOutcome::Queued(id) = outcome else {
            panic!("expected queued sale");
        };
        assert_eq!(queue.list()[0].id, id);
        assert!(backend.sale_calls.lock().unwrap().is_empty());
        assert!(matches!(
            notices.try_recv().unwrap(),
            Notice::SavedLocally { ref kind, .. } if kind == "sale"
        ));
    }

    #[tokio::test]
    async fn failed_remote_call_falls_back_to_queue() {
        let (svc, backend, queue, _) = service(true);
        backend.fail_all_sales(true);
        let outcome = svc.submit(sale(70_000)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.list()[0].retry_count, 0);
    }

    #[test]
    fn defer_rejects_empty_sale() {
        let (svc, _, queue, _) = service(true);
        let mut empty = sale(0);
        empty.items.clear();
        assert!(matches!(svc.defer(empty), Err(Error::InvalidPayload(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn oversized_sale_is_rejected_instead_of_overflowing() {
        let (svc, _, queue, _) = service(false);
        let mut huge = sale(0);
        huge.items[0].quantity = 4_000_000_000;
        huge.items[0].unit_price = 9_000_000_000_000;
        assert!(matches!(svc.defer(huge), Err(Error::InvalidPayload(_))));
        assert!(queue.is_empty());
    }
}
