//! Customer list cache and the customer directory used by the sales screens.
//!
//! Writes go to the backend first; when that fails the change is queued for
//! replay and a provisional record (`local-<operation id>`) is shown in the
//! cached list right away.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::cache::{CachePolicy, CacheSource, Fallback, ReadThroughCache, RefreshOutcome};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::kv::KvStore;
use crate::models::{Customer, CustomerDraft, OperationPayload, LOCAL_ID_PREFIX};
use crate::notify::{Notice, Notifier};
use crate::queue::PendingQueue;

pub const CUSTOMERS_CACHE_KEY: &str = "customers_cache";
pub const CUSTOMERS_CACHE_EXPIRY_KEY: &str = "customers_cache_expiry";

pub type CustomerCache = ReadThroughCache<Vec<Customer>>;

struct CustomerListSource {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl CacheSource<Vec<Customer>> for CustomerListSource {
    async fn fetch(&self) -> Result<Vec<Customer>> {
        self.backend.search_customers("").await
    }
}

/// Customer list cache; an empty list is served when nothing usable exists.
pub fn customer_cache(
    store: Arc<dyn KvStore>,
    backend: Arc<dyn Backend>,
    ttl: Duration,
) -> CustomerCache {
    ReadThroughCache::new(
        "customers",
        store,
        Arc::new(CustomerListSource { backend }),
        CachePolicy {
            data_key: CUSTOMERS_CACHE_KEY.to_string(),
            expiry_key: CUSTOMERS_CACHE_EXPIRY_KEY.to_string(),
            ttl,
            fallback: Fallback::Empty,
        },
    )
}

pub fn provisional_id(operation_id: &str) -> String {
    format!("{LOCAL_ID_PREFIX}{operation_id}")
}

/// Insert or replace by id.
pub fn upsert_cached(cache: &CustomerCache, customer: Customer) {
    cache.mutate(|items| match items.iter_mut().find(|c| c.id == customer.id) {
        Some(existing) => *existing = customer,
        None => items.push(customer),
    });
}

/// Swap the provisional record created for `operation_id` with the one the
/// backend returned.
pub fn replace_provisional(cache: &CustomerCache, operation_id: &str, customer: Customer) {
    let local_id = provisional_id(operation_id);
    cache.mutate(|items| {
        items.retain(|c| c.id != local_id && c.id != customer.id);
        items.push(customer);
    });
}

#[derive(Debug, Clone, PartialEq)]
pub enum CustomerWriteOutcome {
    Saved(Customer),
    Queued {
        operation_id: String,
        customer: Customer,
    },
}

impl CustomerWriteOutcome {
    pub fn customer(&self) -> &Customer {
        match self {
            CustomerWriteOutcome::Saved(c) => c,
            CustomerWriteOutcome::Queued { customer, .. } => customer,
        }
    }
}

pub struct CustomerDirectory {
    cache: Arc<CustomerCache>,
    backend: Arc<dyn Backend>,
    queue: Arc<PendingQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    notifier: Notifier,
}

impl CustomerDirectory {
    pub fn new(
        cache: Arc<CustomerCache>,
        backend: Arc<dyn Backend>,
        queue: Arc<PendingQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            cache,
            backend,
            queue,
            connectivity,
            notifier,
        }
    }

    pub fn cache(&self) -> &Arc<CustomerCache> {
        &self.cache
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.cache.get()
    }

    /// Reload from the backend. Writes still waiting in the queue are laid
    /// back over a fresh list so they stay visible until they replay.
    pub async fn refresh(&self) -> RefreshOutcome {
        let outcome = self.cache.refresh().await;
        if outcome == RefreshOutcome::Fresh {
            self.reapply_pending();
        }
        outcome
    }

    fn reapply_pending(&self) {
        for op in self.queue.list() {
            match op.payload {
                OperationPayload::CustomerCreate(draft) => {
                    upsert_cached(&self.cache, draft.into_customer(provisional_id(&op.id)));
                }
                OperationPayload::CustomerUpdate { id, draft } => {
                    let customer = self.merged(&id, &draft);
                    self.update(customer);
                }
                OperationPayload::Sale(_) => {}
            }
        }
    }

    /// Show a just-created record without waiting for a refresh.
    pub fn add(&self, customer: Customer) {
        upsert_cached(&self.cache, customer);
    }

    /// Replace a cached record. Returns `false` when the id is not cached.
    pub fn update(&self, customer: Customer) -> bool {
        let mut found = false;
        self.cache.mutate(|items| {
            if let Some(existing) = items.iter_mut().find(|c| c.id == customer.id) {
                *existing = customer;
                found = true;
            }
        });
        found
    }

    pub fn find(&self, id: &str) -> Option<Customer> {
        self.cache.get().into_iter().find(|c| c.id == id)
    }

    /// Search by name on the backend, or in the cached list when the
    /// backend cannot be reached.
    pub async fn search(&self, name: &str) -> Vec<Customer> {
        if self.connectivity.current() {
            match self.backend.search_customers(name.trim()).await {
                Ok(found) => return found,
                Err(e) => warn!(error = %e, "customer search failed, using cache"),
            }
        }
        self.search_cached(name)
    }

    pub fn search_cached(&self, name: &str) -> Vec<Customer> {
        let needle = name.trim().to_lowercase();
        self.cache
            .get()
            .into_iter()
            .filter(|c| needle.is_empty() || c.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub async fn create(&self, draft: CustomerDraft) -> Result<CustomerWriteOutcome> {
        validate_draft(&draft)?;

        if self.connectivity.current() {
            match self.backend.create_customer(&draft).await {
                Ok(Some(customer)) => {
                    info!(customer_id = %customer.id, "customer created");
                    self.add(customer.clone());
                    return Ok(CustomerWriteOutcome::Saved(customer));
                }
                Ok(None) => {
                    // Created but not echoed back; reload to learn its id.
                    debug!("customer created without returned record, refreshing list");
                    self.cache.refresh().await;
                    let customer = self
                        .cache
                        .get()
                        .into_iter()
                        .rev()
                        .find(|c| c.name == draft.name)
                        .ok_or_else(|| {
                            Error::remote(
                                None,
                                "Customer was created but the backend did not return it",
                            )
                        })?;
                    return Ok(CustomerWriteOutcome::Saved(customer));
                }
                Err(e) => warn!(error = %e, "customer create failed, queueing"),
            }
        }

        let operation_id = self
            .queue
            .enqueue(OperationPayload::CustomerCreate(draft.clone()));
        let customer = draft.into_customer(provisional_id(&operation_id));
        self.add(customer.clone());
        self.notifier.publish(Notice::SavedLocally {
            operation_id: operation_id.clone(),
            kind: "customer_create".to_string(),
        });
        Ok(CustomerWriteOutcome::Queued {
            operation_id,
            customer,
        })
    }

    pub async fn update_remote(&self, id: &str, draft: CustomerDraft) -> Result<CustomerWriteOutcome> {
        validate_draft(&draft)?;
        if id.trim().is_empty() {
            return Err(Error::InvalidPayload("Missing customer id".into()));
        }
        if let Some(operation_id) = id.strip_prefix(LOCAL_ID_PREFIX) {
            return self.amend_pending_create(operation_id, id, draft);
        }

        if self.connectivity.current() {
            match self.backend.update_customer(id, &draft).await {
                Ok(returned) => {
                    let customer = returned.unwrap_or_else(|| self.merged(id, &draft));
                    upsert_cached(&self.cache, customer.clone());
                    return Ok(CustomerWriteOutcome::Saved(customer));
                }
                Err(e) => warn!(customer_id = id, error = %e, "customer update failed, queueing"),
            }
        }

        let operation_id = self.queue.enqueue(OperationPayload::CustomerUpdate {
            id: id.to_string(),
            draft: draft.clone(),
        });
        let customer = self.merged(id, &draft);
        upsert_cached(&self.cache, customer.clone());
        self.notifier.publish(Notice::SavedLocally {
            operation_id: operation_id.clone(),
            kind: "customer_update".to_string(),
        });
        Ok(CustomerWriteOutcome::Queued {
            operation_id,
            customer,
        })
    }

    /// A customer that only exists locally has no backend id to update yet,
    /// so the edit is folded into its queued create.
    fn amend_pending_create(
        &self,
        operation_id: &str,
        id: &str,
        draft: CustomerDraft,
    ) -> Result<CustomerWriteOutcome> {
        let pending_create = self
            .queue
            .get(operation_id)
            .filter(|op| matches!(op.payload, OperationPayload::CustomerCreate(_)));
        if pending_create.is_none() {
            return Err(Error::InvalidPayload(format!(
                "Customer {id} is no longer pending; reload the customer list"
            )));
        }

        self.queue
            .replace_payload(operation_id, OperationPayload::CustomerCreate(draft.clone()));
        let customer = self.merged(id, &draft);
        upsert_cached(&self.cache, customer.clone());
        debug!(operation_id, "pending customer create amended");
        self.notifier.publish(Notice::SavedLocally {
            operation_id: operation_id.to_string(),
            kind: "customer_update".to_string(),
        });
        Ok(CustomerWriteOutcome::Queued {
            operation_id: operation_id.to_string(),
            customer,
        })
    }

    /// Apply a draft on top of the cached record, keeping its creation time.
    fn merged(&self, id: &str, draft: &CustomerDraft) -> Customer {
        let created_at = self.find(id).and_then(|c| c.created_at);
        let mut customer = draft.clone().into_customer(id.to_string());
        customer.created_at = created_at;
        customer
    }
}

fn validate_draft(draft: &CustomerDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(Error::InvalidPayload("Customer name is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::test_support::{customer, draft, FakeBackend};

    struct Fixture {
        backend: Arc<FakeBackend>,
        queue: Arc<PendingQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        directory: CustomerDirectory,
    }

    fn fixture(online: bool) -> Fixture {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let backend = Arc::new(FakeBackend::default());
        let notifier = Notifier::new();
        let queue = Arc::new(PendingQueue::load(store.clone(), "queue"));
        let connectivity = Arc::new(ConnectivityMonitor::new(online, notifier.clone()));
        let cache = Arc::new(customer_cache(
            store,
            backend.clone(),
            Duration::minutes(5),
        ));
        let directory = CustomerDirectory::new(
            cache,
            backend.clone(),
            queue.clone(),
            connectivity.clone(),
            notifier,
        );
        Fixture {
            backend,
            queue,
            connectivity,
            directory,
        }
    }

    #[tokio::test]
    async fn first_load_failure_without_cache_is_empty_and_offline() {
        let fx = fixture(true);
        fx.backend.set_customers(None);
        assert_eq!(fx.directory.refresh().await, RefreshOutcome::Fallback);
        assert!(fx.directory.customers().is_empty());
        assert!(fx.directory.cache().is_offline());
    }

    #[test]
    fn add_is_visible_without_refresh() {
        let fx = fixture(false);
        fx.directory.add(customer("c-9", "Asadero El Llano"));
        assert_eq!(fx.directory.customers(), vec![customer("c-9", "Asadero El Llano")]);
    }

    #[test]
    fn update_replaces_only_existing_records() {
        let fx = fixture(false);
        fx.directory.add(customer("c-1", "Old name"));
        assert!(fx.directory.update(customer("c-1", "New name")));
        assert!(!fx.directory.update(customer("c-2", "Ghost")));
        assert_eq!(fx.directory.customers(), vec![customer("c-1", "New name")]);
    }

    #[tokio::test]
    async fn search_falls_back_to_cache_when_backend_fails() {
        let fx = fixture(true);
        fx.directory.add(customer("c-1", "Hotel Los Andes"));
        fx.directory.add(customer("c-2", "Lavandería Andina"));
        fx.backend.set_customers(None);

        let found = fx.directory.search("ANDES").await;
        assert_eq!(found, vec![customer("c-1", "Hotel Los Andes")]);
    }

    #[tokio::test]
    async fn search_uses_backend_when_online() {
        let fx = fixture(true);
        fx.backend
            .set_customers(Some(vec![customer("srv-1", "Comidas Rápidas Mary")]));
        let found = fx.directory.search("mary").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "srv-1");
    }

    #[tokio::test]
    async fn create_online_saves_and_caches_server_record() {
        let fx = fixture(true);
        let outcome = fx.directory.create(draft("Tienda Doña Rosa")).await.unwrap();
        assert!(matches!(outcome, CustomerWriteOutcome::Saved(_)));
        assert_eq!(outcome.customer().id, "srv-1");
        assert_eq!(fx.directory.customers().len(), 1);
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn create_offline_queues_and_shows_provisional_record() {
        let fx = fixture(false);
        let outcome = fx.directory.create(draft("Finca La Palma")).await.unwrap();

        let CustomerWriteOutcome::Queued {
            operation_id,
            customer,
        } = outcome
        else {
            panic!("expected queued outcome");
        };
        assert!(customer.is_provisional());
        assert_eq!(customer.id, provisional_id(&operation_id));
        assert_eq!(fx.directory.customers(), vec![customer]);

        let queued = fx.queue.list();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload.kind(), "customer_create");
        assert!(fx.backend.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_remote_failure_queues_and_updates_cache() {
        let fx = fixture(true);
        fx.directory.add(customer("c-4", "Before"));
        fx.backend.fail_customer_writes(true);

        let outcome = fx
            .directory
            .update_remote("c-4", draft("After"))
            .await
            .unwrap();
        assert!(matches!(outcome, CustomerWriteOutcome::Queued { .. }));
        assert_eq!(fx.directory.find("c-4").unwrap().name, "After");
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.connectivity.current());
    }

    #[tokio::test]
    async fn create_rejects_blank_name() {
        let fx = fixture(true);
        let err = fx.directory.create(draft("   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn create_acknowledged_without_record_and_not_listed_is_an_error() {
        let fx = fixture(true);
        fx.backend.silent_creates(true);
        fx.backend.set_customers(Some(vec![customer("srv-3", "Otro Cliente")]));

        let err = fx.directory.create(draft("Asadero Nuevo")).await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: None, .. }));
        assert!(fx.directory.customers().iter().all(|c| !c.id.is_empty()));
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn create_acknowledged_without_record_is_found_after_refresh() {
        let fx = fixture(true);
        fx.backend.silent_creates(true);
        fx.backend.set_customers(Some(vec![customer("srv-8", "Asadero Nuevo")]));

        let outcome = fx.directory.create(draft("Asadero Nuevo")).await.unwrap();
        assert_eq!(outcome, CustomerWriteOutcome::Saved(customer("srv-8", "Asadero Nuevo")));
    }

    #[tokio::test]
    async fn fresh_refresh_keeps_pending_local_records() {
        let fx = fixture(false);
        let queued = fx.directory.create(draft("Finca La Palma")).await.unwrap();
        let local = queued.customer().clone();

        fx.backend.set_customers(Some(vec![customer("srv-5", "Hotel Central")]));
        assert_eq!(fx.directory.refresh().await, RefreshOutcome::Fresh);

        let ids: Vec<String> = fx.directory.customers().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["srv-5".to_string(), local.id]);
    }

    #[tokio::test]
    async fn editing_a_local_customer_amends_its_queued_create() {
        let fx = fixture(false);
        let queued = fx.directory.create(draft("Finca")).await.unwrap();
        let local_id = queued.customer().id.clone();

        let outcome = fx
            .directory
            .update_remote(&local_id, draft("Finca Renamed"))
            .await
            .unwrap();
        assert_eq!(outcome.customer().id, local_id);

        let ops = fx.queue.list();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0].payload,
            OperationPayload::CustomerCreate(d) if d.name == "Finca Renamed"
        ));
        assert_eq!(fx.directory.find(&local_id).unwrap().name, "Finca Renamed");
    }

    #[tokio::test]
    async fn editing_a_local_customer_without_pending_create_is_rejected() {
        let fx = fixture(true);
        let err = fx
            .directory
            .update_remote(&provisional_id("gone"), draft("Nadie"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
        assert!(fx.backend.updated.lock().unwrap().is_empty());
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn replace_provisional_swaps_local_record() {
        let fx = fixture(false);
        fx.directory.add(customer(&provisional_id("op-1"), "Finca La Palma"));
        replace_provisional(fx.directory.cache(), "op-1", customer("srv-7", "Finca La Palma"));
        assert_eq!(
            fx.directory.customers(),
            vec![customer("srv-7", "Finca La Palma")]
        );
    }
}
