//! Read-through cache with a fixed TTL and stale fallback.
//!
//! Each instance persists two keys through the [`KvStore`] port: the data
//! blob (`{items, fetched_at}`) and its expiry timestamp. A refresh always
//! prefers the backend; persisted data is only served when the fetch fails
//! and nothing is loaded in memory yet, and only while it is unexpired.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::kv::{self, KvStore};

pub trait CacheData: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn is_empty(&self) -> bool;
}

impl<T> CacheData for Vec<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl<K, V> CacheData for BTreeMap<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

/// Where fresh data comes from.
#[async_trait]
pub trait CacheSource<V>: Send + Sync {
    async fn fetch(&self) -> Result<V>;
}

/// What to serve when the backend fails and no valid persisted entry exists.
#[derive(Debug, Clone)]
pub enum Fallback<V> {
    Empty,
    Default(V),
}

#[derive(Debug, Clone)]
pub struct CachePolicy<V> {
    pub data_key: String,
    pub expiry_key: String,
    pub ttl: Duration,
    pub fallback: Fallback<V>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub items: V,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Backend answered; state replaced and persisted.
    Fresh,
    /// Backend failed; an unexpired persisted entry was loaded.
    Stale,
    /// Backend failed with nothing usable persisted; fallback applied.
    Fallback,
    /// Backend failed while data was already loaded; state left untouched.
    Kept,
}

struct CacheState<V> {
    items: V,
    offline: bool,
    last_updated: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

pub struct ReadThroughCache<V: CacheData> {
    name: &'static str,
    store: Arc<dyn KvStore>,
    source: Arc<dyn CacheSource<V>>,
    policy: CachePolicy<V>,
    state: RwLock<CacheState<V>>,
}

impl<V: CacheData> ReadThroughCache<V> {
    pub fn new(
        name: &'static str,
        store: Arc<dyn KvStore>,
        source: Arc<dyn CacheSource<V>>,
        policy: CachePolicy<V>,
    ) -> Self {
        Self {
            name,
            store,
            source,
            policy,
            state: RwLock::new(CacheState {
                items: V::default(),
                offline: false,
                last_updated: None,
                expires_at: None,
            }),
        }
    }

    /// Current in-memory data. Empty until the first refresh completes.
    pub fn get(&self) -> V {
        self.read_state().items.clone()
    }

    pub fn is_offline(&self) -> bool {
        self.read_state().offline
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.read_state().last_updated
    }

    pub fn ttl(&self) -> Duration {
        self.policy.ttl
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        let fetched = self.source.fetch().await;

        match fetched {
            Ok(items) => {
                let now = Utc::now();
                let expires_at = self.expiry_after(now);
                self.persist(&items, now, expires_at);

                let mut state = self.write_state();
                state.items = items;
                state.offline = false;
                state.last_updated = Some(now);
                state.expires_at = Some(expires_at);
                debug!(cache = self.name, %expires_at, "cache refreshed");
                RefreshOutcome::Fresh
            }
            Err(e) => {
                warn!(cache = self.name, error = %e, "cache refresh failed");
                let mut state = self.write_state();
                state.offline = true;

                if !state.items.is_empty() {
                    return RefreshOutcome::Kept;
                }

                if let Some((entry, expires_at)) = self.load_valid_entry() {
                    info!(cache = self.name, fetched_at = %entry.fetched_at, "serving persisted cache");
                    state.items = entry.items;
                    state.last_updated = Some(entry.fetched_at);
                    state.expires_at = Some(expires_at);
                    return RefreshOutcome::Stale;
                }

                if let Fallback::Default(defaults) = &self.policy.fallback {
                    info!(cache = self.name, "no usable cache, serving defaults");
                    state.items = defaults.clone();
                }
                RefreshOutcome::Fallback
            }
        }
    }

    /// Apply a local-only change and persist it immediately. The backend is
    /// not contacted.
    pub fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut V),
    {
        let mut state = self.write_state();
        f(&mut state.items);

        let now = Utc::now();
        let expires_at = match state.expires_at {
            Some(at) => at,
            None => {
                let at = self.expiry_after(now);
                state.expires_at = Some(at);
                at
            }
        };
        let fetched_at = state.last_updated.unwrap_or(now);
        self.persist(&state.items, fetched_at, expires_at);
    }

    /// Drop the persisted entry. In-memory data stays until the next refresh.
    pub fn invalidate(&self) {
        for key in [&self.policy.data_key, &self.policy.expiry_key] {
            if let Err(e) = self.store.remove(key) {
                error!(cache = self.name, key = %key, error = %e, "failed to remove cache key");
            }
        }
        self.write_state().expires_at = None;
    }

    pub fn persisted_expiry(&self) -> Option<DateTime<Utc>> {
        kv::read_json::<DateTime<Utc>>(self.store.as_ref(), &self.policy.expiry_key)
            .ok()
            .flatten()
    }

    fn load_valid_entry(&self) -> Option<(CacheEntry<V>, DateTime<Utc>)> {
        let expires_at = self.persisted_expiry()?;
        if Utc::now() >= expires_at {
            debug!(cache = self.name, %expires_at, "persisted cache expired");
            return None;
        }
        let entry = kv::read_json::<CacheEntry<V>>(self.store.as_ref(), &self.policy.data_key)
            .ok()
            .flatten()?;
        Some((entry, expires_at))
    }

    fn persist(&self, items: &V, fetched_at: DateTime<Utc>, expires_at: DateTime<Utc>) {
        let entry = CacheEntry {
            items: items.clone(),
            fetched_at,
        };
        let result = kv::write_json(self.store.as_ref(), &self.policy.data_key, &entry)
            .and_then(|_| kv::write_json(self.store.as_ref(), &self.policy.expiry_key, &expires_at));
        if let Err(e) = result {
            error!(cache = self.name, error = %e, "failed to persist cache entry");
        }
    }

    /// `now + ttl`; a TTL that overflows the calendar expires immediately.
    fn expiry_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.policy.ttl).unwrap_or_else(|| {
            warn!(cache = self.name, "cache TTL out of range, entry expires immediately");
            now
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState<V>> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState<V>> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::kv::MemoryKvStore;
    use std::sync::Mutex;

    /// Source returning scripted results; `None` means a network failure.
    struct ScriptedSource {
        next: Mutex<Option<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(next: Option<Vec<String>>) -> Arc<Self> {
            Arc::new(Self {
                next: Mutex::new(next),
            })
        }

        fn set(&self, next: Option<Vec<String>>) {
            *self.next.lock().unwrap() = next;
        }
    }

    #[async_trait]
    impl CacheSource<Vec<String>> for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<String>> {
            self.next
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Network("offline".into()))
        }
    }

    fn policy(fallback: Fallback<Vec<String>>) -> CachePolicy<Vec<String>> {
        CachePolicy {
            data_key: "names".into(),
            expiry_key: "names_expiry".into(),
            ttl: Duration::minutes(5),
            fallback,
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn refresh_success_sets_expiry_after_completion() {
        let store = Arc::new(MemoryKvStore::new());
        let source = ScriptedSource::new(Some(names(&["a", "b"])));
        let cache = ReadThroughCache::new("names", store, source, policy(Fallback::Empty));

        assert!(cache.get().is_empty());
        assert_eq!(cache.refresh().await, RefreshOutcome::Fresh);
        let completed = Utc::now();

        assert_eq!(cache.get(), names(&["a", "b"]));
        assert!(!cache.is_offline());
        let expiry = cache.persisted_expiry().expect("expiry persisted");
        assert!(expiry > cache.last_updated().unwrap());
        assert!(expiry > completed);
        assert!(expiry <= completed + Duration::minutes(5));
    }

    #[tokio::test]
    async fn out_of_range_ttl_expires_immediately_instead_of_panicking() {
        let store = Arc::new(MemoryKvStore::new());
        let source = ScriptedSource::new(Some(names(&["a"])));
        let mut huge = policy(Fallback::Empty);
        huge.ttl = Duration::MAX;
        let cache = ReadThroughCache::new("names", store, source, huge);

        assert_eq!(cache.refresh().await, RefreshOutcome::Fresh);
        assert_eq!(cache.persisted_expiry(), cache.last_updated());
        cache.mutate(|items| items.push("b".into()));
        assert_eq!(cache.get(), names(&["a", "b"]));
    }

    #[tokio::test]
    async fn failure_on_first_load_serves_unexpired_persisted_entry() {
        let store = Arc::new(MemoryKvStore::new());
        let warm = ReadThroughCache::new(
            "names",
            store.clone(),
            ScriptedSource::new(Some(names(&["persisted"]))),
            policy(Fallback::Empty),
        );
        warm.refresh().await;

        let cold = ReadThroughCache::new(
            "names",
            store,
            ScriptedSource::new(None),
            policy(Fallback::Empty),
        );
        assert_eq!(cold.refresh().await, RefreshOutcome::Stale);
        assert_eq!(cold.get(), names(&["persisted"]));
        assert!(cold.is_offline());
    }

    #[tokio::test]
    async fn failure_ignores_expired_persisted_entry() {
        let store = Arc::new(MemoryKvStore::new());
        kv::write_json(
            store.as_ref(),
            "names",
            &CacheEntry {
                items: names(&["old"]),
                fetched_at: Utc::now() - Duration::minutes(20),
            },
        )
        .unwrap();
        kv::write_json(
            store.as_ref(),
            "names_expiry",
            &(Utc::now() - Duration::minutes(15)),
        )
        .unwrap();

        let cache = ReadThroughCache::new(
            "names",
            store,
            ScriptedSource::new(None),
            policy(Fallback::Default(names(&["default"]))),
        );
        assert_eq!(cache.refresh().await, RefreshOutcome::Fallback);
        assert_eq!(cache.get(), names(&["default"]));
    }

    #[tokio::test]
    async fn failure_with_loaded_data_keeps_it_and_flags_offline() {
        let source = ScriptedSource::new(Some(names(&["live"])));
        let cache = ReadThroughCache::new(
            "names",
            Arc::new(MemoryKvStore::new()),
            source.clone(),
            policy(Fallback::Default(names(&["default"]))),
        );
        cache.refresh().await;

        source.set(None);
        assert_eq!(cache.refresh().await, RefreshOutcome::Kept);
        assert_eq!(cache.get(), names(&["live"]));
        assert!(cache.is_offline());

        source.set(Some(names(&["newer"])));
        assert_eq!(cache.refresh().await, RefreshOutcome::Fresh);
        assert_eq!(cache.get(), names(&["newer"]));
        assert!(!cache.is_offline());
    }

    #[tokio::test]
    async fn mutate_is_visible_and_persisted_without_refresh() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = ReadThroughCache::new(
            "names",
            store.clone(),
            ScriptedSource::new(None),
            policy(Fallback::Empty),
        );
        cache.mutate(|items| items.push("added".into()));
        assert_eq!(cache.get(), names(&["added"]));

        let entry: CacheEntry<Vec<String>> = kv::read_json(store.as_ref(), "names")
            .unwrap()
            .expect("entry persisted");
        assert_eq!(entry.items, names(&["added"]));
        assert!(cache.persisted_expiry().unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn invalidate_removes_persisted_keys() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = ReadThroughCache::new(
            "names",
            store.clone(),
            ScriptedSource::new(Some(names(&["x"]))),
            policy(Fallback::Empty),
        );
        cache.refresh().await;
        cache.invalidate();
        assert!(cache.persisted_expiry().is_none());
        assert!(store.get("names").unwrap().is_none());
        assert_eq!(cache.get(), names(&["x"]));
    }
}
