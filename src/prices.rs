//! Price list cache.
//!
//! Unlike the customer list, prices never come back empty: when the backend
//! has never been reached the built-in table is served so a sale can still
//! be priced.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

use crate::api::Backend;
use crate::cache::{CachePolicy, CacheSource, Fallback, ReadThroughCache, RefreshOutcome};
use crate::error::Result;
use crate::kv::KvStore;
use crate::models::{default_price_table, Customer, PriceTable, ProductType};

pub const PRICES_CACHE_KEY: &str = "prices_cache";
pub const PRICES_CACHE_EXPIRY_KEY: &str = "prices_cache_expiry";

pub type PriceCache = ReadThroughCache<PriceTable>;

struct PriceListSource {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl CacheSource<PriceTable> for PriceListSource {
    async fn fetch(&self) -> Result<PriceTable> {
        self.backend.fetch_prices().await
    }
}

pub fn price_cache(store: Arc<dyn KvStore>, backend: Arc<dyn Backend>, ttl: Duration) -> PriceCache {
    ReadThroughCache::new(
        "prices",
        store,
        Arc::new(PriceListSource { backend }),
        CachePolicy {
            data_key: PRICES_CACHE_KEY.to_string(),
            expiry_key: PRICES_CACHE_EXPIRY_KEY.to_string(),
            ttl,
            fallback: Fallback::Default(default_price_table()),
        },
    )
}

pub struct PriceBook {
    cache: Arc<PriceCache>,
}

impl PriceBook {
    pub fn new(cache: Arc<PriceCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn prices(&self) -> PriceTable {
        self.cache.get()
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.cache.refresh().await
    }

    /// Unit price for a product, preferring the customer's negotiated price.
    pub fn price_for(&self, product: ProductType, customer: Option<&Customer>) -> Option<i64> {
        customer
            .and_then(|c| c.custom_prices.as_ref())
            .and_then(|custom| custom.get(&product).copied())
            .or_else(|| self.cache.get().get(&product).copied())
    }
}
