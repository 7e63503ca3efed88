//! Runtime configuration.
//!
//! Connection details resolve from environment variables first, then from
//! the OS credential store. Tunables (retry ceiling, cache TTLs, probe
//! interval) live in the `local_settings` table so they can be changed on a
//! device without a rebuild; absent or invalid values fall back to the
//! defaults below.

use chrono::Duration;
use rusqlite::Connection;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::db;
use crate::error::{Error, Result};
use crate::storage;

pub const ENV_BACKEND_URL: &str = "GAS_POS_BACKEND_URL";
pub const ENV_API_KEY: &str = "GAS_POS_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "GAS_POS_ACCESS_TOKEN";
pub const ENV_DATA_DIR: &str = "GAS_POS_DATA_DIR";

pub use crate::sync::DEFAULT_MAX_RETRIES;
pub const DEFAULT_CUSTOMERS_TTL_SECS: i64 = 5 * 60;
pub const DEFAULT_PRICES_TTL_SECS: i64 = 10 * 60;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;
/// Upper bound for any cache TTL read from settings.
pub const MAX_CACHE_TTL_SECS: i64 = 30 * 24 * 60 * 60;

const APP_DIR_NAME: &str = "gas-vendor-pos";

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub probe_interval_secs: u64,
    pub assume_online_at_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            assume_online_at_start: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub customers_ttl: Duration,
    pub prices_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            customers_ttl: Duration::seconds(DEFAULT_CUSTOMERS_TTL_SECS),
            prices_ttl: Duration::seconds(DEFAULT_PRICES_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub backend_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
}

/// `{GAS_POS_DATA_DIR}` or the platform's local data directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = env_value(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Environment variable, then keyring entry.
fn credential(env_key: &str, keyring_key: &str) -> Option<String> {
    env_value(env_key).or_else(|| storage::get_credential(keyring_key))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn setting<T: FromStr>(conn: &Connection, category: &str, key: &str) -> Option<T> {
    let raw = db::get_setting(conn, category, key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(category, key, value = %raw, "ignoring invalid setting");
            None
        }
    }
}

pub fn load_sync_config(conn: &Connection) -> SyncConfig {
    let defaults = SyncConfig::default();
    SyncConfig {
        max_retries: setting::<u32>(conn, "sync", "max_retries")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.max_retries),
        probe_interval_secs: setting::<u64>(conn, "sync", "probe_interval_secs")
            .filter(|v| *v > 0)
            .unwrap_or(defaults.probe_interval_secs),
        assume_online_at_start: setting::<bool>(conn, "sync", "assume_online_at_start")
            .unwrap_or(defaults.assume_online_at_start),
    }
}

/// Positive TTL in seconds, capped at [`MAX_CACHE_TTL_SECS`].
fn ttl_setting(conn: &Connection, key: &str) -> Option<Duration> {
    let secs = setting::<i64>(conn, "cache", key).filter(|v| *v > 0)?;
    if secs > MAX_CACHE_TTL_SECS {
        warn!(key, secs, max = MAX_CACHE_TTL_SECS, "cache TTL too large, capping");
    }
    Duration::try_seconds(secs.min(MAX_CACHE_TTL_SECS))
}

pub fn load_cache_config(conn: &Connection) -> CacheConfig {
    let defaults = CacheConfig::default();
    CacheConfig {
        customers_ttl: ttl_setting(conn, "customers_ttl_secs").unwrap_or(defaults.customers_ttl),
        prices_ttl: ttl_setting(conn, "prices_ttl_secs").unwrap_or(defaults.prices_ttl),
    }
}

impl AppConfig {
    /// Resolve the full configuration. Fails only when no backend URL is
    /// known from either the environment or the credential store.
    pub fn load(data_dir: PathBuf, conn: &Connection) -> Result<Self> {
        let backend_url = credential(ENV_BACKEND_URL, storage::KEY_BACKEND_URL).ok_or_else(|| {
            Error::Config(format!(
                "backend URL not configured (set {ENV_BACKEND_URL} or store it in the keyring)"
            ))
        })?;

        Ok(Self {
            data_dir,
            backend_url,
            api_key: credential(ENV_API_KEY, storage::KEY_API_KEY),
            access_token: credential(ENV_ACCESS_TOKEN, storage::KEY_ACCESS_TOKEN),
            sync: load_sync_config(conn),
            cache: load_cache_config(conn),
        })
    }
}
