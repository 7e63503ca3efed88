//! Gas Vendor POS - offline-first core
//!
//! Lets a field vendor keep recording cylinder sales and customer changes
//! with no connectivity. Writes that cannot reach the backend are queued
//! locally and replayed in order once the network returns; customer and
//! price lists are served from a local read-through cache.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod customers;
pub mod db;
pub mod error;
pub mod kv;
pub mod logging;
pub mod models;
pub mod notify;
pub mod prices;
pub mod queue;
pub mod sales;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod test_support;

use api::{Backend, HttpBackend};
use config::AppConfig;
use connectivity::ConnectivityMonitor;
use customers::CustomerDirectory;
use db::DbState;
use kv::{KvStore, SqliteKvStore};
use notify::Notifier;
use prices::PriceBook;
use queue::PendingQueue;
use sales::SalesService;
use sync::SyncEngine;

/// Every long-lived service of the POS, wired together.
pub struct AppServices {
    pub config: AppConfig,
    pub db: Arc<DbState>,
    pub notifier: Notifier,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub queue: Arc<PendingQueue>,
    pub customers: Arc<CustomerDirectory>,
    pub prices: Arc<PriceBook>,
    pub sales: Arc<SalesService>,
    pub sync: Arc<SyncEngine>,
    backend: Arc<dyn Backend>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AppServices {
    /// Open the database under `data_dir`, resolve configuration and connect
    /// the HTTP backend.
    pub fn init(data_dir: std::path::PathBuf) -> error::Result<Self> {
        let db = Arc::new(db::init(&data_dir)?);
        let config = {
            let conn = db.conn.lock()?;
            AppConfig::load(data_dir, &conn)?
        };
        let backend = HttpBackend::new(
            &config.backend_url,
            config.api_key.clone(),
            config.access_token.clone(),
        )?;
        Ok(Self::build(config, db, Arc::new(backend)))
    }

    pub fn build(config: AppConfig, db: Arc<DbState>, backend: Arc<dyn Backend>) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(db.clone()));
        let notifier = Notifier::new();
        let connectivity = Arc::new(ConnectivityMonitor::new(
            config.sync.assume_online_at_start,
            notifier.clone(),
        ));
        let queue = Arc::new(PendingQueue::load(store.clone(), queue::DEFAULT_QUEUE_KEY));

        let customer_cache = Arc::new(customers::customer_cache(
            store.clone(),
            backend.clone(),
            config.cache.customers_ttl,
        ));
        let price_cache = Arc::new(prices::price_cache(
            store,
            backend.clone(),
            config.cache.prices_ttl,
        ));

        let customers = Arc::new(CustomerDirectory::new(
            customer_cache.clone(),
            backend.clone(),
            queue.clone(),
            connectivity.clone(),
            notifier.clone(),
        ));
        let prices = Arc::new(PriceBook::new(price_cache));
        let sales = Arc::new(SalesService::new(
            backend.clone(),
            queue.clone(),
            connectivity.clone(),
            notifier.clone(),
        ));
        let sync = Arc::new(
            SyncEngine::new(
                queue.clone(),
                backend.clone(),
                connectivity.clone(),
                notifier.clone(),
                config.sync.max_retries,
            )
            .with_customer_cache(customer_cache),
        );

        info!(
            pending = queue.len(),
            max_retries = config.sync.max_retries,
            "services initialised"
        );

        Self {
            config,
            db,
            notifier,
            connectivity,
            queue,
            customers,
            prices,
            sales,
            sync,
            backend,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Spawn the background loops and warm both caches.
    pub fn start(&mut self) {
        let interval = std::time::Duration::from_secs(self.config.sync.probe_interval_secs);
        self.tasks.push(connectivity::start_probe_loop(
            self.connectivity.clone(),
            self.backend.clone(),
            interval,
            self.shutdown.clone(),
        ));
        self.tasks
            .push(sync::start_sync_loop(self.sync.clone(), self.shutdown.clone()));

        let customers = self.customers.clone();
        let prices = self.prices.clone();
        self.tasks.push(tokio::spawn(async move {
            let (c, p) = tokio::join!(customers.refresh(), prices.refresh());
            info!(customers = ?c, prices = ?p, "initial cache load finished");
        }));
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop background loops and wait for them to finish.
    pub async fn teardown(mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {e}");
            }
        }
        let pending = self.queue.len();
        if pending > 0 {
            info!(pending, "shutting down with operations still queued");
        }
    }
}

// ============================================================================
// App entry point
// ============================================================================

const USAGE: &str = "usage: gas-vendor-pos [configure <backend-url> [api-key] | reset]";

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the POS services until ctrl-c.
    Run,
    /// Store the backend connection in the OS keyring.
    Configure {
        backend_url: String,
        api_key: Option<String>,
    },
    /// Delete every stored credential.
    Reset,
}

impl Command {
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            None => Command::Run,
            Some("configure") => {
                let backend_url = args
                    .next()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| anyhow::anyhow!("missing backend URL\n{USAGE}"))?;
                Command::Configure {
                    backend_url: api::normalize_base_url(&backend_url),
                    api_key: args.next(),
                }
            }
            Some("reset") => Command::Reset,
            Some(other) => anyhow::bail!("unknown command `{other}`\n{USAGE}"),
        };
        if let Some(extra) = args.next() {
            anyhow::bail!("unexpected argument `{extra}`\n{USAGE}");
        }
        Ok(command)
    }
}

pub fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => run(),
        Command::Configure {
            backend_url,
            api_key,
        } => {
            storage::set_credential(storage::KEY_BACKEND_URL, &backend_url)?;
            if let Some(key) = api_key {
                storage::set_credential(storage::KEY_API_KEY, key.trim())?;
            }
            println!("Backend configurado: {backend_url}");
            Ok(())
        }
        Command::Reset => {
            storage::factory_reset()?;
            println!("Credenciales eliminadas");
            Ok(())
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let data_dir = config::resolve_data_dir();
    let _log_guard = logging::init(&logging::log_dir(&data_dir))?;

    info!(
        "Starting Gas Vendor POS v{} ({} built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_SHA"),
        env!("BUILD_TIMESTAMP")
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut services = AppServices::init(data_dir)?;
        services.start();

        let mut notices = services.notifier.subscribe();
        let shutdown = services.shutdown_token();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = shutdown.cancelled() => break,
                notice = notices.recv() => match notice {
                    Ok(notice) => println!("{}", notice.message()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "notice listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        services.teardown().await;
        Ok::<_, anyhow::Error>(())
    })
}
