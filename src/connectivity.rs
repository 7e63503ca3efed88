//! Connectivity monitor.
//!
//! Holds the last observed network state in a `watch` channel so the sync
//! loop can react to transitions without polling. The host feeds it through
//! [`ConnectivityMonitor::report`]; on a desktop or CLI host that signal
//! comes from [`start_probe_loop`], which health-checks the backend.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::Backend;
use crate::notify::{Notice, Notifier};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn from_online(online: bool) -> Self {
        if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }
}

pub struct ConnectivityMonitor {
    tx: watch::Sender<NetworkStatus>,
    notifier: Notifier,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, notifier: Notifier) -> Self {
        let (tx, _) = watch::channel(NetworkStatus::from_online(initially_online));
        Self { tx, notifier }
    }

    pub fn current(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// Receivers only wake on actual transitions.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// Record the environment's connectivity signal. Returns `true` when the
    /// state changed.
    pub fn report(&self, online: bool) -> bool {
        let next = NetworkStatus::from_online(online);
        let changed = self.tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
        if changed {
            info!(status = ?next, "network status changed");
            self.notifier.publish(match next {
                NetworkStatus::Online => Notice::WentOnline,
                NetworkStatus::Offline => Notice::WentOffline,
            });
        }
        changed
    }
}

/// Periodically health-check the backend and report the result. The first
/// probe runs immediately so the initial state is settled quickly.
pub fn start_probe_loop(
    monitor: Arc<ConnectivityMonitor>,
    backend: Arc<dyn Backend>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Connectivity probe started (interval: {}s)", interval.as_secs());
        loop {
            let online = backend.health_check().await;
            monitor.report(online);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Connectivity probe stopped");
    })
}
