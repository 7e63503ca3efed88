//! User-facing notices (toast equivalents).
//!
//! Services publish on a broadcast channel; the UI layer subscribes and
//! renders. Publishing never fails: with no subscribers the notice is only
//! logged.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notice {
    /// An operation was stored locally and will sync later.
    SavedLocally { operation_id: String, kind: String },
    /// An operation reached the retry ceiling and was dropped.
    SyncAbandoned {
        operation_id: String,
        kind: String,
        attempts: u32,
        error: String,
    },
    WentOnline,
    WentOffline,
}

impl Notice {
    pub fn level(&self) -> NoticeLevel {
        match self {
            Notice::SavedLocally { .. } | Notice::WentOnline | Notice::WentOffline => {
                NoticeLevel::Info
            }
            Notice::SyncAbandoned { .. } => NoticeLevel::Error,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notice::SavedLocally { .. } => {
                "Guardado localmente. Se sincronizará cuando haya conexión.".to_string()
            }
            Notice::SyncAbandoned { attempts, .. } => format!(
                "No se pudo sincronizar una operación después de {attempts} intentos."
            ),
            Notice::WentOnline => "Conexión restablecida.".to_string(),
            Notice::WentOffline => "Sin conexión. Trabajando en modo offline.".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notice: Notice) {
        match notice.level() {
            NoticeLevel::Error => warn!(notice = ?notice, "{}", notice.message()),
            NoticeLevel::Info => info!(notice = ?notice, "{}", notice.message()),
        }
        if self.tx.send(notice).is_err() {
            debug!("notice dropped: no subscribers");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
