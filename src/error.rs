//! Error taxonomy shared by the queue, cache, and backend client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failed (SQLite, lock poisoning, quota).
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure: unreachable host, timeout, TLS, etc.
    #[error("{0}")]
    Network(String),

    /// The backend answered but reported a failure, either through a
    /// non-2xx status or a `success: false` body.
    #[error("{message}")]
    Remote { status: Option<u16>, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("backend is not reachable (offline)")]
    Offline,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl Error {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Remote {
            status,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<keyring::Error> for Error {
    fn from(err: keyring::Error) -> Self {
        Error::Keyring(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Storage(format!("lock poisoned: {err}"))
    }
}
