use thiserror::Error;

/// Errors surfaced by the monitoring core.
///
/// Component functions return `Result<T, WatchError>`; only the CLI layer
/// converts these into `anyhow` errors for display.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid credentials")]
    Auth,

    #[error("agent not found")]
    NotFound,

    #[error("state cannot be changed right now")]
    Conflict,

    #[error("Finesse server error (HTTP {status})")]
    Server { status: u16 },

    #[error("Finesse returned an error: {0}")]
    Api(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("failed to process server response: {0}")]
    Protocol(String),

    #[error("stored record is corrupted: {0}")]
    Corruption(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("account locked, try again in {retry_after_secs}s")]
    AccountLocked { retry_after_secs: u64 },

    #[error("login failed: {reason} ({remaining_attempts} attempt(s) remaining)")]
    LoginFailed {
        reason: Box<WatchError>,
        remaining_attempts: u32,
    },

    #[error("too many requests, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("not logged in")]
    NotLoggedIn,

    #[error("storage error: {0}")]
    Storage(String),
}

impl WatchError {
    /// Transport-level failures that should put the monitor in the
    /// connectivity-error state without touching stored credentials.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            WatchError::Timeout | WatchError::Transport(_) | WatchError::Server { .. }
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        WatchError::Validation(msg.into())
    }
}

impl From<rusqlite::Error> for WatchError {
    fn from(e: rusqlite::Error) -> Self {
        WatchError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Storage(format!("serialization failed: {}", e))
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
