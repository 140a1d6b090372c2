mod attempts;
mod credentials;
mod settings;
mod status;

pub use attempts::{LockoutPolicy, LoginAttemptRecord};
pub use credentials::StoredSession;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::core::crypto::CryptoService;
use crate::core::error::WatchResult;

pub const STORE_FILE_NAME: &str = "store.db";

/// Record keys. Each is independently readable and writable.
pub mod keys {
    pub const SECURE_CREDENTIALS: &str = "secure_credentials";
    pub const TIMER_SETTINGS: &str = "timer_settings";
    pub const NOTIFICATION_CONFIG: &str = "notification_config";
    pub const SCHEDULE_SETTINGS: &str = "schedule_settings";
    pub const AGENT_STATUS: &str = "agent_status";
    pub const LOGIN_ATTEMPTS_PREFIX: &str = "login_attempts:";
}

/// Local key-value persistence. Values are JSON text; a missing key is a
/// normal "use defaults" state.
pub struct Store {
    db: Arc<Mutex<Connection>>,
    crypto: Arc<CryptoService>,
}

impl Store {
    pub fn new(db: Arc<Mutex<Connection>>, crypto: Arc<CryptoService>) -> Self {
        Self { db, crypto }
    }

    pub async fn open(path: &Path, crypto: Arc<CryptoService>) -> WatchResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self::new(Arc::new(Mutex::new(conn)), crypto);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> WatchResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn crypto(&self) -> &CryptoService {
        &self.crypto
    }

    pub async fn get_raw(&self, key: &str) -> WatchResult<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub async fn set_raw(&self, key: &str, value: &str) -> WatchResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            (key, value),
        )?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> WatchResult<()> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }

    pub async fn list_keys(&self) -> WatchResult<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT key FROM kv_store ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    /// Unparsable records are discarded and reported as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> WatchResult<Option<T>> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Discarding unreadable record '{}': {}", key, e);
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> WatchResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw).await
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    let db = Connection::open_in_memory().expect("in-memory db");
    let crypto = CryptoService::new("store-test-secret").expect("crypto");
    let store = Store::new(Arc::new(Mutex::new(db)), Arc::new(crypto));
    store.initialize().await.expect("init kv table");
    store
}
