use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Store, keys};
use crate::core::error::WatchResult;
use crate::core::finesse::Credentials;

/// Encrypted credential blob plus an integrity digest over the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    ciphertext: String,
    hash: String,
    created_at_ms: u64,
}

/// Credentials recovered from a valid, non-expired record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub credentials: Credentials,
    pub created_at_ms: u64,
}

impl StoredSession {
    pub fn expires_at_ms(&self, session_timeout_ms: u64) -> u64 {
        self.created_at_ms.saturating_add(session_timeout_ms)
    }
}

impl Store {
    pub async fn save_credentials(&self, credentials: &Credentials, now_ms: u64) -> WatchResult<()> {
        let ciphertext = self.crypto().encrypt_object(credentials)?;
        let hash = self.crypto().hash(&ciphertext)?;
        let record = CredentialRecord {
            ciphertext,
            hash,
            created_at_ms: now_ms,
        };
        self.set_json(keys::SECURE_CREDENTIALS, &record).await
    }

    /// Returns the stored session, or `None` after discarding a record that
    /// is tampered, undecryptable or past the session timeout.
    pub async fn load_credentials(
        &self,
        now_ms: u64,
        session_timeout_ms: u64,
    ) -> WatchResult<Option<StoredSession>> {
        let Some(record) = self
            .get_json::<CredentialRecord>(keys::SECURE_CREDENTIALS)
            .await?
        else {
            return Ok(None);
        };

        if !self.crypto().validate_hash(&record.ciphertext, &record.hash) {
            warn!("Stored credentials failed the integrity check; discarding");
            self.clear_credentials().await?;
            return Ok(None);
        }

        let credentials: Credentials = match self.crypto().decrypt_object(&record.ciphertext) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Stored credentials could not be decrypted ({}); discarding", e);
                self.clear_credentials().await?;
                return Ok(None);
            }
        };

        if now_ms.saturating_sub(record.created_at_ms) >= session_timeout_ms {
            info!("Stored session for {} expired", credentials.username);
            self.clear_credentials().await?;
            return Ok(None);
        }

        Ok(Some(StoredSession {
            credentials,
            created_at_ms: record.created_at_ms,
        }))
    }

    pub async fn clear_credentials(&self) -> WatchResult<()> {
        self.remove(keys::SECURE_CREDENTIALS).await
    }
}
