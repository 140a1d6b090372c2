use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Store, keys};
use crate::core::error::WatchResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginAttemptRecord {
    pub count: u32,
    pub last_attempt_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout_ms: u64,
}

impl LockoutPolicy {
    pub fn remaining_attempts(&self, record: &LoginAttemptRecord) -> u32 {
        self.max_attempts.saturating_sub(record.count)
    }

    fn lock_expires_at(&self, record: &LoginAttemptRecord) -> u64 {
        record.last_attempt_ms.saturating_add(self.lockout_ms)
    }
}

fn attempts_key(username: &str) -> String {
    format!("{}{}", keys::LOGIN_ATTEMPTS_PREFIX, username.trim().to_lowercase())
}

impl Store {
    pub async fn login_attempts(&self, username: &str) -> WatchResult<LoginAttemptRecord> {
        Ok(self
            .get_json(&attempts_key(username))
            .await?
            .unwrap_or_default())
    }

    /// Count one failed login and return the updated record.
    pub async fn record_failed_login(
        &self,
        username: &str,
        now_ms: u64,
    ) -> WatchResult<LoginAttemptRecord> {
        let mut record = self.login_attempts(username).await?;
        record.count = record.count.saturating_add(1);
        record.last_attempt_ms = now_ms;
        self.set_json(&attempts_key(username), &record).await?;
        warn!(
            "Failed login for {} ({} consecutive)",
            username.trim().to_lowercase(),
            record.count
        );
        Ok(record)
    }

    pub async fn reset_login_attempts(&self, username: &str) -> WatchResult<()> {
        self.remove(&attempts_key(username)).await
    }

    /// True while the failure count is at the limit and the lockout window
    /// since the last failure has not elapsed. An elapsed lock is cleared.
    pub async fn is_account_locked(
        &self,
        username: &str,
        policy: &LockoutPolicy,
        now_ms: u64,
    ) -> WatchResult<bool> {
        let record = self.login_attempts(username).await?;
        if record.count < policy.max_attempts {
            return Ok(false);
        }
        if now_ms >= policy.lock_expires_at(&record) {
            info!("Lockout for {} elapsed", username.trim().to_lowercase());
            self.reset_login_attempts(username).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Seconds left on an active lock, rounded up. Zero when not locked.
    pub async fn lockout_remaining_secs(
        &self,
        username: &str,
        policy: &LockoutPolicy,
        now_ms: u64,
    ) -> WatchResult<u64> {
        let record = self.login_attempts(username).await?;
        if record.count < policy.max_attempts {
            return Ok(0);
        }
        let remaining_ms = policy.lock_expires_at(&record).saturating_sub(now_ms);
        Ok(remaining_ms.div_ceil(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::memory_store;

    const POLICY: LockoutPolicy = LockoutPolicy {
        max_attempts: 5,
        lockout_ms: 15 * 60 * 1000,
    };

    #[tokio::test]
    async fn locks_after_max_failures_and_unlocks_after_window() {
        let store = memory_store().await;
        for i in 0..4 {
            store.record_failed_login("Jane@Example.com", i * 1000).await.unwrap();
            assert!(!store.is_account_locked("jane@example.com", &POLICY, i * 1000).await.unwrap());
        }
        let record = store.record_failed_login("jane@example.com", 4_000).await.unwrap();
        assert_eq!(record.count, 5);
        assert_eq!(POLICY.remaining_attempts(&record), 0);
        assert!(store.is_account_locked("jane@example.com", &POLICY, 4_000).await.unwrap());
        assert_eq!(
            store.lockout_remaining_secs("jane@example.com", &POLICY, 4_000).await.unwrap(),
            15 * 60
        );

        let just_before = 4_000 + POLICY.lockout_ms - 1;
        assert!(store.is_account_locked("jane@example.com", &POLICY, just_before).await.unwrap());
        assert_eq!(
            store.lockout_remaining_secs("jane@example.com", &POLICY, just_before).await.unwrap(),
            1
        );

        let after = 4_000 + POLICY.lockout_ms;
        assert!(!store.is_account_locked("jane@example.com", &POLICY, after).await.unwrap());
        assert_eq!(store.login_attempts("jane@example.com").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn reset_clears_counter() {
        let store = memory_store().await;
        store.record_failed_login("a@example.com", 1).await.unwrap();
        store.record_failed_login("a@example.com", 2).await.unwrap();
        store.reset_login_attempts("a@example.com").await.unwrap();
        assert_eq!(
            store.login_attempts("a@example.com").await.unwrap(),
            LoginAttemptRecord::default()
        );
    }

    #[tokio::test]
    async fn usernames_are_tracked_separately() {
        let store = memory_store().await;
        store.record_failed_login("a@example.com", 1).await.unwrap();
        assert_eq!(store.login_attempts("b@example.com").await.unwrap().count, 0);
        assert_eq!(
            store.lockout_remaining_secs("a@example.com", &POLICY, 1).await.unwrap(),
            0
        );
    }
}
