use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::clock::Clock;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub count: usize,
    pub max: usize,
    pub remaining: usize,
    pub window_ms: u64,
    pub reset_in_ms: u64,
}

/// Sliding-window request limiter keyed by (identity, endpoint).
pub struct RateLimiter {
    max_requests: usize,
    window_ms: u64,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<(String, String), VecDeque<u64>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window_ms: window.as_millis() as u64,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn key(id: &str, endpoint: &str) -> (String, String) {
        (id.to_lowercase(), endpoint.to_string())
    }

    fn evict(entries: &mut VecDeque<u64>, now: u64, window_ms: u64) {
        while let Some(&oldest) = entries.front() {
            if now.saturating_sub(oldest) >= window_ms {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records the request and returns true when under the limit; returns
    /// false without recording when the window is full.
    pub fn check_limit(&self, id: &str, endpoint: &str) -> bool {
        let now = self.clock.epoch_ms();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let entries = windows.entry(Self::key(id, endpoint)).or_default();
        Self::evict(entries, now, self.window_ms);

        if entries.len() >= self.max_requests {
            debug!(id, endpoint, count = entries.len(), "rate limit reached");
            return false;
        }
        entries.push_back(now);
        true
    }

    pub fn get_stats(&self, id: &str, endpoint: &str) -> RateLimitStats {
        let now = self.clock.epoch_ms();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let (count, reset_in_ms) = match windows.get_mut(&Self::key(id, endpoint)) {
            Some(entries) => {
                Self::evict(entries, now, self.window_ms);
                let reset = entries
                    .front()
                    .map(|oldest| (oldest + self.window_ms).saturating_sub(now))
                    .unwrap_or(0);
                (entries.len(), reset)
            }
            None => (0, 0),
        };
        RateLimitStats {
            count,
            max: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            window_ms: self.window_ms,
            reset_in_ms,
        }
    }

    pub fn is_near_limit(&self, id: &str, endpoint: &str) -> bool {
        self.get_stats(id, endpoint).remaining <= 1
    }

    /// Milliseconds until the oldest recorded request leaves the window.
    pub fn get_time_to_reset(&self, id: &str, endpoint: &str) -> u64 {
        self.get_stats(id, endpoint).reset_in_ms
    }

    pub fn reset(&self, id: &str) {
        let id = id.to_lowercase();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|(key_id, _), _| *key_id != id);
    }

    /// Drop keys whose entries have all expired. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.epoch_ms();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, entries| {
            Self::evict(entries, now, self.window_ms);
            !entries.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, "rate limiter sweep");
                }
            }
        })
    }
}
