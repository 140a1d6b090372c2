//! Wall-clock abstraction so schedule, lockout and session checks can be
//! driven from tests.

use chrono::{Local, NaiveDateTime};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> u64;

    /// Local calendar time, used for working-hours evaluation.
    fn local_now(&self) -> NaiveDateTime;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Controllable clock for tests. Both readings move together on `advance`.
pub struct FakeClock {
    state: Mutex<(u64, NaiveDateTime)>,
}

impl FakeClock {
    pub fn at(local: NaiveDateTime) -> Self {
        Self {
            state: Mutex::new((local.and_utc().timestamp_millis() as u64, local)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0 += by.as_millis() as u64;
        state.1 += chrono::Duration::milliseconds(by.as_millis() as i64);
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = (local.and_utc().timestamp_millis() as u64, local);
    }
}

impl Clock for FakeClock {
    fn epoch_ms(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn local_now(&self) -> NaiveDateTime {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}
