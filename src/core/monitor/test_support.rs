//! Fakes and a harness for driving the monitor under paused tokio time.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Monitor, MonitorDeps};
use crate::core::clock::Clock;
use crate::core::config::test_config;
use crate::core::detector::fake::FakeDetector;
use crate::core::error::{WatchError, WatchResult};
use crate::core::finesse::{AgentState, AgentStatus, Credentials, FinesseApi, ReasonCode};
use crate::core::notify::fake::FakeNotifier;
use crate::core::rate_limit::RateLimiter;
use crate::core::store::{Store, memory_store};

/// Clock that follows tokio's (paused) time, plus manual jumps.
pub struct VirtualClock {
    base: NaiveDateTime,
    started: tokio::time::Instant,
    jumped: Mutex<Duration>,
}

impl VirtualClock {
    pub fn at(base: NaiveDateTime) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
            jumped: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the wall clock without moving tokio timers.
    pub fn jump(&self, by: Duration) {
        *self.jumped.lock().unwrap() += by;
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed() + *self.jumped.lock().unwrap()
    }
}

impl Clock for VirtualClock {
    fn epoch_ms(&self) -> u64 {
        self.base.and_utc().timestamp_millis() as u64 + self.elapsed().as_millis() as u64
    }

    fn local_now(&self) -> NaiveDateTime {
        self.base + chrono::Duration::milliseconds(self.elapsed().as_millis() as i64)
    }
}

#[derive(Clone)]
pub enum Reply {
    Status(AgentStatus),
    Timeout,
    Unauthorized,
}

pub struct FakeFinesseApi {
    reply: Mutex<Reply>,
    /// While set, `connect_api` waits here before answering.
    gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    connect_calls: AtomicUsize,
    state_changes: Mutex<Vec<(AgentState, Option<i64>)>>,
}

impl FakeFinesseApi {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(reply),
            gate: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
            state_changes: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_with(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn respond_with(&self, status: AgentStatus) {
        self.reply_with(Reply::Status(status));
    }

    /// Stall the next status request until `release`.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(tokio::sync::Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn state_changes(&self) -> Vec<(AgentState, Option<i64>)> {
        self.state_changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl FinesseApi for FakeFinesseApi {
    async fn connect_api(&self, _credentials: &Credentials) -> WatchResult<AgentStatus> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.reply.lock().unwrap().clone() {
            Reply::Status(status) => Ok(status),
            Reply::Timeout => Err(WatchError::Timeout),
            Reply::Unauthorized => Err(WatchError::Auth),
        }
    }

    /// Accepts the change and reports the new state on the next poll.
    async fn change_agent_state(
        &self,
        _credentials: &Credentials,
        state: AgentState,
        reason_code_id: Option<i64>,
    ) -> WatchResult<Value> {
        self.state_changes
            .lock()
            .unwrap()
            .push((state.clone(), reason_code_id));
        self.respond_with(agent(state, reason_code_id));
        Ok(Value::Null)
    }

    async fn get_reason_codes(&self, _credentials: &Credentials) -> WatchResult<Vec<ReasonCode>> {
        Ok(vec![ReasonCode {
            id: 2,
            label: "Break".into(),
            category: "NOT_READY".into(),
            for_all: true,
        }])
    }
}

pub fn monday(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn credentials() -> Credentials {
    Credentials::new("jane.doe@example.com", "12.345.678", "s3cret!")
}

pub fn agent(state: AgentState, reason_code_id: Option<i64>) -> AgentStatus {
    let mut status = AgentStatus::new(state);
    status.reason_code_id = reason_code_id;
    status.first_name = Some("Jane".into());
    status.last_name = Some("Doe".into());
    status.login_id = Some("12.345.678".into());
    status
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

pub struct Harness {
    pub monitor: Monitor,
    pub api: Arc<FakeFinesseApi>,
    pub notifier: Arc<FakeNotifier>,
    pub detector: Arc<FakeDetector>,
    pub clock: Arc<VirtualClock>,
    pub store: Arc<Store>,
}

impl Harness {
    pub async fn at(local: NaiveDateTime, reply: Reply) -> Self {
        let clock = Arc::new(VirtualClock::at(local));
        Self::with_store(clock, Arc::new(memory_store().await), reply)
    }

    pub async fn new(reply: Reply) -> Self {
        Self::at(monday(9, 0), reply).await
    }

    /// A second monitor over an existing store, as a restarted process sees it.
    pub fn with_store(clock: Arc<VirtualClock>, store: Arc<Store>, reply: Reply) -> Self {
        let api = Arc::new(FakeFinesseApi::new(reply));
        let notifier = Arc::new(FakeNotifier::default());
        let detector = Arc::new(FakeDetector::default());
        let limiter = Arc::new(RateLimiter::new(
            100,
            Duration::from_secs(60),
            clock.clone(),
        ));
        let config = test_config(
            "https://finesse-a.example.com/finesse/api",
            "https://finesse-b.example.com/finesse/api",
        );
        let monitor = Monitor::new(MonitorDeps {
            config: Arc::new(config),
            api: api.clone(),
            store: store.clone(),
            detector: detector.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
            limiter,
        });
        Self {
            monitor,
            api,
            notifier,
            detector,
            clock,
            store,
        }
    }

    /// Logged in with the server reporting `status`.
    pub async fn logged_in(status: AgentStatus) -> Self {
        let harness = Self::new(Reply::Status(status)).await;
        harness.monitor.login(credentials()).await.unwrap();
        harness
    }
}

/// Let spawned tasks run without moving the clock.
pub async fn drain() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
