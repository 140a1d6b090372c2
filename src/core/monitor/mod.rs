//! Session state machine: polling cadence, transition detection, pause
//! deadline and notification dispatch.
//!
//! Timers never run monitor code. They enqueue a `MonitorEvent` and a single
//! driver task handles events one at a time, so timer callbacks cannot race
//! each other. Public commands (login, logout, reconfiguration) take the same
//! session lock.

mod timers;
mod transition;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use timers::TimerSet;
pub use transition::{GENERIC_REASON_CODE, StatusKey, Transition, classify, pause_remaining};

use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::config::AppConfig;
use crate::core::detector::ClientDetector;
use crate::core::error::{WatchError, WatchResult};
use crate::core::finesse::{AgentState, AgentStatus, Credentials, FinesseApi, ReasonCode};
use crate::core::notify::{Notification, NotificationKind, Notifier};
use crate::core::rate_limit::RateLimiter;
use crate::core::schedule::{
    ScheduleSettings, get_next_working_time, is_within_working_hours, should_monitor,
};
use crate::core::settings::{NotificationConfig, TimerSettings};
use crate::core::store::{LockoutPolicy, Store};

/// Fast check that catches transitions between standard ticks.
pub const REALTIME_INTERVAL: Duration = Duration::from_secs(60);
/// Delay before re-polling after a manual state change.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    StandardTick,
    RealtimeTick,
    PauseDeadline { epoch: u64 },
    SettleRepoll,
    ClientOpenChanged(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Polling,
    PauseArmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Unknown,
    Connected,
    MonitoringPaused,
    Error,
}

/// Published after every change the user could care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub phase: Phase,
    pub connection: ConnectionState,
    pub username: Option<String>,
    pub agent: Option<AgentStatus>,
    pub message: Option<String>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            connection: ConnectionState::Unknown,
            username: None,
            agent: None,
            message: None,
        }
    }
}

pub struct MonitorDeps {
    pub config: Arc<AppConfig>,
    pub api: Arc<dyn FinesseApi>,
    pub store: Arc<Store>,
    pub detector: Arc<dyn ClientDetector>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollReason {
    /// Standard or realtime timer. Suspended while a pause deadline runs and
    /// gated by `should_monitor`.
    Tick,
    Settle,
    Manual,
}

enum Action {
    Notify(NotificationKind),
    Focus,
}

struct Session {
    credentials: Option<Credentials>,
    /// Bumped on every login, resume and logout. Results from an older epoch
    /// are dropped.
    epoch: u64,
    phase: Phase,
    last_key: Option<StatusKey>,
    /// `last_key` came from the stored snapshot; a pause it describes still
    /// needs a deadline.
    rearm_pause: bool,
    /// Epoch ms at which the current pause allowance started.
    pause_started_ms: Option<u64>,
    client_open: Option<bool>,
    device_error: bool,
    timer_settings: TimerSettings,
    schedule: ScheduleSettings,
}

struct Inner {
    deps: MonitorDeps,
    session: Mutex<Session>,
    poll_lock: Mutex<()>,
    timers: TimerSet,
    events: mpsc::UnboundedSender<MonitorEvent>,
    status: watch::Sender<MonitorStatus>,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        for handle in background.drain(..) {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

fn counts_as_failed_login(err: &WatchError) -> bool {
    matches!(
        err,
        WatchError::Auth | WatchError::NotFound | WatchError::Api(_) | WatchError::Protocol(_)
    )
}

impl Monitor {
    pub fn new(deps: MonitorDeps) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let bounds = deps.config.timer_bounds;
        let (status, _) = watch::channel(MonitorStatus::default());
        let inner = Arc::new(Inner {
            session: Mutex::new(Session {
                credentials: None,
                epoch: 0,
                phase: Phase::Idle,
                last_key: None,
                rearm_pause: false,
                pause_started_ms: None,
                client_open: None,
                device_error: false,
                timer_settings: TimerSettings::defaults(&bounds),
                schedule: ScheduleSettings::default(),
            }),
            poll_lock: Mutex::new(()),
            timers: TimerSet::new(tx.clone()),
            events: tx,
            status,
            background: std::sync::Mutex::new(Vec::new()),
            deps,
        });
        tokio::spawn(drive(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    /// Load persisted settings, watch the client and resume a stored session
    /// if one is still valid. Without one, waits for a login made elsewhere.
    pub async fn start(&self) -> WatchResult<Option<AgentStatus>> {
        let inner = &self.inner;
        inner.load_settings().await?;

        let tx = inner.events.clone();
        let tab_watch = inner
            .deps
            .detector
            .start_tab_monitoring(Arc::new(move |open| {
                let _ = tx.send(MonitorEvent::ClientOpenChanged(open));
            }));
        let sweeper = inner.deps.limiter.spawn_sweeper();
        inner
            .background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([tab_watch, sweeper]);

        let resumed = inner.resume(true).await?;
        if resumed.is_none() && inner.session.lock().await.credentials.is_none() {
            info!("No active session; waiting for login");
            inner.arm_idle_watch();
        }
        Ok(resumed)
    }

    /// Restore a stored session for one-shot commands: no timers, no poll.
    pub async fn attach(&self) -> WatchResult<Credentials> {
        self.inner.load_settings().await?;
        self.inner.resume(false).await?;
        self.inner
            .session
            .lock()
            .await
            .credentials
            .clone()
            .ok_or(WatchError::NotLoggedIn)
    }

    pub async fn login(&self, credentials: Credentials) -> WatchResult<AgentStatus> {
        self.inner.login(credentials).await
    }

    pub async fn logout(&self) -> WatchResult<()> {
        self.inner.logout().await
    }

    /// Ask the server for a new state. The local view is not updated
    /// optimistically; a re-poll follows after `SETTLE_DELAY`.
    pub async fn change_agent_state(
        &self,
        state: AgentState,
        reason_code_id: Option<i64>,
    ) -> WatchResult<()> {
        let inner = &self.inner;
        let credentials = inner.current_credentials().await?;
        inner.check_rate(&credentials.username, "state")?;
        inner
            .deps
            .api
            .change_agent_state(&credentials, state.clone(), reason_code_id)
            .await?;
        info!("Agent state change to {} accepted", state);
        inner
            .timers
            .arm_once(timers::SETTLE, SETTLE_DELAY, MonitorEvent::SettleRepoll);
        Ok(())
    }

    pub async fn reason_codes(&self) -> WatchResult<Vec<ReasonCode>> {
        let inner = &self.inner;
        let credentials = inner.current_credentials().await?;
        inner.check_rate(&credentials.username, "reasons")?;
        inner.deps.api.get_reason_codes(&credentials).await
    }

    /// Current server view without transition handling.
    pub async fn fetch_status(&self) -> WatchResult<AgentStatus> {
        let inner = &self.inner;
        let credentials = inner.current_credentials().await?;
        inner.check_rate(&credentials.username, "connect")?;
        let status = inner.deps.api.connect_api(&credentials).await?;
        inner.deps.store.save_agent_status(&status).await?;
        Ok(status)
    }

    /// Poll now and run transition handling. Skipped (returns `None`) while
    /// another poll is in flight.
    pub async fn poll_now(&self) -> WatchResult<Option<AgentStatus>> {
        self.inner.poll(PollReason::Manual).await
    }

    pub async fn update_timer_settings(&self, settings: TimerSettings) -> WatchResult<()> {
        let inner = &self.inner;
        inner
            .deps
            .store
            .save_timer_settings(&settings, &inner.deps.config.timer_bounds)
            .await?;
        let mut session = inner.session.lock().await;
        session.timer_settings = settings;
        inner.reconfigure_locked(&mut session);
        info!(
            "Timers updated: poll every {} min, pause alert after {} min",
            settings.standard_timer, settings.pause_timer
        );
        Ok(())
    }

    pub async fn update_schedule_settings(&self, settings: ScheduleSettings) -> WatchResult<()> {
        let inner = &self.inner;
        inner.deps.store.save_schedule_settings(&settings).await?;
        let mut session = inner.session.lock().await;
        session.schedule = settings;
        inner.reconfigure_locked(&mut session);
        info!("Work schedule updated");
        Ok(())
    }

    pub async fn update_notification_config(&self, config: NotificationConfig) -> WatchResult<()> {
        let inner = &self.inner;
        inner
            .deps
            .store
            .save_notification_config(&config, &inner.deps.config.webhook_host)
            .await?;
        inner.deps.notifier.reconfigure(&config);
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> MonitorStatus {
        self.inner.status.borrow().clone()
    }

    pub fn armed_timers(&self) -> Vec<&'static str> {
        self.inner.timers.armed()
    }

    pub async fn timer_settings(&self) -> TimerSettings {
        self.inner.session.lock().await.timer_settings
    }

    /// Stop timers and background watchers. The stored session is kept so
    /// the next start resumes it.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let _session = inner.session.lock().await;
        inner.timers.cancel_all();
        let mut background = inner.background.lock().unwrap_or_else(|e| e.into_inner());
        for handle in background.drain(..) {
            handle.abort();
        }
        debug!("Monitor stopped");
    }
}

async fn drive(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!(?event, "monitor event");
        if let Err(e) = inner.handle_event(event).await {
            debug!("Event handling failed: {}", e);
        }
    }
    debug!("Monitor driver finished");
}

impl Inner {
    async fn handle_event(&self, event: MonitorEvent) -> WatchResult<()> {
        match event {
            MonitorEvent::StandardTick | MonitorEvent::RealtimeTick => {
                let idle = self.session.lock().await.credentials.is_none();
                if idle {
                    self.resume(true).await?;
                } else {
                    self.poll(PollReason::Tick).await?;
                }
            }
            MonitorEvent::SettleRepoll => {
                self.poll(PollReason::Settle).await?;
            }
            MonitorEvent::PauseDeadline { epoch } => self.on_pause_deadline(epoch).await?,
            MonitorEvent::ClientOpenChanged(open) => {
                let mut session = self.session.lock().await;
                if session.client_open == Some(open) {
                    debug!(open, "Finesse tabs changed; client state unchanged");
                    return Ok(());
                }
                session.client_open = Some(open);
                info!(
                    "Finesse client {}",
                    if open { "opened" } else { "closed" }
                );
                self.reconfigure_locked(&mut session);
            }
        }
        Ok(())
    }

    fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: self.deps.config.max_login_attempts,
            lockout_ms: self.deps.config.lockout_ms(),
        }
    }

    fn check_rate(&self, username: &str, operation: &str) -> WatchResult<()> {
        if self.deps.limiter.check_limit(username, operation) {
            Ok(())
        } else {
            Err(WatchError::RateLimited {
                retry_after_ms: self.deps.limiter.get_time_to_reset(username, operation),
            })
        }
    }

    async fn current_credentials(&self) -> WatchResult<Credentials> {
        self.session
            .lock()
            .await
            .credentials
            .clone()
            .ok_or(WatchError::NotLoggedIn)
    }

    fn publish(&self, update: impl FnOnce(&mut MonitorStatus)) {
        self.status.send_modify(update);
    }

    async fn load_settings(&self) -> WatchResult<()> {
        let store = &self.deps.store;
        let timer_settings = store
            .load_timer_settings(&self.deps.config.timer_bounds)
            .await?;
        let schedule = store.load_schedule_settings().await?;
        self.deps
            .notifier
            .reconfigure(&store.load_notification_config().await?);

        let mut session = self.session.lock().await;
        session.timer_settings = timer_settings;
        session.schedule = schedule;
        Ok(())
    }

    /// Pick up settings written by another process. Returns false when the
    /// stored session is gone or expired, after ending it here too.
    async fn refresh_from_store(&self) -> WatchResult<bool> {
        let store = &self.deps.store;
        let stored = store
            .load_credentials(
                self.deps.clock.epoch_ms(),
                self.deps.config.session_timeout_ms(),
            )
            .await?;
        let timer_settings = store
            .load_timer_settings(&self.deps.config.timer_bounds)
            .await?;
        let schedule = store.load_schedule_settings().await?;
        self.deps
            .notifier
            .reconfigure(&store.load_notification_config().await?);

        let mut session = self.session.lock().await;
        let Some(current) = session.credentials.as_ref() else {
            return Ok(false);
        };
        let still_valid = stored.is_some_and(|s| {
            s.credentials
                .username
                .eq_ignore_ascii_case(&current.username)
        });
        if !still_valid {
            info!("Stored session ended or expired");
            self.clear_session_locked(&mut session);
            self.arm_idle_watch();
            self.publish(|status| {
                status.phase = Phase::Idle;
                status.connection = ConnectionState::Unknown;
                status.username = None;
                status.agent = None;
                status.message = Some("Session expired; please log in again".into());
            });
            return Ok(false);
        }

        if timer_settings != session.timer_settings || schedule != session.schedule {
            info!("Settings changed on disk; restarting timers");
            session.timer_settings = timer_settings;
            session.schedule = schedule;
            self.reconfigure_locked(&mut session);
        }
        Ok(true)
    }

    async fn login(&self, credentials: Credentials) -> WatchResult<AgentStatus> {
        let config = &self.deps.config;
        let store = &self.deps.store;
        credentials.validate(&config.allowed_domains)?;

        let username = credentials.username.clone();
        let policy = self.lockout_policy();
        let now = self.deps.clock.epoch_ms();
        if store.is_account_locked(&username, &policy, now).await? {
            let retry_after_secs = store.lockout_remaining_secs(&username, &policy, now).await?;
            return Err(WatchError::AccountLocked { retry_after_secs });
        }
        self.check_rate(&username, "login")?;

        let outcome = match self.deps.api.connect_api(&credentials).await {
            Ok(status) if status.first_name.is_some() => Ok(status),
            Ok(_) => Err(WatchError::Protocol("response has no agent record".into())),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(status) => {
                let now = self.deps.clock.epoch_ms();
                store.save_credentials(&credentials, now).await?;
                store.reset_login_attempts(&username).await?;
                info!("Logged in as {} ({})", status.display_name(), username);
                self.begin_session(credentials, Some(status.clone()), None)
                    .await?;
                Ok(status)
            }
            Err(e) if counts_as_failed_login(&e) => {
                let now = self.deps.clock.epoch_ms();
                let record = store.record_failed_login(&username, now).await?;
                let remaining_attempts = policy.remaining_attempts(&record);
                if remaining_attempts == 0 {
                    let retry_after_secs =
                        store.lockout_remaining_secs(&username, &policy, now).await?;
                    warn!("Account {} locked after {} failures", username, record.count);
                    Err(WatchError::AccountLocked { retry_after_secs })
                } else {
                    Err(WatchError::LoginFailed {
                        reason: Box::new(e),
                        remaining_attempts,
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Restore the stored session. With `arm` the polling timers start and
    /// one poll runs; without it the credentials are only loaded.
    async fn resume(&self, arm: bool) -> WatchResult<Option<AgentStatus>> {
        let store = &self.deps.store;
        let now = self.deps.clock.epoch_ms();
        let Some(stored) = store
            .load_credentials(now, self.deps.config.session_timeout_ms())
            .await?
        else {
            return Ok(None);
        };
        let username = stored.credentials.username.clone();
        if store
            .is_account_locked(&username, &self.lockout_policy(), now)
            .await?
        {
            info!("Stored session for {} belongs to a locked account", username);
            return Ok(None);
        }

        if !arm {
            let mut session = self.session.lock().await;
            session.credentials = Some(stored.credentials);
            return Ok(None);
        }

        info!("Resuming session for {}", username);
        let seen = store.load_agent_status().await?.map(|s| StatusKey::of(&s));
        self.begin_session(stored.credentials, None, seen).await?;
        match self.poll(PollReason::Manual).await {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!("First poll after resume failed: {}", e);
                Ok(None)
            }
        }
    }

    /// `seen` is the last state any process observed for this session. It is
    /// not alerted again.
    async fn begin_session(
        &self,
        credentials: Credentials,
        initial: Option<AgentStatus>,
        seen: Option<StatusKey>,
    ) -> WatchResult<()> {
        let username = credentials.username.clone();
        let mut session = self.session.lock().await;
        self.timers.cancel_all();
        session.epoch += 1;
        session.credentials = Some(credentials);
        session.phase = Phase::Polling;
        session.rearm_pause = seen.is_some();
        session.last_key = seen;
        session.pause_started_ms = None;
        session.device_error = false;
        self.arm_polling(&session);

        let actions = match &initial {
            Some(status) => self.apply_status_locked(&mut session, status),
            None => Vec::new(),
        };
        let phase = session.phase;
        drop(session);

        if let Some(status) = &initial {
            self.deps.store.save_agent_status(status).await?;
        }
        self.publish(|s| {
            s.phase = phase;
            s.username = Some(username);
            s.connection = if initial.is_some() {
                ConnectionState::Connected
            } else {
                ConnectionState::Unknown
            };
            s.agent = initial.clone();
            s.message = None;
        });
        if let Some(status) = &initial {
            self.perform(&status.display_name(), actions).await;
        }
        Ok(())
    }

    async fn logout(&self) -> WatchResult<()> {
        let store = &self.deps.store;
        let in_memory = {
            let mut session = self.session.lock().await;
            let username = session.credentials.as_ref().map(|c| c.username.clone());
            self.clear_session_locked(&mut session);
            self.arm_idle_watch();
            username
        };
        let username = match in_memory {
            Some(username) => Some(username),
            None => store
                .load_credentials(
                    self.deps.clock.epoch_ms(),
                    self.deps.config.session_timeout_ms(),
                )
                .await?
                .map(|s| s.credentials.username),
        };

        store.clear_credentials().await?;
        store.clear_agent_status().await?;
        if let Some(username) = &username {
            store.reset_login_attempts(username).await?;
            self.deps.limiter.reset(username);
            info!("Logged out {}", username);
        }
        self.publish(|s| *s = MonitorStatus {
            message: Some("Logged out".into()),
            ..MonitorStatus::default()
        });
        Ok(())
    }

    fn clear_session_locked(&self, session: &mut Session) {
        self.timers.cancel_all();
        session.epoch += 1;
        session.credentials = None;
        session.phase = Phase::Idle;
        session.last_key = None;
        session.rearm_pause = false;
        session.pause_started_ms = None;
        session.device_error = false;
    }

    /// While idle, look for a session stored by another process.
    fn arm_idle_watch(&self) {
        self.timers
            .arm_interval(timers::REALTIME, REALTIME_INTERVAL, MonitorEvent::RealtimeTick);
    }

    fn arm_polling(&self, session: &Session) {
        if session.credentials.is_none() || session.phase == Phase::PauseArmed {
            return;
        }
        let standard = Duration::from_secs(u64::from(session.timer_settings.standard_timer) * 60);
        self.timers
            .arm_interval(timers::STANDARD, standard, MonitorEvent::StandardTick);
        self.timers
            .arm_interval(timers::REALTIME, REALTIME_INTERVAL, MonitorEvent::RealtimeTick);
    }

    /// New cadence or schedule takes effect from the next tick. A running
    /// pause keeps its start; only a new allowance moves its deadline.
    fn reconfigure_locked(&self, session: &mut Session) {
        match (session.phase, session.pause_started_ms) {
            (Phase::PauseArmed, Some(started_ms)) => self.arm_pause_locked(session, started_ms),
            _ if session.credentials.is_some() => self.arm_polling(session),
            _ => {}
        }
        let phase = session.phase;
        self.publish(|s| s.phase = phase);
    }

    /// Arm the deadline for a pause observed in `status`, counting time the
    /// server says has already passed.
    fn start_pause_locked(&self, session: &mut Session, status: &AgentStatus) {
        let now = self.deps.clock.epoch_ms();
        let allowance_ms = u64::from(session.timer_settings.pause_timer) * 60_000;
        let remaining = pause_remaining(
            session.timer_settings.pause_timer,
            status.state_change_time.as_deref(),
            now,
        );
        let elapsed_ms = allowance_ms.saturating_sub(remaining.as_millis() as u64);
        self.arm_pause_locked(session, now.saturating_sub(elapsed_ms));
    }

    /// Suspend polling and fire `PauseDeadline` when the allowance that began
    /// at `started_ms` runs out.
    fn arm_pause_locked(&self, session: &mut Session, started_ms: u64) {
        let allowance_ms = u64::from(session.timer_settings.pause_timer) * 60_000;
        let elapsed_ms = self.deps.clock.epoch_ms().saturating_sub(started_ms);
        let remaining = Duration::from_millis(allowance_ms.saturating_sub(elapsed_ms));
        info!(remaining_secs = remaining.as_secs(), "Pause deadline armed");
        session.phase = Phase::PauseArmed;
        session.pause_started_ms = Some(started_ms);
        self.timers.cancel(timers::STANDARD);
        self.timers.cancel(timers::REALTIME);
        self.timers.arm_once(
            timers::PAUSE,
            remaining,
            MonitorEvent::PauseDeadline {
                epoch: session.epoch,
            },
        );
    }

    async fn poll(&self, reason: PollReason) -> WatchResult<Option<AgentStatus>> {
        let Ok(_guard) = self.poll_lock.try_lock() else {
            debug!(?reason, "Poll already in flight; skipping");
            return Ok(None);
        };

        if reason == PollReason::Tick {
            if self.session.lock().await.phase == Phase::PauseArmed {
                return Ok(None);
            }
            if !self.refresh_from_store().await? {
                return Ok(None);
            }
        }

        let (credentials, epoch, schedule) = {
            let session = self.session.lock().await;
            let Some(credentials) = session.credentials.clone() else {
                return Ok(None);
            };
            (credentials, session.epoch, session.schedule.clone())
        };

        let now_local = self.deps.clock.local_now();
        let client_open = self.deps.detector.is_finesse_open().await;
        let allowed = should_monitor(client_open, Some(&schedule), now_local);
        if reason == PollReason::Tick && !allowed {
            let message = if !client_open {
                "Finesse client is closed; monitoring paused".to_string()
            } else {
                match get_next_working_time(&schedule, now_local) {
                    Some(next) => format!(
                        "Outside working hours; monitoring resumes {}",
                        next.format("%a %H:%M")
                    ),
                    None => "Outside working hours; monitoring paused".to_string(),
                }
            };
            debug!("{}", message);
            self.publish(|s| {
                s.connection = ConnectionState::MonitoringPaused;
                s.message = Some(message);
            });
            return Ok(None);
        }

        if let Err(e) = self.check_rate(&credentials.username, "connect") {
            debug!("Poll skipped: {}", e);
            return Ok(None);
        }

        let result = self.deps.api.connect_api(&credentials).await;
        self.apply_poll_result(epoch, &credentials.username, allowed, result)
            .await
    }

    async fn apply_poll_result(
        &self,
        epoch: u64,
        username: &str,
        monitor_allowed: bool,
        result: WatchResult<AgentStatus>,
    ) -> WatchResult<Option<AgentStatus>> {
        let mut session = self.session.lock().await;
        if session.epoch != epoch || session.credentials.is_none() {
            debug!("Discarding poll result from an ended session");
            return Ok(None);
        }

        match result {
            Ok(status) => {
                session.device_error = false;
                let actions = self.apply_status_locked(&mut session, &status);
                let phase = session.phase;
                drop(session);

                self.deps.store.save_agent_status(&status).await?;
                self.publish(|s| {
                    s.phase = phase;
                    s.connection = ConnectionState::Connected;
                    s.agent = Some(status.clone());
                    s.message = None;
                });
                self.perform(&status.display_name(), actions).await;
                Ok(Some(status))
            }
            Err(e) => {
                warn!("Status poll failed: {}", e);
                let mut actions = Vec::new();
                if e.is_connectivity() && !session.device_error {
                    session.device_error = true;
                    if monitor_allowed {
                        actions.push(Action::Notify(NotificationKind::DeviceError));
                    }
                }
                drop(session);

                let message = e.to_string();
                self.publish(|s| {
                    s.connection = ConnectionState::Error;
                    s.message = Some(message);
                });
                self.perform(username, actions).await;
                Err(e)
            }
        }
    }

    /// Transition handling. Only a change of `(state, reasonCodeId)` does
    /// anything.
    fn apply_status_locked(&self, session: &mut Session, status: &AgentStatus) -> Vec<Action> {
        let key = StatusKey::of(status);
        let rearm_pause = std::mem::take(&mut session.rearm_pause);
        if session.last_key.as_ref() == Some(&key) {
            if rearm_pause && session.phase != Phase::PauseArmed {
                if let Transition::Paused { reason_code_id } = classify(status) {
                    info!(reason_code_id, "Pause still running from an earlier session");
                    self.start_pause_locked(session, status);
                }
            }
            return Vec::new();
        }
        info!(
            state = %key.state,
            reason = ?key.reason_code_id,
            "Agent state changed"
        );
        session.last_key = Some(key);

        if session.phase == Phase::PauseArmed {
            self.timers.cancel(timers::PAUSE);
            session.phase = Phase::Polling;
            session.pause_started_ms = None;
            self.arm_polling(session);
        }

        let within_hours =
            is_within_working_hours(Some(&session.schedule), self.deps.clock.local_now());
        match classify(status) {
            Transition::GenericNotReady if within_hours => {
                vec![Action::Notify(NotificationKind::NotReady), Action::Focus]
            }
            Transition::GenericNotReady => {
                debug!("NOT_READY outside working hours; not notifying");
                Vec::new()
            }
            Transition::Paused { reason_code_id } => {
                info!(reason_code_id, "Pause started");
                self.start_pause_locked(session, status);
                Vec::new()
            }
            Transition::StateOnly => Vec::new(),
        }
    }

    /// Confirm the pause is still on, then alert. A changed state is handled
    /// as an ordinary transition instead.
    async fn on_pause_deadline(&self, epoch: u64) -> WatchResult<()> {
        let _guard = self.poll_lock.lock().await;
        let credentials = {
            let session = self.session.lock().await;
            if session.epoch != epoch || session.phase != Phase::PauseArmed {
                return Ok(());
            }
            match session.credentials.clone() {
                Some(credentials) => credentials,
                None => return Ok(()),
            }
        };

        let result = match self.check_rate(&credentials.username, "connect") {
            Ok(()) => self.deps.api.connect_api(&credentials).await,
            Err(e) => Err(e),
        };

        let mut session = self.session.lock().await;
        if session.epoch != epoch || session.phase != Phase::PauseArmed {
            return Ok(());
        }
        session.phase = Phase::Polling;
        session.pause_started_ms = None;
        self.arm_polling(&session);

        let pause_minutes = session.timer_settings.pause_timer;
        let within_hours =
            is_within_working_hours(Some(&session.schedule), self.deps.clock.local_now());
        let exceeded = || {
            if within_hours {
                vec![
                    Action::Notify(NotificationKind::TimeExceeded {
                        minutes: pause_minutes,
                    }),
                    Action::Focus,
                ]
            } else {
                debug!("Pause deadline outside working hours; not notifying");
                Vec::new()
            }
        };
        let actions = match &result {
            Ok(status) if session.last_key.as_ref() == Some(&StatusKey::of(status)) => exceeded(),
            Ok(status) => self.apply_status_locked(&mut session, status),
            Err(e) => {
                warn!("Could not confirm pause ({}); alerting anyway", e);
                exceeded()
            }
        };
        let phase = session.phase;
        drop(session);

        let name = match &result {
            Ok(status) => {
                self.deps.store.save_agent_status(status).await?;
                self.publish(|s| {
                    s.connection = ConnectionState::Connected;
                    s.agent = Some(status.clone());
                });
                status.display_name()
            }
            Err(_) => credentials.username.clone(),
        };
        self.publish(|s| s.phase = phase);
        self.perform(&name, actions).await;
        Ok(())
    }

    async fn perform(&self, agent_name: &str, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Notify(kind) => {
                    let notification = Notification::new(kind, agent_name);
                    if let Err(e) = self.deps.notifier.notify(&notification).await {
                        warn!("Notification failed: {}", e);
                    }
                }
                Action::Focus => {
                    if let Err(e) = self.deps.detector.focus_finesse_tab().await {
                        warn!("Could not focus the Finesse client: {}", e);
                    }
                }
            }
        }
    }
}
