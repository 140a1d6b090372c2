use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::MonitorEvent;

pub const STANDARD: &str = "standard";
pub const REALTIME: &str = "realtime";
pub const PAUSE: &str = "pause";
pub const SETTLE: &str = "settle";

/// Named timers. A timer never does work itself: when it fires it enqueues
/// its event for the monitor's driver task. Arming a name cancels whatever
/// was armed under it before.
pub struct TimerSet {
    events: mpsc::UnboundedSender<MonitorEvent>,
    tasks: Mutex<HashMap<&'static str, JoinHandle<()>>>,
}

impl TimerSet {
    pub fn new(events: mpsc::UnboundedSender<MonitorEvent>) -> Self {
        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn install(&self, name: &'static str, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(name, handle) {
            previous.abort();
        }
    }

    /// Fire `event` once after `delay`.
    pub fn arm_once(&self, name: &'static str, delay: Duration, event: MonitorEvent) {
        let tx = self.events.clone();
        debug!(timer = name, ?delay, "arming one-shot timer");
        self.install(
            name,
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(event);
            }),
        );
    }

    /// Fire `event` every `period`, first after one full period.
    pub fn arm_interval(&self, name: &'static str, period: Duration, event: MonitorEvent) {
        let tx = self.events.clone();
        debug!(timer = name, ?period, "arming interval timer");
        self.install(
            name,
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if tx.send(event.clone()).is_err() {
                        break;
                    }
                }
            }),
        );
    }

    pub fn cancel(&self, name: &str) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = tasks.remove(name) {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    pub fn is_armed(&self, name: &str) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.get(name).is_some_and(|handle| !handle.is_finished())
    }

    pub fn armed(&self) -> Vec<&'static str> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&'static str> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
