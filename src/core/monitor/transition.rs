use chrono::DateTime;
use std::time::Duration;

use crate::core::finesse::{AgentState, AgentStatus};

/// Reason code Finesse reports for "not ready, no motive selected".
pub const GENERIC_REASON_CODE: i64 = -1;

/// What the monitor compares between polls. Notifications only follow a
/// change of this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey {
    pub state: AgentState,
    pub reason_code_id: Option<i64>,
}

impl StatusKey {
    pub fn of(status: &AgentStatus) -> Self {
        Self {
            state: status.state.clone(),
            reason_code_id: status.reason_code_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// NOT_READY with the -1 sentinel or with no usable reason code.
    GenericNotReady,
    /// NOT_READY with a real pause motive.
    Paused { reason_code_id: i64 },
    /// Anything else: record it and move on.
    StateOnly,
}

pub fn classify(status: &AgentStatus) -> Transition {
    if status.state != AgentState::NotReady {
        return Transition::StateOnly;
    }
    match status.reason_code_id {
        Some(id) if id > 0 => Transition::Paused { reason_code_id: id },
        // -1, absent, or a non-positive code the server should never send.
        _ => Transition::GenericNotReady,
    }
}

/// Time left on the pause allowance. Elapsed time is taken from the server's
/// `stateChangeTime` when it parses and is not in the future; otherwise the
/// whole allowance remains.
pub fn pause_remaining(pause_minutes: u32, state_change_time: Option<&str>, now_ms: u64) -> Duration {
    let allowance_ms = u64::from(pause_minutes) * 60_000;
    let elapsed_ms = state_change_time
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|changed| changed.timestamp_millis())
        .filter(|changed| *changed >= 0 && (*changed as u64) <= now_ms)
        .map(|changed| now_ms - changed as u64)
        .unwrap_or(0);
    Duration::from_millis(allowance_ms.saturating_sub(elapsed_ms))
}
