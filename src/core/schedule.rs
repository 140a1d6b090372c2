//! Working-hours evaluation over the configured weekly windows.
//!
//! Every function takes the local time explicitly so the monitor can pass its
//! clock reading and tests can pin any instant.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

use crate::core::error::{WatchError, WatchResult};

static TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("valid time pattern"));

const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// One weekly window. `day_of_week` is 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSchedule {
    pub day_of_week: u8,
    pub enabled: bool,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    pub work_schedules: Vec<WorkSchedule>,
    pub notify_outside_hours: bool,
}

impl Default for ScheduleSettings {
    /// Monday to Friday 08:00-18:00, weekends off.
    fn default() -> Self {
        let work_schedules = (0u8..7)
            .map(|day| WorkSchedule {
                day_of_week: day,
                enabled: (1..=5).contains(&day),
                start_time: "08:00".to_string(),
                end_time: "18:00".to_string(),
            })
            .collect();
        Self {
            work_schedules,
            notify_outside_hours: false,
        }
    }
}

impl ScheduleSettings {
    pub fn entry_for(&self, day_of_week: u8) -> Option<&WorkSchedule> {
        self.work_schedules
            .iter()
            .find(|s| s.day_of_week == day_of_week)
    }

    /// Insert or replace the entry for `entry.day_of_week`.
    pub fn upsert(&mut self, entry: WorkSchedule) {
        match self
            .work_schedules
            .iter_mut()
            .find(|s| s.day_of_week == entry.day_of_week)
        {
            Some(existing) => *existing = entry,
            None => {
                self.work_schedules.push(entry);
                self.work_schedules.sort_by_key(|s| s.day_of_week);
            }
        }
    }
}

pub fn day_name(day_of_week: u8) -> &'static str {
    DAY_NAMES.get(day_of_week as usize).copied().unwrap_or("?")
}

/// Accepts `0`..`6` or a three-letter day name (`mon`, `Tuesday`, ...).
pub fn parse_day(raw: &str) -> Option<u8> {
    let lower = raw.trim().to_lowercase();
    if let Ok(n) = lower.parse::<u8>() {
        return (n <= 6).then_some(n);
    }
    DAY_NAMES
        .iter()
        .position(|name| lower.starts_with(name))
        .map(|idx| idx as u8)
}

fn parse_time(raw: &str) -> WatchResult<NaiveTime> {
    if !TIME_PATTERN.is_match(raw) {
        return Err(WatchError::validation(format!(
            "time '{}' must use 24-hour HH:mm format",
            raw
        )));
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| WatchError::validation(format!("invalid time '{}': {}", raw, e)))
}

fn weekday_index(now: &NaiveDateTime) -> u8 {
    now.weekday().num_days_from_sunday() as u8
}

pub fn validate_schedule(entry: &WorkSchedule) -> WatchResult<()> {
    if entry.day_of_week > 6 {
        return Err(WatchError::validation(format!(
            "day of week must be between 0 and 6, got {}",
            entry.day_of_week
        )));
    }
    let start = parse_time(&entry.start_time)?;
    let end = parse_time(&entry.end_time)?;
    if start >= end {
        return Err(WatchError::validation(format!(
            "{}: start time {} must be before end time {}",
            day_name(entry.day_of_week),
            entry.start_time,
            entry.end_time
        )));
    }
    Ok(())
}

pub fn validate_settings(settings: &ScheduleSettings) -> WatchResult<()> {
    let mut seen = [false; 7];
    for entry in &settings.work_schedules {
        validate_schedule(entry)?;
        let slot = &mut seen[entry.day_of_week as usize];
        if *slot {
            return Err(WatchError::validation(format!(
                "duplicate schedule entry for {}",
                day_name(entry.day_of_week)
            )));
        }
        *slot = true;
    }
    Ok(())
}

pub fn is_within_working_hours(settings: Option<&ScheduleSettings>, now: NaiveDateTime) -> bool {
    let Some(settings) = settings else {
        return true;
    };
    if settings.notify_outside_hours {
        return true;
    }

    let today = weekday_index(&now);
    let Some(entry) = settings
        .work_schedules
        .iter()
        .find(|s| s.enabled && s.day_of_week == today)
    else {
        return false;
    };

    match (parse_time(&entry.start_time), parse_time(&entry.end_time)) {
        (Ok(start), Ok(end)) => {
            let time = now.time();
            time >= start && time <= end
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(
                "Malformed work schedule for {}: {}; not suppressing",
                day_name(today),
                e
            );
            true
        }
    }
}

pub fn should_monitor(
    is_client_open: bool,
    settings: Option<&ScheduleSettings>,
    now: NaiveDateTime,
) -> bool {
    is_client_open && is_within_working_hours(settings, now)
}

/// First enabled window start strictly after `now`, looking at most seven
/// days ahead (today included).
pub fn get_next_working_time(
    settings: &ScheduleSettings,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    for offset in 0..7 {
        let date = now.date() + Duration::days(offset);
        let day = date.weekday().num_days_from_sunday() as u8;
        let Some(entry) = settings
            .work_schedules
            .iter()
            .find(|s| s.enabled && s.day_of_week == day)
        else {
            continue;
        };
        let Ok(start) = parse_time(&entry.start_time) else {
            continue;
        };
        let candidate = date.and_time(start);
        if candidate > now {
            return Some(candidate);
        }
    }
    None
}
