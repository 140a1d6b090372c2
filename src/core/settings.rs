use serde::{Deserialize, Serialize};

use crate::core::config::TimerBounds;
use crate::core::error::{WatchError, WatchResult};

/// Poll interval and pause-alert threshold, both in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    pub standard_timer: u32,
    pub pause_timer: u32,
}

impl TimerSettings {
    pub fn defaults(bounds: &TimerBounds) -> Self {
        Self {
            standard_timer: bounds.standard_default,
            pause_timer: bounds.pause_default,
        }
    }

    pub fn validate(&self, bounds: &TimerBounds) -> WatchResult<()> {
        if !(bounds.standard_min..=bounds.standard_max).contains(&self.standard_timer) {
            return Err(WatchError::validation(format!(
                "standard timer must be between {} and {} minutes",
                bounds.standard_min, bounds.standard_max
            )));
        }
        if !(bounds.pause_min..=bounds.pause_max).contains(&self.pause_timer) {
            return Err(WatchError::validation(format!(
                "pause timer must be between {} and {} minutes",
                bounds.pause_min, bounds.pause_max
            )));
        }
        if self.pause_timer <= self.standard_timer {
            return Err(WatchError::validation(
                "pause timer must be greater than the standard timer",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub windows_notification: bool,
    pub google_chat_notification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_chat_webhook: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            windows_notification: true,
            google_chat_notification: false,
            google_chat_webhook: None,
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self, allowed_host: &str) -> WatchResult<()> {
        if let Some(webhook) = &self.google_chat_webhook {
            validate_webhook_url(webhook, allowed_host)?;
        } else if self.google_chat_notification {
            return Err(WatchError::validation(
                "a Google Chat webhook URL is required to enable chat notifications",
            ));
        }
        Ok(())
    }
}

/// Webhooks must be https and point at exactly the allow-listed host.
pub fn validate_webhook_url(raw: &str, allowed_host: &str) -> WatchResult<url::Url> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| WatchError::validation(format!("invalid webhook URL: {}", e)))?;
    if parsed.scheme() != "https" {
        return Err(WatchError::validation("webhook URL must use https"));
    }
    match parsed.host_str() {
        Some(host) if host.eq_ignore_ascii_case(allowed_host) => Ok(parsed),
        _ => Err(WatchError::validation(format!(
            "webhook host must be {}",
            allowed_host
        ))),
    }
}
