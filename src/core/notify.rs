use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::core::error::{WatchError, WatchResult};
use crate::core::settings::{NotificationConfig, validate_webhook_url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// Agent went NOT_READY without a pause motive.
    NotReady,
    /// A pause outlived the configured allowance (minutes).
    TimeExceeded { minutes: u32 },
    /// The Finesse server could not be reached.
    DeviceError,
}

impl NotificationKind {
    pub fn code(&self) -> &'static str {
        match self {
            NotificationKind::NotReady => "NOT_READY",
            NotificationKind::TimeExceeded { .. } => "TIME_EXCEEDED",
            NotificationKind::DeviceError => "DEVICE_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, agent_name: &str) -> Self {
        let (title, message) = match &kind {
            NotificationKind::NotReady => (
                "Agent not ready".to_string(),
                format!("{} is NOT READY without a pause reason.", agent_name),
            ),
            NotificationKind::TimeExceeded { minutes } => (
                "Pause time exceeded".to_string(),
                format!(
                    "{} has been on pause for more than {} minutes.",
                    agent_name, minutes
                ),
            ),
            NotificationKind::DeviceError => (
                "Finesse unreachable".to_string(),
                format!(
                    "Could not reach the Finesse server to check {}'s status.",
                    agent_name
                ),
            ),
        };
        Self {
            kind,
            title,
            message,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> WatchResult<()>;

    /// Channel selection changed. Single-channel notifiers ignore it.
    fn reconfigure(&self, _config: &NotificationConfig) {}
}

/// Local desktop notification through notify-rust.
#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopNotifier;

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, notification: &Notification) -> WatchResult<()> {
        let title = notification.title.clone();
        let message = notification.message.clone();
        // show() can block on some platforms; fire-and-forget on the blocking pool.
        tokio::task::spawn_blocking(move || {
            match notify_rust::Notification::new()
                .summary(&title)
                .body(&message)
                .show()
            {
                Ok(_) => debug!(%title, "desktop notification sent"),
                Err(e) => warn!(%title, error = %e, "desktop notification failed"),
            }
        });
        Ok(())
    }
}

/// Posts `{"text": ...}` to a Google Chat incoming webhook.
pub struct GoogleChatNotifier {
    http: reqwest::Client,
    webhook: url::Url,
}

impl GoogleChatNotifier {
    pub fn new(http: reqwest::Client, webhook: url::Url) -> Self {
        Self { http, webhook }
    }
}

#[async_trait]
impl Notifier for GoogleChatNotifier {
    async fn notify(&self, notification: &Notification) -> WatchResult<()> {
        let body = json!({
            "text": format!("*{}*\n{}", notification.title, notification.message)
        });
        let response = self
            .http
            .post(self.webhook.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WatchError::Timeout
                } else {
                    WatchError::Transport(e.to_string())
                }
            })?;
        if !response.status().is_success() {
            return Err(WatchError::Server {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Fans a notification out to the channels enabled in the current
/// `NotificationConfig`. Channel failures are logged, never returned.
pub struct NotificationDispatcher {
    desktop: Arc<dyn Notifier>,
    http: reqwest::Client,
    webhook_host: String,
    config: RwLock<NotificationConfig>,
}

impl NotificationDispatcher {
    pub fn new(
        desktop: Arc<dyn Notifier>,
        http: reqwest::Client,
        webhook_host: impl Into<String>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            desktop,
            http,
            webhook_host: webhook_host.into(),
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> NotificationConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_config(&self, config: NotificationConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    fn chat_channel(&self, config: &NotificationConfig) -> Option<GoogleChatNotifier> {
        if !config.google_chat_notification {
            return None;
        }
        let raw = config.google_chat_webhook.as_deref()?;
        match validate_webhook_url(raw, &self.webhook_host) {
            Ok(url) => Some(GoogleChatNotifier::new(self.http.clone(), url)),
            Err(e) => {
                warn!("Skipping Google Chat notification: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn notify(&self, notification: &Notification) -> WatchResult<()> {
        let config = self.config();
        info!(kind = notification.kind.code(), "{}", notification.message);

        if config.windows_notification
            && let Err(e) = self.desktop.notify(notification).await
        {
            warn!("Desktop notification failed: {}", e);
        }
        if let Some(chat) = self.chat_channel(&config)
            && let Err(e) = chat.notify(notification).await
        {
            warn!("Google Chat notification failed: {}", e);
        }
        Ok(())
    }

    fn reconfigure(&self, config: &NotificationConfig) {
        if *config != self.config() {
            debug!("Notification channels updated");
            self.set_config(config.clone());
        }
    }
}
