use tracing::info;

use super::{Store, keys};
use crate::core::config::TimerBounds;
use crate::core::error::WatchResult;
use crate::core::schedule::{ScheduleSettings, validate_settings};
use crate::core::settings::{NotificationConfig, TimerSettings};

// Saves validate before writing; a rejected save leaves the stored value alone.
impl Store {
    pub async fn load_timer_settings(&self, bounds: &TimerBounds) -> WatchResult<TimerSettings> {
        match self.get_json::<TimerSettings>(keys::TIMER_SETTINGS).await? {
            Some(settings) if settings.validate(bounds).is_ok() => Ok(settings),
            Some(_) => {
                info!("Stored timer settings are outside the configured bounds; using defaults");
                Ok(TimerSettings::defaults(bounds))
            }
            None => Ok(TimerSettings::defaults(bounds)),
        }
    }

    pub async fn save_timer_settings(
        &self,
        settings: &TimerSettings,
        bounds: &TimerBounds,
    ) -> WatchResult<()> {
        settings.validate(bounds)?;
        self.set_json(keys::TIMER_SETTINGS, settings).await
    }

    pub async fn load_notification_config(&self) -> WatchResult<NotificationConfig> {
        Ok(self
            .get_json(keys::NOTIFICATION_CONFIG)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_notification_config(
        &self,
        config: &NotificationConfig,
        allowed_webhook_host: &str,
    ) -> WatchResult<()> {
        config.validate(allowed_webhook_host)?;
        self.set_json(keys::NOTIFICATION_CONFIG, config).await
    }

    pub async fn load_schedule_settings(&self) -> WatchResult<ScheduleSettings> {
        Ok(self
            .get_json(keys::SCHEDULE_SETTINGS)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_schedule_settings(&self, settings: &ScheduleSettings) -> WatchResult<()> {
        validate_settings(settings)?;
        self.set_json(keys::SCHEDULE_SETTINGS, settings).await
    }
}
