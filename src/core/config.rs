use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::core::error::{WatchError, WatchResult};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_WEBHOOK_HOST: &str = "chat.googleapis.com";

/// Inclusive bounds and defaults for the two timer settings, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerBounds {
    pub standard_default: u32,
    pub standard_min: u32,
    pub standard_max: u32,
    pub pause_default: u32,
    pub pause_min: u32,
    pub pause_max: u32,
}

impl Default for TimerBounds {
    fn default() -> Self {
        Self {
            standard_default: 5,
            standard_min: 1,
            standard_max: 60,
            pause_default: 15,
            pause_min: 2,
            pause_max: 240,
        }
    }
}

/// Runtime configuration. Endpoints and the encryption secret are required.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub primary_url: String,
    pub fallback_url: String,
    pub allowed_domains: Vec<String>,
    pub client_urls: Vec<String>,
    pub timer_bounds: TimerBounds,
    pub max_login_attempts: u32,
    pub lockout_minutes: u64,
    pub session_timeout_minutes: u64,
    pub webhook_host: String,
    pub encryption_key: String,
    pub request_timeout_secs: u64,
    pub devtools_url: Option<String>,
    pub rate_limit_max: usize,
    pub rate_limit_window_secs: u64,
}

/// Shape of `config.toml`. Every field is optional; environment variables
/// take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    primary_url: Option<String>,
    fallback_url: Option<String>,
    allowed_domains: Option<Vec<String>>,
    client_urls: Option<Vec<String>>,
    standard_timer_default: Option<u32>,
    standard_timer_min: Option<u32>,
    standard_timer_max: Option<u32>,
    pause_timer_default: Option<u32>,
    pause_timer_min: Option<u32>,
    pause_timer_max: Option<u32>,
    max_login_attempts: Option<u32>,
    lockout_minutes: Option<u64>,
    session_timeout_minutes: Option<u64>,
    webhook_host: Option<String>,
    encryption_key: Option<String>,
    request_timeout_secs: Option<u64>,
    devtools_url: Option<String>,
    rate_limit_max: Option<usize>,
    rate_limit_window_secs: Option<u64>,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: std::str::FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> WatchResult<Option<T>> {
    match env(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| WatchError::Config(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}

/// `https://host:port/path` -> `https://host:port`
fn origin_of(raw: &str) -> Option<String> {
    let origin = url::Url::parse(raw).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

impl AppConfig {
    /// Load from `<data_dir>/config.toml` (if present) and the process
    /// environment.
    pub fn load(data_dir: &Path) -> WatchResult<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let file = if path.exists() {
            info!("Loading configuration from {}", path.display());
            Some(
                std::fs::read_to_string(&path)
                    .map_err(|e| WatchError::Config(format!("cannot read {}: {}", path.display(), e)))?,
            )
        } else {
            None
        };
        Self::from_sources(file.as_deref(), &|key: &str| std::env::var(key).ok())
    }

    pub fn from_sources(
        file_contents: Option<&str>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> WatchResult<Self> {
        let file: FileConfig = match file_contents {
            Some(raw) => toml::from_str(raw)
                .map_err(|e| WatchError::Config(format!("invalid {}: {}", CONFIG_FILE_NAME, e)))?,
            None => FileConfig::default(),
        };

        let primary_url = non_empty(env("FINESSE_PRIMARY_URL"))
            .or(non_empty(file.primary_url))
            .ok_or_else(|| WatchError::Config("FINESSE_PRIMARY_URL is not set".into()))?;
        url::Url::parse(&primary_url)
            .map_err(|e| WatchError::Config(format!("FINESSE_PRIMARY_URL is not a URL: {}", e)))?;

        let fallback_url = non_empty(env("FINESSE_FALLBACK_URL"))
            .or(non_empty(file.fallback_url))
            .unwrap_or_else(|| primary_url.clone());

        let encryption_key = env("FINESSE_ENCRYPTION_KEY")
            .or(file.encryption_key)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| WatchError::Config("FINESSE_ENCRYPTION_KEY is not set".into()))?;

        let allowed_domains = env("FINESSE_ALLOWED_DOMAINS")
            .map(|raw| split_list(&raw))
            .or(file.allowed_domains)
            .unwrap_or_default()
            .into_iter()
            .map(|d| d.trim_start_matches('@').to_lowercase())
            .collect();

        let mut client_urls = env("FINESSE_CLIENT_URLS")
            .map(|raw| split_list(&raw))
            .or(file.client_urls)
            .unwrap_or_default();
        if client_urls.is_empty() {
            for endpoint in [&primary_url, &fallback_url] {
                if let Some(origin) = origin_of(endpoint)
                    && !client_urls.contains(&origin)
                {
                    client_urls.push(origin);
                }
            }
        }

        let defaults = TimerBounds::default();
        let timer_bounds = TimerBounds {
            standard_default: parse_env(env, "FINESSE_STANDARD_TIMER_DEFAULT")?
                .or(file.standard_timer_default)
                .unwrap_or(defaults.standard_default),
            standard_min: parse_env(env, "FINESSE_STANDARD_TIMER_MIN")?
                .or(file.standard_timer_min)
                .unwrap_or(defaults.standard_min),
            standard_max: parse_env(env, "FINESSE_STANDARD_TIMER_MAX")?
                .or(file.standard_timer_max)
                .unwrap_or(defaults.standard_max),
            pause_default: parse_env(env, "FINESSE_PAUSE_TIMER_DEFAULT")?
                .or(file.pause_timer_default)
                .unwrap_or(defaults.pause_default),
            pause_min: parse_env(env, "FINESSE_PAUSE_TIMER_MIN")?
                .or(file.pause_timer_min)
                .unwrap_or(defaults.pause_min),
            pause_max: parse_env(env, "FINESSE_PAUSE_TIMER_MAX")?
                .or(file.pause_timer_max)
                .unwrap_or(defaults.pause_max),
        };
        if timer_bounds.standard_min == 0
            || timer_bounds.standard_min > timer_bounds.standard_max
            || timer_bounds.pause_min > timer_bounds.pause_max
            || !(timer_bounds.standard_min..=timer_bounds.standard_max)
                .contains(&timer_bounds.standard_default)
            || !(timer_bounds.pause_min..=timer_bounds.pause_max).contains(&timer_bounds.pause_default)
            || timer_bounds.pause_default <= timer_bounds.standard_default
        {
            return Err(WatchError::Config(format!(
                "inconsistent timer bounds: {:?}",
                timer_bounds
            )));
        }

        let devtools_url = non_empty(env("FINESSE_DEVTOOLS_URL")).or(non_empty(file.devtools_url));

        let config = Self {
            primary_url,
            fallback_url,
            allowed_domains,
            client_urls,
            timer_bounds,
            max_login_attempts: parse_env(env, "FINESSE_MAX_LOGIN_ATTEMPTS")?
                .or(file.max_login_attempts)
                .unwrap_or(5)
                .max(1),
            lockout_minutes: parse_env(env, "FINESSE_LOCKOUT_MINUTES")?
                .or(file.lockout_minutes)
                .unwrap_or(15),
            session_timeout_minutes: parse_env(env, "FINESSE_SESSION_TIMEOUT_MINUTES")?
                .or(file.session_timeout_minutes)
                .unwrap_or(480),
            webhook_host: non_empty(env("FINESSE_WEBHOOK_HOST"))
                .or(non_empty(file.webhook_host))
                .unwrap_or_else(|| DEFAULT_WEBHOOK_HOST.to_string())
                .to_lowercase(),
            encryption_key,
            request_timeout_secs: parse_env(env, "FINESSE_REQUEST_TIMEOUT_SECS")?
                .or(file.request_timeout_secs)
                .unwrap_or(5)
                .max(1),
            devtools_url,
            rate_limit_max: parse_env(env, "FINESSE_RATE_LIMIT_MAX")?
                .or(file.rate_limit_max)
                .unwrap_or(5)
                .max(1),
            rate_limit_window_secs: parse_env(env, "FINESSE_RATE_LIMIT_WINDOW_SECS")?
                .or(file.rate_limit_window_secs)
                .unwrap_or(60)
                .max(1),
        };

        if config.allowed_domains.is_empty() {
            warn!("No allowed email domains configured; any domain will be accepted");
        }
        Ok(config)
    }

    pub fn lockout_ms(&self) -> u64 {
        self.lockout_minutes * 60_000
    }

    pub fn session_timeout_ms(&self) -> u64 {
        self.session_timeout_minutes * 60_000
    }
}

#[cfg(test)]
pub(crate) fn test_config(primary_url: &str, fallback_url: &str) -> AppConfig {
    let primary_url = primary_url.to_string();
    let fallback_url = fallback_url.to_string();
    AppConfig::from_sources(None, &move |key: &str| match key {
        "FINESSE_PRIMARY_URL" => Some(primary_url.clone()),
        "FINESSE_FALLBACK_URL" => Some(fallback_url.clone()),
        "FINESSE_ENCRYPTION_KEY" => Some("test-secret".to_string()),
        "FINESSE_ALLOWED_DOMAINS" => Some("example.com".to_string()),
        "FINESSE_REQUEST_TIMEOUT_SECS" => Some("1".to_string()),
        _ => None,
    })
    .expect("test config")
}
