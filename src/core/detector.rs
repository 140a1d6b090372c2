//! Whether the Finesse web client is open, and bringing it to the front.
//!
//! Two capabilities: `DevToolsDetector` inspects browser tabs through the
//! Chrome DevTools HTTP endpoint; `StandaloneDetector` has no introspection,
//! assumes the client is open and can only launch a new window.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::{WatchError, WatchResult};

pub const TAB_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Called with the new open/closed state whenever the set of matching tabs
/// changes.
pub type TabCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[async_trait]
pub trait ClientDetector: Send + Sync {
    async fn is_finesse_open(&self) -> bool;

    async fn focus_finesse_tab(&self) -> WatchResult<()>;

    fn start_tab_monitoring(&self, callback: TabCallback) -> JoinHandle<()>;

    fn name(&self) -> &'static str;
}

fn open_in_browser(url: &str) -> WatchResult<()> {
    open::that_detached(url)
        .map_err(|e| WatchError::Transport(format!("failed to open {}: {}", url, e)))
}

pub struct StandaloneDetector {
    client_url: String,
}

impl StandaloneDetector {
    pub fn new(client_url: impl Into<String>) -> Self {
        Self {
            client_url: client_url.into(),
        }
    }
}

#[async_trait]
impl ClientDetector for StandaloneDetector {
    async fn is_finesse_open(&self) -> bool {
        true
    }

    async fn focus_finesse_tab(&self) -> WatchResult<()> {
        info!("Opening Finesse client at {}", self.client_url);
        open_in_browser(&self.client_url)
    }

    /// Nothing to observe; the task ends immediately.
    fn start_tab_monitoring(&self, _callback: TabCallback) -> JoinHandle<()> {
        tokio::spawn(async {})
    }

    fn name(&self) -> &'static str {
        "standalone"
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DevToolsTarget {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

#[derive(Clone)]
pub struct DevToolsDetector {
    http: reqwest::Client,
    devtools_url: String,
    client_urls: Vec<String>,
    poll_interval: Duration,
}

impl DevToolsDetector {
    pub fn new(http: reqwest::Client, devtools_url: &str, client_urls: Vec<String>) -> Self {
        Self {
            http,
            devtools_url: devtools_url.trim_end_matches('/').to_string(),
            client_urls,
            poll_interval: TAB_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn list_targets(&self) -> WatchResult<Vec<DevToolsTarget>> {
        let response = self
            .http
            .get(format!("{}/json/list", self.devtools_url))
            .send()
            .await
            .map_err(|e| WatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(WatchError::Server {
                status: response.status().as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| WatchError::Protocol(format!("bad DevTools target list: {}", e)))
    }

    fn matching(&self, targets: Vec<DevToolsTarget>) -> Vec<DevToolsTarget> {
        targets
            .into_iter()
            .filter(|t| t.kind == "page")
            .filter(|t| self.client_urls.iter().any(|prefix| t.url.starts_with(prefix)))
            .collect()
    }

    async fn matching_tabs(&self) -> WatchResult<Vec<DevToolsTarget>> {
        Ok(self.matching(self.list_targets().await?))
    }

    pub async fn probe(&self) -> bool {
        self.list_targets().await.is_ok()
    }

    async fn open_new_tab(&self) -> WatchResult<()> {
        let Some(url) = self.client_urls.first() else {
            return Err(WatchError::Config("no Finesse client URL configured".into()));
        };
        let response = self
            .http
            .put(format!(
                "{}/json/new?{}",
                self.devtools_url,
                urlencoding::encode(url)
            ))
            .send()
            .await
            .map_err(|e| WatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(WatchError::Server {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClientDetector for DevToolsDetector {
    /// Falls back to "open" when the browser cannot be inspected.
    async fn is_finesse_open(&self) -> bool {
        match self.matching_tabs().await {
            Ok(tabs) => !tabs.is_empty(),
            Err(e) => {
                debug!("DevTools unavailable ({}); assuming client is open", e);
                true
            }
        }
    }

    async fn focus_finesse_tab(&self) -> WatchResult<()> {
        let tabs = self.matching_tabs().await?;
        match tabs.first() {
            Some(tab) => {
                let response = self
                    .http
                    .get(format!("{}/json/activate/{}", self.devtools_url, tab.id))
                    .send()
                    .await
                    .map_err(|e| WatchError::Transport(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(WatchError::Server {
                        status: response.status().as_u16(),
                    });
                }
                debug!(tab = %tab.id, "Focused Finesse tab");
                Ok(())
            }
            None => {
                info!("No Finesse tab open; opening a new one");
                self.open_new_tab().await
            }
        }
    }

    fn start_tab_monitoring(&self, callback: TabCallback) -> JoinHandle<()> {
        let detector = self.clone();
        tokio::spawn(async move {
            let mut last: Option<BTreeSet<(String, String)>> = None;
            let mut ticker = tokio::time::interval(detector.poll_interval);
            loop {
                ticker.tick().await;
                let tabs = match detector.matching_tabs().await {
                    Ok(tabs) => tabs,
                    Err(e) => {
                        debug!("Tab poll failed: {}", e);
                        continue;
                    }
                };
                let current: BTreeSet<(String, String)> =
                    tabs.into_iter().map(|t| (t.id, t.url)).collect();
                if last.as_ref() != Some(&current) {
                    if last.is_some() {
                        callback(!current.is_empty());
                    }
                    last = Some(current);
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "devtools"
    }
}

/// DevTools when configured and reachable, standalone otherwise.
pub async fn select_detector(config: &AppConfig, http: reqwest::Client) -> Arc<dyn ClientDetector> {
    let client_url = config
        .client_urls
        .first()
        .cloned()
        .unwrap_or_else(|| config.primary_url.clone());

    if let Some(devtools_url) = &config.devtools_url {
        let detector = DevToolsDetector::new(http, devtools_url, config.client_urls.clone());
        if detector.probe().await {
            info!("Using browser DevTools at {} for client detection", devtools_url);
            return Arc::new(detector);
        }
        warn!(
            "DevTools endpoint {} is not reachable; falling back to standalone detection",
            devtools_url
        );
    }
    Arc::new(StandaloneDetector::new(client_url))
}
