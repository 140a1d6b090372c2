mod types;
pub mod xml;

pub use types::{AgentState, AgentStatus, Credentials, ReasonCode};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::{WatchError, WatchResult};
use xml::{api_errors, as_list, child, parse_xml};

pub const NOT_READY_CATEGORY: &str = "NOT_READY";

/// Remote agent API. `FinesseClient` is the HTTP implementation; the monitor
/// only sees this trait.
#[async_trait]
pub trait FinesseApi: Send + Sync {
    async fn connect_api(&self, credentials: &Credentials) -> WatchResult<AgentStatus>;

    async fn change_agent_state(
        &self,
        credentials: &Credentials,
        state: AgentState,
        reason_code_id: Option<i64>,
    ) -> WatchResult<Value>;

    async fn get_reason_codes(&self, credentials: &Credentials) -> WatchResult<Vec<ReasonCode>>;
}

pub struct FinesseClient {
    http: Client,
    primary_url: String,
    fallback_url: String,
    allowed_domains: Vec<String>,
}

fn map_status(status: StatusCode) -> WatchResult<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::UNAUTHORIZED => WatchError::Auth,
        StatusCode::NOT_FOUND => WatchError::NotFound,
        StatusCode::CONFLICT => WatchError::Conflict,
        other => WatchError::Server {
            status: other.as_u16(),
        },
    })
}

/// Parse a response body, turning `<ApiErrors>` into a domain failure.
fn parse_body(body: &str) -> WatchResult<Value> {
    let doc = parse_xml(body)?;
    if let Some(messages) = api_errors(&doc) {
        return Err(WatchError::Api(messages.join("; ")));
    }
    Ok(doc)
}

/// Minimal state-change document.
pub fn state_change_body(state: &AgentState, reason_code_id: Option<i64>) -> String {
    let state = quick_xml::escape::escape(state.as_str());
    match reason_code_id {
        Some(code) => format!(
            "<User><state>{}</state><reasonCodeId>{}</reasonCodeId></User>",
            state, code
        ),
        None => format!("<User><state>{}</state></User>", state),
    }
}

impl FinesseClient {
    pub fn new(config: &AppConfig) -> WatchResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WatchError::Config(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            http,
            primary_url: config.primary_url.trim_end_matches('/').to_string(),
            fallback_url: config.fallback_url.trim_end_matches('/').to_string(),
            allowed_domains: config.allowed_domains.clone(),
        })
    }

    fn endpoints(&self) -> Vec<&str> {
        let mut endpoints = vec![self.primary_url.as_str()];
        if self.fallback_url != self.primary_url {
            endpoints.push(self.fallback_url.as_str());
        }
        endpoints
    }

    /// Run `op` against the primary endpoint, then the fallback if the
    /// primary attempt was not successful. First success wins.
    async fn with_failover<T, F, Fut>(&self, operation: &str, op: F) -> WatchResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = WatchResult<T>>,
    {
        let mut first_error: Option<WatchError> = None;
        for base in self.endpoints() {
            match op(base.to_string()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Finesse {} failed against {}: {}", operation, base, e);
                    // Keep the more specific error when the fallback only
                    // failed to connect.
                    first_error = match first_error {
                        Some(prev) if e.is_connectivity() && !prev.is_connectivity() => Some(prev),
                        _ => Some(e),
                    };
                }
            }
        }
        Err(first_error.unwrap_or(WatchError::Transport("no endpoint configured".into())))
    }

    /// Send with exactly one retry when the first attempt times out.
    async fn send_with_retry<F>(&self, build: F) -> WatchResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        match build().send().await {
            Ok(response) => Ok(response),
            Err(e) if e.is_timeout() => {
                debug!("Request timed out, retrying once");
                match build().send().await {
                    Ok(response) => Ok(response),
                    Err(e) if e.is_timeout() => Err(WatchError::Timeout),
                    Err(e) => Err(WatchError::Transport(e.to_string())),
                }
            }
            Err(e) => Err(WatchError::Transport(e.to_string())),
        }
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        credentials: &Credentials,
        body: Option<&str>,
    ) -> WatchResult<String> {
        let response = self
            .send_with_retry(|| {
                let mut builder = self
                    .http
                    .request(method.clone(), url)
                    .basic_auth(&credentials.username, Some(&credentials.password))
                    .header(reqwest::header::ACCEPT, "application/xml");
                if let Some(body) = body {
                    builder = builder
                        .header(reqwest::header::CONTENT_TYPE, "application/xml")
                        .body(body.to_string());
                }
                builder
            })
            .await?;
        map_status(response.status())?;
        response
            .text()
            .await
            .map_err(|e| WatchError::Transport(format!("failed to read body: {}", e)))
    }

    async fn fetch_user(&self, base: String, credentials: &Credentials) -> WatchResult<AgentStatus> {
        let url = format!("{}/User/{}/", base, credentials.agent_id);
        let body = self.request(Method::GET, &url, credentials, None).await?;
        let doc = parse_body(&body)?;
        AgentStatus::from_document(&doc)
    }

    async fn put_state(
        &self,
        base: String,
        credentials: &Credentials,
        payload: &str,
    ) -> WatchResult<Value> {
        let url = format!("{}/User/{}/", base, credentials.agent_id);
        let body = self
            .request(Method::PUT, &url, credentials, Some(payload))
            .await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        parse_body(&body)
    }

    async fn fetch_reason_codes(
        &self,
        base: String,
        credentials: &Credentials,
    ) -> WatchResult<Vec<ReasonCode>> {
        let url = format!(
            "{}/ReasonCodes?category={}",
            base,
            urlencoding::encode(NOT_READY_CATEGORY)
        );
        let body = self.request(Method::GET, &url, credentials, None).await?;
        let doc = parse_body(&body)?;
        let root = child(&doc, "ReasonCodes")
            .ok_or_else(|| WatchError::Protocol("response has no ReasonCodes element".into()))?;
        Ok(as_list(child(root, "ReasonCode"))
            .into_iter()
            .filter_map(ReasonCode::from_node)
            .filter(|code| code.category.is_empty() || code.category == NOT_READY_CATEGORY)
            .collect())
    }
}

#[async_trait]
impl FinesseApi for FinesseClient {
    async fn connect_api(&self, credentials: &Credentials) -> WatchResult<AgentStatus> {
        credentials.validate(&self.allowed_domains)?;
        let status = self
            .with_failover("connect", |base| self.fetch_user(base, credentials))
            .await?;
        debug!(state = %status.state, reason = ?status.reason_code_id, "agent status fetched");
        Ok(status)
    }

    async fn change_agent_state(
        &self,
        credentials: &Credentials,
        state: AgentState,
        reason_code_id: Option<i64>,
    ) -> WatchResult<Value> {
        credentials.validate(&self.allowed_domains)?;
        let reason_code_id = match state {
            AgentState::NotReady => Some(reason_code_id.ok_or_else(|| {
                WatchError::validation("a reason code is required for NOT_READY")
            })?),
            AgentState::Ready => None,
            AgentState::Logout => reason_code_id,
            ref other => {
                return Err(WatchError::validation(format!(
                    "state {} cannot be set manually",
                    other
                )));
            }
        };
        let payload = state_change_body(&state, reason_code_id);
        let result = self
            .with_failover("state change", |base| self.put_state(base, credentials, &payload))
            .await?;
        info!("Requested agent state {} (reason {:?})", state, reason_code_id);
        Ok(result)
    }

    async fn get_reason_codes(&self, credentials: &Credentials) -> WatchResult<Vec<ReasonCode>> {
        credentials.validate(&self.allowed_domains)?;
        self.with_failover("reason codes", |base| {
            self.fetch_reason_codes(base, credentials)
        })
        .await
    }
}
