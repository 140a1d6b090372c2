use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

use crate::core::error::{WatchError, WatchResult};
use crate::core::finesse::xml::{child, child_text};

static AGENT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}\.\d{3}\.\d{3}$").expect("valid agent id pattern"));

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

pub const MIN_PASSWORD_LEN: usize = 4;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub agent_id: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("agent_id", &self.agent_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        agent_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into().trim().to_string(),
            agent_id: agent_id.into().trim().to_string(),
            password: password.into(),
        }
    }

    /// Client-side shape checks, run before any network call.
    pub fn validate(&self, allowed_domains: &[String]) -> WatchResult<()> {
        if !EMAIL_PATTERN.is_match(&self.username) {
            return Err(WatchError::validation("username must be an email address"));
        }
        let username = self.username.to_lowercase();
        if !allowed_domains.is_empty()
            && !allowed_domains
                .iter()
                .any(|domain| username.ends_with(&format!("@{}", domain.to_lowercase())))
        {
            return Err(WatchError::validation(format!(
                "email domain is not allowed (expected one of: {})",
                allowed_domains.join(", ")
            )));
        }
        if !AGENT_ID_PATTERN.is_match(&self.agent_id) {
            return Err(WatchError::validation(
                "agent id must match the pattern 00.000.000",
            ));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(WatchError::validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentState {
    Ready,
    NotReady,
    WorkReady,
    Work,
    Talking,
    Reserved,
    Hold,
    Logout,
    Other(String),
}

impl AgentState {
    pub fn as_str(&self) -> &str {
        match self {
            AgentState::Ready => "READY",
            AgentState::NotReady => "NOT_READY",
            AgentState::WorkReady => "WORK_READY",
            AgentState::Work => "WORK",
            AgentState::Talking => "TALKING",
            AgentState::Reserved => "RESERVED",
            AgentState::Hold => "HOLD",
            AgentState::Logout => "LOGOUT",
            AgentState::Other(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().replace('-', "_").as_str() {
            "READY" => AgentState::Ready,
            "NOT_READY" => AgentState::NotReady,
            "WORK_READY" => AgentState::WorkReady,
            "WORK" => AgentState::Work,
            "TALKING" => AgentState::Talking,
            "RESERVED" => AgentState::Reserved,
            "HOLD" => AgentState::Hold,
            "LOGOUT" => AgentState::Logout,
            _ => AgentState::Other(raw.trim().to_string()),
        }
    }
}

impl From<String> for AgentState {
    fn from(raw: String) -> Self {
        AgentState::parse(&raw)
    }
}

impl From<AgentState> for String {
    fn from(state: AgentState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the agent's remote state. Replaced wholesale on every
/// successful poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub state: AgentState,
    pub reason_code_id: Option<i64>,
    pub reason_label: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub login_id: Option<String>,
    pub extension: Option<String>,
    pub state_change_time: Option<String>,
    pub pending_state: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl AgentStatus {
    pub fn new(state: AgentState) -> Self {
        Self {
            state,
            reason_code_id: None,
            reason_label: None,
            first_name: None,
            last_name: None,
            login_id: None,
            extension: None,
            state_change_time: None,
            pending_state: None,
        }
    }

    /// Build from the parsed `<User>` document.
    pub fn from_document(doc: &Value) -> WatchResult<Self> {
        let user = child(doc, "User")
            .ok_or_else(|| WatchError::Protocol("response has no User element".into()))?;
        let state = child_text(user, "state")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WatchError::Protocol("User element has no state".into()))?;

        let reason_code_id = child_text(user, "reasonCodeId")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .or_else(|| {
                child(user, "reasonCode")
                    .and_then(|rc| child_text(rc, "id"))
                    .and_then(|raw| raw.trim().parse::<i64>().ok())
            });
        let reason_label = child(user, "reasonCode").and_then(|rc| child_text(rc, "label"));

        Ok(Self {
            state: AgentState::parse(&state),
            reason_code_id,
            reason_label: non_empty(reason_label),
            first_name: non_empty(child_text(user, "firstName")),
            last_name: non_empty(child_text(user, "lastName")),
            login_id: non_empty(child_text(user, "loginId")),
            extension: non_empty(child_text(user, "extension")),
            state_change_time: non_empty(child_text(user, "stateChangeTime")),
            pending_state: non_empty(child_text(user, "pendingState")),
        })
    }

    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.login_id.clone().unwrap_or_else(|| "agent".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCode {
    pub id: i64,
    pub label: String,
    pub category: String,
    pub for_all: bool,
}

impl ReasonCode {
    /// `id` comes from an `<id>` child, or the last segment of `<uri>`.
    pub fn from_node(node: &Value) -> Option<Self> {
        let id = child_text(node, "id")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .or_else(|| {
                child_text(node, "uri").and_then(|uri| {
                    uri.trim_end_matches('/')
                        .rsplit('/')
                        .next()
                        .and_then(|seg| seg.parse::<i64>().ok())
                })
            })?;
        Some(Self {
            id,
            label: child_text(node, "label").unwrap_or_default(),
            category: child_text(node, "category").unwrap_or_default(),
            for_all: child_text(node, "forAll")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::finesse::xml::parse_xml;

    fn domains() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    #[test]
    fn valid_credentials_pass() {
        let creds = Credentials::new("Jane.Doe@Example.COM", "12.345.678", "s3cret");
        assert!(creds.validate(&domains()).is_ok());
    }

    #[test]
    fn domain_must_match_as_suffix_after_at() {
        let creds = Credentials::new("jane@notexample.com", "12.345.678", "s3cret");
        assert!(matches!(
            creds.validate(&domains()),
            Err(WatchError::Validation(_))
        ));
        let creds = Credentials::new("jane@example.com.evil.io", "12.345.678", "s3cret");
        assert!(creds.validate(&domains()).is_err());
    }

    #[test]
    fn empty_allow_list_accepts_any_domain() {
        let creds = Credentials::new("jane@anywhere.org", "12.345.678", "s3cret");
        assert!(creds.validate(&[]).is_ok());
    }

    #[test]
    fn agent_id_pattern_is_enforced() {
        for bad in ["12345678", "1.345.678", "12.345.6789", "ab.cde.fgh", " 12.345.678x"] {
            let creds = Credentials::new("jane@example.com", bad, "s3cret");
            assert!(creds.validate(&domains()).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn short_password_is_rejected() {
        let creds = Credentials::new("jane@example.com", "12.345.678", "abc");
        assert!(creds.validate(&domains()).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("jane@example.com", "12.345.678", "hunter22");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter22"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn agent_state_roundtrips_through_strings() {
        assert_eq!(AgentState::parse("not_ready"), AgentState::NotReady);
        assert_eq!(AgentState::parse("NOT-READY"), AgentState::NotReady);
        assert_eq!(
            AgentState::parse("BREAK"),
            AgentState::Other("BREAK".to_string())
        );
        let json = serde_json::to_string(&AgentState::WorkReady).unwrap();
        assert_eq!(json, "\"WORK_READY\"");
    }

    #[test]
    fn agent_status_from_user_document() {
        let doc = parse_xml(
            r#"<User>
                <loginId>1234</loginId>
                <firstName>Jane</firstName>
                <lastName>Doe</lastName>
                <state>NOT_READY</state>
                <reasonCodeId>2</reasonCodeId>
                <reasonCode><id>2</id><label>Lunch</label></reasonCode>
                <stateChangeTime>2024-06-03T09:00:00.000Z</stateChangeTime>
                <pendingState></pendingState>
                <extension>5001</extension>
            </User>"#,
        )
        .unwrap();
        let status = AgentStatus::from_document(&doc).unwrap();
        assert_eq!(status.state, AgentState::NotReady);
        assert_eq!(status.reason_code_id, Some(2));
        assert_eq!(status.reason_label.as_deref(), Some("Lunch"));
        assert_eq!(status.first_name.as_deref(), Some("Jane"));
        assert_eq!(status.pending_state, None);
        assert_eq!(status.display_name(), "Jane Doe");
    }

    #[test]
    fn agent_status_without_state_is_protocol_error() {
        let doc = parse_xml("<User><firstName>Jane</firstName></User>").unwrap();
        assert!(matches!(
            AgentStatus::from_document(&doc),
            Err(WatchError::Protocol(_))
        ));
        let doc = parse_xml("<Other/>").unwrap();
        assert!(matches!(
            AgentStatus::from_document(&doc),
            Err(WatchError::Protocol(_))
        ));
    }

    #[test]
    fn reason_code_id_falls_back_to_uri() {
        let doc = parse_xml(
            r#"<ReasonCode>
                <uri>/finesse/api/ReasonCode/17</uri>
                <category>NOT_READY</category>
                <label>Coaching</label>
                <forAll>true</forAll>
            </ReasonCode>"#,
        )
        .unwrap();
        let node = child(&doc, "ReasonCode").unwrap();
        let code = ReasonCode::from_node(node).unwrap();
        assert_eq!(code.id, 17);
        assert_eq!(code.label, "Coaching");
        assert!(code.for_all);
    }
}
