//! Request and response bodies of the backend's HTTP surface.

use serde::{Deserialize, Serialize};

use crate::{Kind, Role};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCreateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting_sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub last_active_at: String,
}

impl SessionInfo {
    pub fn created_at_time(&self) -> chrono::DateTime<chrono::Utc> {
        parse_timestamp(&self.created_at)
    }

    pub fn last_active_at_time(&self) -> chrono::DateTime<chrono::Utc> {
        parse_timestamp(&self.last_active_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminSessionInfo {
    #[serde(flatten)]
    pub session: SessionInfo,
    pub api_key_id: String,
    #[serde(default)]
    pub claude_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub kind: Option<Kind>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: String,
}

impl MessageInfo {
    pub fn created_at_time(&self) -> chrono::DateTime<chrono::Utc> {
        parse_timestamp(&self.created_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting_sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_display_mode: Option<crate::ProcessDisplayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub policy: Option<ApiKeyPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCreateResponse {
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub expires_at: String,
    #[serde(default)]
    pub policy: Option<ApiKeyPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminSessionListResponse {
    pub sessions: Vec<AdminSessionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyListResponse {
    pub api_keys: Vec<ApiKeyInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTitleResponse {
    pub title: String,
}

// Unparseable server timestamps fall back to now rather than failing the
// whole response.
fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}
