use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How tool activity inside a turn is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessDisplayMode {
    #[default]
    Full,
    Status,
}

/// One configured backend endpoint. Streaming and session operations are
/// only attempted once `verified` has been set by a successful probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConnection {
    id: String,
    name: String,
    base_url: String,
    api_key: String,
    #[serde(default)]
    verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    last_checked_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    process_display_mode: Option<ProcessDisplayMode>,
}

impl ApiConnection {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            base_url: base_url.into(),
            api_key: String::new(),
            verified: false,
            last_checked_at: None,
            process_display_mode: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_process_display_mode(mut self, mode: ProcessDisplayMode) -> Self {
        self.process_display_mode = Some(mode);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn last_checked_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_checked_at
    }

    /// Per-connection rendering override. Falls back to the global
    /// preference when unset.
    pub fn process_display_mode(&self) -> Option<ProcessDisplayMode> {
        self.process_display_mode
    }

    pub fn set_process_display_mode(&mut self, mode: Option<ProcessDisplayMode>) {
        self.process_display_mode = mode;
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into();
        self.verified = false;
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) {
        self.api_key = api_key.into();
        self.verified = false;
    }

    /// Records the outcome of a connectivity probe.
    pub fn mark_checked(&mut self, verified: bool) {
        self.verified = verified;
        self.last_checked_at = Some(chrono::Utc::now());
    }
}
