use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LogConfig {
    #[serde(default = "defaults::log_level")]
    pub level: Option<String>,

    #[serde(default)]
    pub file: Option<LogFile>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LogFile {
    #[serde(default)]
    pub path: String,

    #[serde(default = "defaults::enabled")]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct StorageConfig {
    /// Sqlite database path. In-memory when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChatConfig {
    /// Model name sent on the completions payload.
    #[serde(default = "defaults::model")]
    pub model: String,

    #[serde(default)]
    pub process_display_mode: crate::ProcessDisplayMode,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: defaults::model(),
            process_display_mode: crate::ProcessDisplayMode::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub name: String,

    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub admin_key: Option<String>,

    /// Overrides `chat.process_display_mode` for this connection only.
    #[serde(default)]
    pub process_display_mode: Option<crate::ProcessDisplayMode>,
}

mod defaults {
    pub(super) fn log_level() -> Option<String> {
        Some("info".to_string())
    }

    pub(super) fn enabled() -> bool {
        true
    }

    pub(super) fn model() -> String {
        "claude".to_string()
    }
}
