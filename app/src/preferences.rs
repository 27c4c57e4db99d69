use eyre::Result;
use serde::{Deserialize, Serialize};

use chatbridge_models::ProcessDisplayMode;
use chatbridge_storage::{ArcStateStore, keys, persist_json};

/// User-facing knobs that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub process_display_mode: ProcessDisplayMode,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: default_language(),
            process_display_mode: ProcessDisplayMode::default(),
        }
    }
}

impl Preferences {
    pub async fn load(state: &ArcStateStore) -> Result<Self> {
        let Some(raw) = state.get(keys::PREFERENCES).await? else {
            return Ok(Self::default());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    pub fn persist(&self, state: &ArcStateStore) {
        persist_json(state, keys::PREFERENCES, self);
    }
}
