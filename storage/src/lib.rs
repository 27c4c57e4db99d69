pub mod sqlite;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use chatbridge_models::configuration::StorageConfig;
use sqlite::Sqlite;

pub use store::ChatStore;

/// Well-known state keys.
pub mod keys {
    pub const CONNECTIONS: &str = "connections";
    pub const ACTIVE_CONNECTION: &str = "active_connection";
    pub const CONVERSATIONS: &str = "conversations";
    pub const ACTIVE_CONVERSATION: &str = "active_conversation";
    pub const PREFERENCES: &str = "preferences";
    pub const ADMIN_KEYS: &str = "admin_keys";
}

/// Flat key-value persistence for client state. Values are JSON strings;
/// callers own the serialization.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

pub type ArcStateStore = Arc<dyn StateStore + Send + Sync>;

pub async fn new_storage(config: &StorageConfig) -> Result<ArcStateStore> {
    let storage = Sqlite::new(config.path.as_deref()).await?;
    storage.run_migration().await?;
    Ok(Arc::new(storage))
}

/// Fire-and-forget JSON write of one state key. Serialization and storage
/// failures are logged and otherwise ignored; outside a runtime the write
/// is skipped.
pub fn persist_json<T: serde::Serialize>(state: &ArcStateStore, key: &'static str, value: &T) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(err) => {
            log::warn!("failed to serialize {}: {}", key, err);
            return;
        }
    };
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        log::debug!("no runtime available, skipping persistence of {}", key);
        return;
    };
    let state = Arc::clone(state);
    handle.spawn(async move {
        if let Err(err) = state.set(key, &raw).await {
            log::warn!("failed to persist {}: {}", key, err);
        }
    });
}
