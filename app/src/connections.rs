#[cfg(test)]
#[path = "connections_test.rs"]
mod tests;

use std::collections::HashMap;

use eyre::Result;
use log::warn;

use chatbridge_client::BackendClient;
use chatbridge_models::ApiConnection;
use chatbridge_storage::{ArcStateStore, keys, persist_json};

/// Holds the configured backend connections and which one is active.
/// Admin keys live beside the connections, keyed by connection id, and are
/// never embedded in the connection record itself.
#[derive(Default)]
pub struct ConnectionManager {
    connections: Vec<ApiConnection>,
    active_id: Option<String>,
    admin_keys: HashMap<String, String>,
    state: Option<ArcStateStore>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_store(mut self, state: ArcStateStore) -> Self {
        self.state = Some(state);
        self
    }

    pub async fn load(&mut self) -> Result<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        if let Some(raw) = state.get(keys::CONNECTIONS).await? {
            self.connections = serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("discarding unreadable connections snapshot: {}", err);
                Vec::new()
            });
        }
        if let Some(raw) = state.get(keys::ADMIN_KEYS).await? {
            self.admin_keys = serde_json::from_str(&raw).unwrap_or_default();
        }
        if let Some(id) = state.get(keys::ACTIVE_CONNECTION).await? {
            if self.connections.iter().any(|c| c.id() == id) {
                self.active_id = Some(id);
            }
        }
        Ok(())
    }

    pub fn connections(&self) -> &[ApiConnection] {
        &self.connections
    }

    pub fn get(&self, id: &str) -> Option<&ApiConnection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn active(&self) -> Option<&ApiConnection> {
        let id = self.active_id.as_deref()?;
        self.get(id)
    }

    /// True when the active connection exists and has passed verification.
    pub fn is_configured(&self) -> bool {
        self.active().is_some_and(|c| c.verified())
    }

    /// Newest connections go first; a connection sharing an id with an
    /// existing one replaces it in place.
    pub fn add(&mut self, connection: ApiConnection) {
        match self.connections.iter().position(|c| c.id() == connection.id()) {
            Some(index) => self.connections[index] = connection,
            None => self.connections.insert(0, connection),
        }
        self.persist();
    }

    pub fn update(&mut self, connection: ApiConnection) {
        if let Some(existing) = self
            .connections
            .iter_mut()
            .find(|c| c.id() == connection.id())
        {
            *existing = connection;
            self.persist();
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.connections.retain(|c| c.id() != id);
        self.admin_keys.remove(id);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        self.persist();
    }

    pub fn set_active(&mut self, id: Option<&str>) {
        self.active_id = match id {
            Some(id) if self.connections.iter().any(|c| c.id() == id) => Some(id.to_string()),
            _ => None,
        };
        self.persist();
    }

    /// Probes the connection and stamps the verification result on it.
    /// Returns the probe outcome, or None for an unknown id.
    pub async fn verify(&mut self, id: &str) -> Option<bool> {
        let client =
            BackendClient::from(self.get(id)?).with_timeout(std::time::Duration::from_secs(5));
        let verified = client.test_connection().await;
        if let Some(connection) = self.connections.iter_mut().find(|c| c.id() == id) {
            connection.mark_checked(verified);
        }
        self.persist();
        Some(verified)
    }

    pub fn admin_key(&self, connection_id: &str) -> Option<&str> {
        self.admin_keys.get(connection_id).map(String::as_str)
    }

    pub fn set_admin_key(&mut self, connection_id: &str, admin_key: Option<&str>) {
        match admin_key {
            Some(key) if !key.is_empty() => {
                self.admin_keys
                    .insert(connection_id.to_string(), key.to_string());
            }
            _ => {
                self.admin_keys.remove(connection_id);
            }
        }
        self.persist();
    }

    fn persist(&self) {
        let Some(state) = &self.state else {
            return;
        };
        persist_json(state, keys::CONNECTIONS, &self.connections);
        persist_json(state, keys::ADMIN_KEYS, &self.admin_keys);

        // The active id is stored raw, matching the conversation store.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = std::sync::Arc::clone(state);
        let active_id = self.active_id.clone();
        handle.spawn(async move {
            let result = match &active_id {
                Some(id) => state.set(keys::ACTIVE_CONNECTION, id).await,
                None => state.remove(keys::ACTIVE_CONNECTION).await,
            };
            if let Err(err) = result {
                warn!("failed to persist active connection: {}", err);
            }
        });
    }
}
