#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use eyre::{Context, Result};
use log::{debug, warn};

use chatbridge_models::wire::SessionInfo;
use chatbridge_models::{Conversation, Message, MessageUpdate};

use crate::{ArcStateStore, keys};

const UNKNOWN_CONNECTION: &str = "unknown";

/// The authoritative collection of conversations and the single writer to
/// it. Every mutation replaces the affected conversation wholesale, so a
/// caller holding a clone of a previous "current" conversation never sees
/// it change underneath; fresh state is only observable through the
/// accessors.
///
/// Mutations are synchronous; persistence is scheduled on the side and
/// failures are logged, never surfaced to the mutation that caused them.
pub struct ChatStore {
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    state: Option<ArcStateStore>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            conversations: Vec::new(),
            current_id: None,
            state: None,
        }
    }

    pub fn with_state_store(mut self, state: ArcStateStore) -> Self {
        self.state = Some(state);
        self
    }

    /// Restores conversations and the active conversation id from the
    /// state store. Absent or unreadable state leaves the store empty.
    pub async fn load(&mut self) -> Result<()> {
        let state = match &self.state {
            Some(state) => state,
            None => return Ok(()),
        };

        if let Some(raw) = state.get(keys::CONVERSATIONS).await? {
            let conversations: Vec<Conversation> =
                serde_json::from_str(&raw).wrap_err("parsing stored conversations")?;
            self.conversations = conversations
                .into_iter()
                .map(|conv| {
                    // Records written before connections existed carry no
                    // connection id.
                    if conv.connection_id().is_empty() {
                        conv.with_connection_id(UNKNOWN_CONNECTION)
                    } else {
                        conv
                    }
                })
                .collect();
        }

        if let Some(current_id) = state.get(keys::ACTIVE_CONVERSATION).await? {
            if self.conversations.iter().any(|c| c.id() == current_id) {
                self.current_id = Some(current_id);
            }
        }
        Ok(())
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversations_for(&self, connection_id: &str) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|conv| conv.connection_id() == connection_id)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|conv| conv.id() == id)
    }

    pub fn current(&self) -> Option<&Conversation> {
        let id = self.current_id.as_deref()?;
        self.get(id)
    }

    pub fn set_current(&mut self, id: Option<&str>) {
        self.current_id = id.map(|id| id.to_string());
        self.persist();
    }

    /// Insert-or-replace by id; the conversation becomes current.
    pub fn create_conversation(&mut self, conversation: Conversation) {
        self.current_id = Some(conversation.id().to_string());
        match self
            .conversations
            .iter_mut()
            .find(|conv| conv.id() == conversation.id())
        {
            Some(existing) => *existing = conversation,
            None => self.conversations.insert(0, conversation),
        }
        self.persist();
    }

    /// Appends a message to the current conversation. A no-op without one.
    pub fn add_message(&mut self, message: Message) {
        let Some(current_id) = self.current_id.clone() else {
            return;
        };
        self.replace(&current_id, |conv| conv.add_message(message));
    }

    /// Shallow-merges the update into the message with this id inside the
    /// current conversation.
    pub fn update_message(&mut self, message_id: &str, update: &MessageUpdate) {
        let Some(current_id) = self.current_id.clone() else {
            return;
        };
        self.replace(&current_id, |conv| {
            if let Some(msg) = conv.message_mut(message_id) {
                msg.apply(update);
            }
            conv.touch();
        });
    }

    pub fn rename_conversation(&mut self, conversation_id: &str, title: &str) {
        self.replace(conversation_id, |conv| {
            conv.set_title(title);
            conv.touch();
        });
    }

    /// Wholesale replacement of a conversation's message log, used after a
    /// history load.
    pub fn set_messages(&mut self, conversation_id: &str, messages: Vec<Message>) {
        self.replace(conversation_id, |conv| {
            conv.set_messages(messages);
            conv.touch();
        });
    }

    /// Reconciles this connection's conversations against the server's
    /// session list. Sessions already known locally keep their cached
    /// message log; unknown ones appear with an empty log; local
    /// conversations absent from the list are dropped. Conversations of
    /// other connections are untouched.
    pub fn sync_conversations(&mut self, connection_id: &str, sessions: &[SessionInfo]) {
        let mut next: Vec<Conversation> = sessions
            .iter()
            .map(|session| {
                match self
                    .conversations
                    .iter()
                    .find(|conv| conv.connection_id() == connection_id && conv.id() == session.id)
                {
                    Some(existing) => {
                        let title = session
                            .title
                            .clone()
                            .filter(|t| !t.is_empty())
                            .unwrap_or_else(|| existing.title().to_string());
                        existing
                            .clone()
                            .with_title(title)
                            .with_cwd(Some(session.cwd.clone()))
                            .with_created_at(session.created_at_time())
                            .with_updated_at(session.last_active_at_time())
                    }
                    None => {
                        let mut conv = Conversation::new()
                            .with_id(session.id.clone())
                            .with_connection_id(connection_id)
                            .with_cwd(Some(session.cwd.clone()))
                            .with_created_at(session.created_at_time())
                            .with_updated_at(session.last_active_at_time());
                        if let Some(title) = session.title.clone().filter(|t| !t.is_empty()) {
                            conv = conv.with_title(title);
                        }
                        conv
                    }
                }
            })
            .collect();

        let others = self
            .conversations
            .iter()
            .filter(|conv| conv.connection_id() != connection_id)
            .cloned();
        next.extend(others);
        self.conversations = next;
        self.persist();
    }

    pub fn delete_conversation(&mut self, id: &str) {
        self.conversations.retain(|conv| conv.id() != id);
        if self.current_id.as_deref() == Some(id) {
            self.current_id = None;
        }
        self.persist();
    }

    /// Writes the current snapshot through the state store. The returned
    /// future owns its snapshot, so it can be awaited after a lock guarding
    /// the store has been released.
    pub fn save(&self) -> impl std::future::Future<Output = Result<()>> + 'static {
        let state = self.state.clone();
        let conversations = self.conversations.clone();
        let current_id = self.current_id.clone();
        async move {
            let Some(state) = state else {
                return Ok(());
            };
            let raw =
                serde_json::to_string(&conversations).wrap_err("serializing conversations")?;
            state.set(keys::CONVERSATIONS, &raw).await?;
            match &current_id {
                Some(id) => state.set(keys::ACTIVE_CONVERSATION, id).await?,
                None => state.remove(keys::ACTIVE_CONVERSATION).await?,
            }
            Ok(())
        }
    }

    // Copy-on-write: clone the conversation, apply the mutation, swap the
    // clone in.
    fn replace<F>(&mut self, conversation_id: &str, mutate: F)
    where
        F: FnOnce(&mut Conversation),
    {
        let Some(pos) = self
            .conversations
            .iter()
            .position(|conv| conv.id() == conversation_id)
        else {
            return;
        };
        let mut updated = self.conversations[pos].clone();
        mutate(&mut updated);
        self.conversations[pos] = updated;
        self.persist();
    }

    // Fire-and-forget snapshot write. Outside a runtime (pure in-memory
    // usage) persistence is skipped.
    fn persist(&self) {
        let Some(state) = self.state.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available, skipping state persistence");
            return;
        };

        let conversations = self.conversations.clone();
        let current_id = self.current_id.clone();
        handle.spawn(async move {
            let raw = match serde_json::to_string(&conversations) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("failed to serialize conversations: {}", err);
                    return;
                }
            };
            if let Err(err) = state.set(keys::CONVERSATIONS, &raw).await {
                warn!("failed to persist conversations: {}", err);
            }
            let res = match current_id {
                Some(id) => state.set(keys::ACTIVE_CONVERSATION, &id).await,
                None => state.remove(keys::ACTIVE_CONVERSATION).await,
            };
            if let Err(err) = res {
                warn!("failed to persist active conversation: {}", err);
            }
        });
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
