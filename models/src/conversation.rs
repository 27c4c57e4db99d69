#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Kind, Message, Role};

pub const DEFAULT_TITLE: &str = "New chat";
const TITLE_MAX_LEN: usize = 30;

/// One chat thread bound to exactly one backend connection. The session id
/// is the server-side identifier and normally equals the conversation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    connection_id: String,
    title: String,
    messages: Vec<Message>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        // The session id follows the id unless it was set independently.
        if self.session_id.is_empty() || self.session_id == self.id {
            self.session_id = id.clone();
        }
        self.id = id;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = connection_id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_created_at(mut self, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_updated_at(mut self, updated_at: chrono::DateTime<chrono::Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.updated_at
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Appends a message, deriving the title from the first plain user
    /// message when the conversation is still untitled.
    pub fn add_message(&mut self, message: Message) {
        if self.messages.is_empty()
            && message.role() == Role::User
            && message.kind() == Kind::Message
        {
            self.title = derive_title(message.content());
        }
        self.messages.push(message);
        self.touch();
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|msg| msg.id() == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|msg| msg.id() == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        Self {
            session_id: id.clone(),
            id,
            connection_id: String::new(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            cwd: None,
        }
    }
}

fn derive_title(content: &str) -> String {
    let mut title: String = content.chars().take(TITLE_MAX_LEN).collect();
    if content.chars().count() > TITLE_MAX_LEN {
        title.push_str("...");
    }
    title
}
