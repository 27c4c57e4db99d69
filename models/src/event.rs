use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Role;

/// Payload of a `status` block: where the assistant is in its turn.
/// Known states are `thinking_start`, `thinking_end`, `cancelled` and
/// `error`, but the set is open on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusPayload {
    pub fn cancelled() -> Self {
        Self {
            state: "cancelled".to_string(),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUsePayload {
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The backend reported an explicit error payload inside a nominally
    /// successful stream.
    ServerError,
    /// Transport or parse failure during streaming.
    StreamError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ServerError => write!(f, "server_error"),
            ErrorCode::StreamError => write!(f, "stream_error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct StreamError {
    code: ErrorCode,
    message: String,
}

impl StreamError {
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ServerError,
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::StreamError,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One decoded protocol event. A single stream produces at most one
/// terminal event among `Done` and the fatal `Error` cases.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Role(Role),
    Delta(String),
    Status(StatusPayload),
    ToolUse(ToolUsePayload),
    ToolResult(ToolResultPayload),
    Result(ResultPayload),
    Done,
    Error(StreamError),
}

/// Per-event callbacks for one stream. Every method defaults to a no-op so
/// callers implement only the events they care about. Invocations are
/// serialized on the stream read loop, strictly in arrival order.
pub trait StreamHandlers: Send {
    fn on_role(&mut self, _role: Role) {}
    fn on_delta(&mut self, _delta: &str) {}
    fn on_status(&mut self, _payload: StatusPayload) {}
    fn on_tool_use(&mut self, _payload: ToolUsePayload) {}
    fn on_tool_result(&mut self, _payload: ToolResultPayload) {}
    fn on_result(&mut self, _payload: ResultPayload) {}
    fn on_done(&mut self) {}
    fn on_error(&mut self, _error: StreamError) {}

    fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Role(role) => self.on_role(role),
            StreamEvent::Delta(delta) => self.on_delta(&delta),
            StreamEvent::Status(payload) => self.on_status(payload),
            StreamEvent::ToolUse(payload) => self.on_tool_use(payload),
            StreamEvent::ToolResult(payload) => self.on_tool_result(payload),
            StreamEvent::Result(payload) => self.on_result(payload),
            StreamEvent::Done => self.on_done(),
            StreamEvent::Error(error) => self.on_error(error),
        }
    }
}
