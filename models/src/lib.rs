pub mod configuration;
pub mod connection;
pub mod conversation;
pub mod event;
pub mod message;
pub mod notice;
pub mod render;
pub mod wire;

pub use connection::{ApiConnection, ProcessDisplayMode};
pub use conversation::Conversation;
pub use event::{
    ErrorCode, ResultPayload, StatusPayload, StreamError, StreamEvent, StreamHandlers,
    ToolResultPayload, ToolUsePayload,
};
pub use message::{Kind, Message, MessageUpdate, Role};
pub use notice::{NoticeKind, NoticeMessage};
pub use render::{AssistantTurn, RenderBlock, render_blocks};
