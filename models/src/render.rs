#[cfg(test)]
#[path = "render_test.rs"]
mod tests;

use crate::{Kind, Message, Role};

/// Assistant-side activity following one user message: the thinking-phase
/// items (status, tool activity, raw reasoning), the result items, and any
/// stray assistant entries. The id is stable across re-renders of the same
/// logical turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub id: String,
    pub thinking: Vec<Message>,
    pub results: Vec<Message>,
    pub extras: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderBlock {
    User(Message),
    Assistant(AssistantTurn),
    Other(Message),
}

enum Classification {
    Thinking,
    Result,
    Other,
}

fn classify_turn_item(message: &Message) -> Classification {
    if message.role() == Role::Assistant {
        return match message.kind() {
            Kind::Result | Kind::Message => Classification::Result,
            Kind::Thinking | Kind::Status | Kind::ToolUse | Kind::ToolResult => {
                Classification::Thinking
            }
        };
    }
    Classification::Other
}

fn is_user_turn_start(message: &Message) -> bool {
    message.role() == Role::User && message.kind() == Kind::Message
}

/// Groups a flat ordered message log into render blocks: each plain user
/// message anchors a turn that absorbs all following assistant activity up
/// to the next user message. Messages outside any turn become standalone
/// `Other` blocks in place.
pub fn render_blocks(messages: &[Message]) -> Vec<RenderBlock> {
    let mut rendered: Vec<RenderBlock> = Vec::new();
    let mut current_user: Option<Message> = None;
    let mut current_items: Vec<Message> = Vec::new();

    fn flush(
        rendered: &mut Vec<RenderBlock>,
        current_user: &mut Option<Message>,
        current_items: &mut Vec<Message>,
    ) {
        if current_user.is_none() && current_items.is_empty() {
            return;
        }

        let user = current_user.take();
        if let Some(user) = &user {
            rendered.push(RenderBlock::User(user.clone()));
        }

        let mut thinking = Vec::new();
        let mut results = Vec::new();
        let mut extras = Vec::new();
        for item in current_items.drain(..) {
            match classify_turn_item(&item) {
                Classification::Thinking => thinking.push(item),
                Classification::Result => results.push(item),
                Classification::Other => extras.push(item),
            }
        }

        if thinking.is_empty() && results.is_empty() && extras.is_empty() {
            return;
        }

        let id = user
            .map(|u| format!("assistant-{}", u.id()))
            .or_else(|| thinking.first().map(|m| m.id().to_string()))
            .or_else(|| results.first().map(|m| m.id().to_string()))
            .unwrap_or_else(|| format!("assistant-{}", rendered.len()));

        rendered.push(RenderBlock::Assistant(AssistantTurn {
            id,
            thinking,
            results,
            extras,
        }));
    }

    for message in messages {
        if is_user_turn_start(message) {
            flush(&mut rendered, &mut current_user, &mut current_items);
            current_user = Some(message.clone());
            current_items.clear();
            continue;
        }

        if current_user.is_some() || message.role() == Role::Assistant {
            current_items.push(message.clone());
            continue;
        }

        rendered.push(RenderBlock::Other(message.clone()));
    }

    flush(&mut rendered, &mut current_user, &mut current_items);
    rendered
}
