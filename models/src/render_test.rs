use super::*;

fn user(id: &str, content: &str) -> Message {
    Message::new_user(id, content)
}

fn assistant(id: &str, kind: Kind) -> Message {
    Message::new_assistant(id, "").with_kind(kind)
}

#[test]
fn test_user_turn_with_status_and_result() {
    let messages = vec![
        user("u1", "hello"),
        assistant("a1", Kind::Status),
        assistant("a2", Kind::Result),
    ];

    let blocks = render_blocks(&messages);
    assert_eq!(blocks.len(), 2);

    match &blocks[0] {
        RenderBlock::User(msg) => assert_eq!(msg.id(), "u1"),
        other => panic!("expected user block, got {:?}", other),
    }
    match &blocks[1] {
        RenderBlock::Assistant(turn) => {
            assert_eq!(turn.id, "assistant-u1");
            assert_eq!(turn.thinking.len(), 1);
            assert_eq!(turn.thinking[0].id(), "a1");
            assert_eq!(turn.results.len(), 1);
            assert_eq!(turn.results[0].id(), "a2");
            assert!(turn.extras.is_empty());
        }
        other => panic!("expected assistant block, got {:?}", other),
    }
}

#[test]
fn test_lone_user_message_emits_single_block() {
    let blocks = render_blocks(&[user("u1", "hello")]);
    assert_eq!(blocks.len(), 1);
    assert!(matches!(&blocks[0], RenderBlock::User(msg) if msg.id() == "u1"));
}

#[test]
fn test_consecutive_user_messages() {
    let blocks = render_blocks(&[user("u1", "first"), user("u2", "second")]);
    assert_eq!(blocks.len(), 2);
    assert!(matches!(&blocks[0], RenderBlock::User(msg) if msg.id() == "u1"));
    assert!(matches!(&blocks[1], RenderBlock::User(msg) if msg.id() == "u2"));
}

#[test]
fn test_assistant_items_before_any_user_turn() {
    // Assistant activity with no anchoring user message still groups into
    // an assistant block whose id comes from the first thinking item.
    let messages = vec![
        assistant("a1", Kind::Status),
        assistant("a2", Kind::Result),
    ];

    let blocks = render_blocks(&messages);
    assert_eq!(blocks.len(), 1);
    match &blocks[0] {
        RenderBlock::Assistant(turn) => {
            assert_eq!(turn.id, "a1");
            assert_eq!(turn.thinking.len(), 1);
            assert_eq!(turn.results.len(), 1);
        }
        other => panic!("expected assistant block, got {:?}", other),
    }
}

#[test]
fn test_orphan_system_message_becomes_other_block() {
    let messages = vec![
        Message::new("s1", Role::System, "system note"),
        user("u1", "hello"),
        assistant("a1", Kind::Result),
    ];

    let blocks = render_blocks(&messages);
    assert_eq!(blocks.len(), 3);
    assert!(matches!(&blocks[0], RenderBlock::Other(msg) if msg.id() == "s1"));
    assert!(matches!(&blocks[1], RenderBlock::User(_)));
    assert!(matches!(&blocks[2], RenderBlock::Assistant(_)));
}

#[test]
fn test_system_message_inside_open_turn_is_an_extra() {
    let messages = vec![
        user("u1", "hello"),
        Message::new("s1", Role::System, "note"),
        assistant("a1", Kind::Result),
    ];

    let blocks = render_blocks(&messages);
    assert_eq!(blocks.len(), 2);
    match &blocks[1] {
        RenderBlock::Assistant(turn) => {
            assert_eq!(turn.extras.len(), 1);
            assert_eq!(turn.extras[0].id(), "s1");
            assert_eq!(turn.results.len(), 1);
        }
        other => panic!("expected assistant block, got {:?}", other),
    }
}

#[test]
fn test_thinking_phase_classification() {
    let messages = vec![
        user("u1", "hello"),
        assistant("a1", Kind::Thinking),
        assistant("a2", Kind::Status),
        assistant("a3", Kind::ToolUse),
        assistant("a4", Kind::ToolResult),
        Message::new_assistant("a5", "plain answer"),
    ];

    let blocks = render_blocks(&messages);
    assert_eq!(blocks.len(), 2);
    match &blocks[1] {
        RenderBlock::Assistant(turn) => {
            let thinking: Vec<&str> = turn.thinking.iter().map(|m| m.id()).collect();
            assert_eq!(thinking, ["a1", "a2", "a3", "a4"]);
            // A plain assistant message counts as a result.
            assert_eq!(turn.results.len(), 1);
            assert_eq!(turn.results[0].id(), "a5");
        }
        other => panic!("expected assistant block, got {:?}", other),
    }
}

#[test]
fn test_user_kind_status_does_not_start_a_turn() {
    let messages = vec![
        user("u1", "hello"),
        assistant("a1", Kind::Result),
        Message::new_user("u2", "").with_kind(Kind::Status),
    ];

    // The user status entry stays inside the open turn as an extra rather
    // than flushing it.
    let blocks = render_blocks(&messages);
    assert_eq!(blocks.len(), 2);
    match &blocks[1] {
        RenderBlock::Assistant(turn) => {
            assert_eq!(turn.results.len(), 1);
            assert_eq!(turn.extras.len(), 1);
            assert_eq!(turn.extras[0].id(), "u2");
        }
        other => panic!("expected assistant block, got {:?}", other),
    }
}

#[test]
fn test_turn_id_stable_across_rerenders() {
    let messages = vec![
        user("u1", "hello"),
        assistant("a1", Kind::Status),
    ];

    let first = render_blocks(&messages);
    let mut extended = messages.clone();
    extended.push(assistant("a2", Kind::Result));
    let second = render_blocks(&extended);

    let id_of = |blocks: &[RenderBlock]| match &blocks[1] {
        RenderBlock::Assistant(turn) => turn.id.clone(),
        other => panic!("expected assistant block, got {:?}", other),
    };
    assert_eq!(id_of(&first), id_of(&second));
}
