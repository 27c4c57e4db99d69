use super::*;

#[test]
fn test_title_derived_from_first_user_message() {
    let mut convo = Conversation::new();
    convo.add_message(Message::new_user("m1", "Hello, world!"));
    assert_eq!(convo.title(), "Hello, world!");

    // A second message never re-derives the title.
    convo.add_message(Message::new_user("m2", "Something else entirely"));
    assert_eq!(convo.title(), "Hello, world!");
}

#[test]
fn test_title_truncated_at_30_chars() {
    let mut convo = Conversation::new();
    let content = "a".repeat(45);
    convo.add_message(Message::new_user("m1", content.clone()));
    assert_eq!(convo.title(), format!("{}...", "a".repeat(30)));

    let mut convo = Conversation::new();
    convo.add_message(Message::new_user("m1", "a".repeat(30)));
    assert_eq!(convo.title(), "a".repeat(30));
}

#[test]
fn test_title_not_derived_from_non_message_kinds() {
    let mut convo = Conversation::new();
    convo.add_message(Message::new_assistant("m1", "assistant first"));
    assert_eq!(convo.title(), DEFAULT_TITLE);

    let mut convo = Conversation::new();
    convo.add_message(Message::new_user("m1", "status first").with_kind(Kind::Status));
    assert_eq!(convo.title(), DEFAULT_TITLE);
}

#[test]
fn test_session_id_defaults_to_id() {
    let convo = Conversation::new().with_id("abc");
    assert_eq!(convo.session_id(), "abc");

    let convo = Conversation::new()
        .with_session_id("remote")
        .with_id("local");
    assert_eq!(convo.id(), "local");
    assert_eq!(convo.session_id(), "remote");
}

#[test]
fn test_message_lookup_by_id() {
    let mut convo = Conversation::new();
    convo.add_message(Message::new_user("m1", "hi"));
    convo.add_message(Message::new_assistant("m2", "hello"));

    assert_eq!(convo.message("m2").unwrap().content(), "hello");
    assert!(convo.message("missing").is_none());

    convo.message_mut("m2").unwrap().append(" there");
    assert_eq!(convo.message("m2").unwrap().content(), "hello there");
}
