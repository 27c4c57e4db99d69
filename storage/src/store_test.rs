use std::sync::Arc;

use super::*;
use crate::MockStateStore;
use chatbridge_models::{Kind, Message};

fn session(id: &str, title: Option<&str>) -> SessionInfo {
    SessionInfo {
        id: id.to_string(),
        title: title.map(|t| t.to_string()),
        cwd: "/work".to_string(),
        created_at: "2024-05-01T10:00:00Z".to_string(),
        last_active_at: "2024-05-01T11:00:00Z".to_string(),
    }
}

fn store_with_conversation(id: &str, connection_id: &str) -> ChatStore {
    let mut store = ChatStore::new();
    store.create_conversation(
        Conversation::new()
            .with_id(id)
            .with_connection_id(connection_id),
    );
    store
}

#[test]
fn test_create_conversation_becomes_current() {
    let mut store = ChatStore::new();
    assert!(store.current().is_none());

    store.create_conversation(Conversation::new().with_id("c1"));
    assert_eq!(store.current().unwrap().id(), "c1");

    store.create_conversation(Conversation::new().with_id("c2"));
    assert_eq!(store.current().unwrap().id(), "c2");
    assert_eq!(store.conversations().len(), 2);
    // Newest first.
    assert_eq!(store.conversations()[0].id(), "c2");
}

#[test]
fn test_create_conversation_replaces_by_id() {
    let mut store = ChatStore::new();
    store.create_conversation(Conversation::new().with_id("c1").with_title("old"));
    store.create_conversation(Conversation::new().with_id("c1").with_title("new"));

    assert_eq!(store.conversations().len(), 1);
    assert_eq!(store.current().unwrap().title(), "new");
}

#[test]
fn test_add_message_derives_title_once() {
    let mut store = store_with_conversation("c1", "conn1");

    store.add_message(Message::new_user("m1", "a".repeat(40)));
    assert_eq!(store.current().unwrap().title(), format!("{}...", "a".repeat(30)));

    store.add_message(Message::new_user("m2", "short"));
    assert_eq!(store.current().unwrap().title(), format!("{}...", "a".repeat(30)));
    assert_eq!(store.current().unwrap().len(), 2);
}

#[test]
fn test_add_message_without_current_is_noop() {
    let mut store = ChatStore::new();
    store.add_message(Message::new_user("m1", "hello"));
    assert!(store.conversations().is_empty());
}

#[test]
fn test_update_message_by_id() {
    let mut store = store_with_conversation("c1", "conn1");
    store.add_message(
        Message::new_assistant("m1", "")
            .with_kind(Kind::Thinking)
            .with_streaming(true),
    );

    store.update_message("m1", &MessageUpdate::new().with_content("Hi there"));
    let msg = store.current().unwrap().message("m1").unwrap();
    assert_eq!(msg.content(), "Hi there");
    assert!(msg.is_streaming());

    store.update_message("m1", &MessageUpdate::new().with_streaming(false));
    let msg = store.current().unwrap().message("m1").unwrap();
    assert_eq!(msg.content(), "Hi there");
    assert!(!msg.is_streaming());
}

#[test]
fn test_copy_on_write_leaves_old_reference_untouched() {
    let mut store = store_with_conversation("c1", "conn1");
    store.add_message(Message::new_user("m1", "hello"));

    let before = store.current().unwrap().clone();
    store.add_message(Message::new_assistant("m2", "hi"));

    assert_eq!(before.len(), 1);
    assert_eq!(store.current().unwrap().len(), 2);
}

#[test]
fn test_rename_conversation() {
    let mut store = store_with_conversation("c1", "conn1");
    store.rename_conversation("c1", "Renamed");
    assert_eq!(store.current().unwrap().title(), "Renamed");
}

#[test]
fn test_set_messages_replaces_log() {
    let mut store = store_with_conversation("c1", "conn1");
    store.add_message(Message::new_user("m1", "hello"));

    store.set_messages(
        "c1",
        vec![
            Message::new_user("c1-0", "from history"),
            Message::new_assistant("c1-1", "answer"),
        ],
    );

    let messages = store.current().unwrap().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id(), "c1-0");
}

#[test]
fn test_sync_preserves_known_sessions_and_creates_new() {
    let mut store = store_with_conversation("c1", "conn1");
    store.add_message(Message::new_user("m1", "cached"));

    store.sync_conversations("conn1", &[session("c1", Some("Server title")), session("c2", None)]);

    assert_eq!(store.conversations().len(), 2);
    let c1 = store.get("c1").unwrap();
    assert_eq!(c1.title(), "Server title");
    assert_eq!(c1.len(), 1, "cached messages must survive a sync");
    assert_eq!(c1.cwd(), Some("/work"));

    let c2 = store.get("c2").unwrap();
    assert!(c2.is_empty());
    assert_eq!(c2.title(), chatbridge_models::conversation::DEFAULT_TITLE);
    assert_eq!(c2.connection_id(), "conn1");
}

#[test]
fn test_sync_drops_absent_sessions_and_spares_other_connections() {
    let mut store = ChatStore::new();
    store.create_conversation(Conversation::new().with_id("a1").with_connection_id("conn1"));
    store.create_conversation(Conversation::new().with_id("a2").with_connection_id("conn1"));
    store.create_conversation(Conversation::new().with_id("b1").with_connection_id("conn2"));

    store.sync_conversations("conn1", &[session("a2", None)]);

    assert!(store.get("a1").is_none());
    assert!(store.get("a2").is_some());
    assert!(store.get("b1").is_some(), "other connections are untouched");
}

#[test]
fn test_delete_conversation_clears_current() {
    let mut store = store_with_conversation("c1", "conn1");
    store.delete_conversation("c1");
    assert!(store.conversations().is_empty());
    assert!(store.current().is_none());
}

#[tokio::test]
async fn test_load_restores_snapshot() {
    let conversations = vec![
        Conversation::new()
            .with_id("c1")
            .with_connection_id("conn1")
            .with_title("Restored"),
    ];
    let raw = serde_json::to_string(&conversations).unwrap();

    let mut mock = MockStateStore::new();
    mock.expect_get()
        .withf(|key| key == keys::CONVERSATIONS)
        .return_once(move |_| Ok(Some(raw)));
    mock.expect_get()
        .withf(|key| key == keys::ACTIVE_CONVERSATION)
        .return_once(|_| Ok(Some("c1".to_string())));

    let mut store = ChatStore::new().with_state_store(Arc::new(mock));
    store.load().await.expect("failed to load");

    assert_eq!(store.conversations().len(), 1);
    assert_eq!(store.current().unwrap().title(), "Restored");
}

#[tokio::test]
async fn test_save_writes_snapshot() {
    let mut mock = MockStateStore::new();
    mock.expect_set()
        .withf(|key, value| key == keys::CONVERSATIONS && value.contains("\"c1\""))
        .returning(|_, _| Ok(()));
    mock.expect_set()
        .withf(|key, value| key == keys::ACTIVE_CONVERSATION && value == "c1")
        .returning(|_, _| Ok(()));

    let mut store = ChatStore::new().with_state_store(Arc::new(mock));
    store.create_conversation(Conversation::new().with_id("c1"));
    store.save().await.expect("failed to save");
}

#[tokio::test]
async fn test_save_future_outlives_a_store_lock() {
    let mut mock = MockStateStore::new();
    mock.expect_set().returning(|_, _| Ok(()));

    let mut store = ChatStore::new().with_state_store(Arc::new(mock));
    store.create_conversation(Conversation::new().with_id("c1"));
    let store = std::sync::Mutex::new(store);

    // The snapshot is taken under the lock; the write happens after the
    // guard is gone.
    let save = { store.lock().unwrap().save() };
    save.await.expect("failed to save");
}
