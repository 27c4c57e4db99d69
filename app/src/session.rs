#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::{Arc, Mutex};

use eyre::{Result, bail};
use log::{debug, error};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chatbridge_client::BackendClient;
use chatbridge_models::wire::SessionCreateOptions;
use chatbridge_models::{
    ApiConnection, Kind, Message, MessageUpdate, NoticeMessage, ResultPayload, StatusPayload,
    StreamError, StreamHandlers, ToolResultPayload, ToolUsePayload,
};
use chatbridge_storage::ChatStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Cancelling,
}

#[derive(Default)]
struct TurnState {
    state: SessionState,
    /// Set by `stop()`; suppresses the user-visible error of the next
    /// abort-induced `on_error` exactly once.
    stop_requested: bool,
    placeholder_id: Option<String>,
    placeholder_content: String,
    turn_stamp: i64,
    seq: u64,
}

impl TurnState {
    fn next_event_id(&mut self, prefix: &str) -> String {
        let id = format!("msg-{}-{}-{}", self.turn_stamp, prefix, self.seq);
        self.seq += 1;
        id
    }
}

/// Coordinates one conversation's send/stop lifecycle: Idle → Sending →
/// Streaming → Idle, with an explicit cancel path. At most one stream is
/// open at a time; a second `send` while one is in flight is rejected.
pub struct SessionOrchestrator {
    store: Arc<Mutex<ChatStore>>,
    turn: Arc<Mutex<TurnState>>,
    notice_tx: mpsc::UnboundedSender<NoticeMessage>,
    connection: Option<ApiConnection>,
    model: String,
    cancel: Option<CancellationToken>,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<Mutex<ChatStore>>,
        notice_tx: mpsc::UnboundedSender<NoticeMessage>,
    ) -> Self {
        Self {
            store,
            turn: Arc::new(Mutex::new(TurnState::default())),
            notice_tx,
            connection: None,
            model: "claude".to_string(),
            cancel: None,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn set_connection(&mut self, connection: Option<ApiConnection>) {
        self.connection = connection;
    }

    pub fn connection(&self) -> Option<&ApiConnection> {
        self.connection.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.turn.lock().unwrap().state
    }

    pub fn store(&self) -> Arc<Mutex<ChatStore>> {
        Arc::clone(&self.store)
    }

    fn client(&self) -> Result<BackendClient> {
        let connection = match &self.connection {
            Some(connection) if connection.verified() => connection,
            Some(_) => bail!("backend connection is not verified"),
            None => bail!("no backend connection configured"),
        };
        Ok(BackendClient::from(connection).with_model(&self.model))
    }

    /// Pulls the server's session list and reconciles the local
    /// conversations of the active connection against it.
    pub async fn refresh_sessions(&self) -> Result<()> {
        let client = self.client()?;
        let connection_id = self.connection.as_ref().map(|c| c.id().to_string());
        let sessions = client.list_sessions().await?;
        let mut store = self.store.lock().unwrap();
        store.sync_conversations(connection_id.as_deref().unwrap_or_default(), &sessions);
        Ok(())
    }

    /// Creates a server session and the matching local conversation, which
    /// becomes current.
    pub async fn new_session(&self, options: SessionCreateOptions) -> Result<String> {
        let client = self.client()?;
        let connection_id = self.connection.as_ref().map(|c| c.id().to_string());
        let session_id = client.create_session(&options).await?;

        let conversation = chatbridge_models::Conversation::new()
            .with_id(session_id.clone())
            .with_connection_id(connection_id.unwrap_or_default())
            .with_cwd(options.cwd);
        self.store.lock().unwrap().create_conversation(conversation);
        Ok(session_id)
    }

    /// Makes a conversation current, loading its history from the server
    /// when the local log is still empty. History failures surface as a
    /// notice, not an error.
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<()> {
        let session_id = {
            let mut store = self.store.lock().unwrap();
            if store.get(conversation_id).is_none() {
                bail!("unknown conversation: {}", conversation_id);
            }
            store.set_current(Some(conversation_id));
            let conversation = store.get(conversation_id).unwrap();
            if !conversation.is_empty() {
                return Ok(());
            }
            conversation.session_id().to_string()
        };

        let client = self.client()?;
        match client.list_messages(&session_id).await {
            Ok(messages) => {
                let mapped = messages
                    .iter()
                    .enumerate()
                    .map(|(index, info)| {
                        let mut msg = Message::new(
                            format!("{}-{}", conversation_id, index),
                            info.role,
                            info.content.clone(),
                        )
                        .with_kind(info.kind.unwrap_or_default())
                        .with_timestamp(info.created_at_time());
                        if let Some(metadata) = &info.metadata {
                            msg = msg.with_metadata(metadata.clone());
                        }
                        msg
                    })
                    .collect();
                self.store
                    .lock()
                    .unwrap()
                    .set_messages(conversation_id, mapped);
            }
            Err(err) => {
                error!("failed to load history: {}", err);
                self.notify(NoticeMessage::error("Failed to load conversation history"));
            }
        }
        Ok(())
    }

    /// Renames the session server side first; the canonical title returned
    /// by the server is what lands in the store.
    pub async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<()> {
        let client = self.client()?;
        let title = client.update_session_title(conversation_id, title).await?;
        self.store
            .lock()
            .unwrap()
            .rename_conversation(conversation_id, &title);
        Ok(())
    }

    /// Sends one user message on the current conversation and opens the
    /// response stream. Requires a verified connection, a current
    /// conversation, and no turn already in flight.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let client = self.client()?;
        {
            let turn = self.turn.lock().unwrap();
            if turn.state != SessionState::Idle {
                bail!("a turn is already in progress");
            }
        }

        let now = chrono::Utc::now();
        let stamp = now.timestamp_millis();
        let user_id = format!("msg-{}-user", stamp);
        let placeholder_id = format!("msg-{}-thinking", stamp);

        let (session_id, messages) = {
            let mut store = self.store.lock().unwrap();
            let Some(current) = store.current() else {
                bail!("no conversation selected");
            };
            let session_id = current.session_id().to_string();

            store.add_message(Message::new_user(&user_id, text).with_timestamp(now));
            let messages = store.current().map(|c| c.messages().to_vec()).unwrap_or_default();
            store.add_message(
                Message::new_assistant(&placeholder_id, "")
                    .with_kind(Kind::Thinking)
                    .with_timestamp(now)
                    .with_streaming(true),
            );
            (session_id, messages)
        };

        {
            let mut turn = self.turn.lock().unwrap();
            turn.state = SessionState::Sending;
            turn.stop_requested = false;
            turn.placeholder_id = Some(placeholder_id);
            turn.placeholder_content.clear();
            turn.turn_stamp = stamp;
            turn.seq = 0;
        }

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let mut handler = TurnHandler {
            store: Arc::clone(&self.store),
            turn: Arc::clone(&self.turn),
            notice_tx: self.notice_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = client
                .stream_chat(&session_id, &messages, &mut handler, cancel.clone())
                .await
            {
                // Request initiation failed; route through the same error
                // path as a mid-stream failure. A turn that was stopped must
                // not leak its failure into whatever turn runs next.
                if !cancel.is_cancelled() {
                    handler.on_error(StreamError::stream(err.to_string()));
                }
            }
        });
        Ok(())
    }

    /// Stops the in-flight turn: marks the cancellation so the resulting
    /// stream error stays silent, records a cancelled status message,
    /// best-effort interrupts the server, and aborts the stream.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut turn = self.turn.lock().unwrap();
            if !matches!(turn.state, SessionState::Streaming | SessionState::Sending) {
                return Ok(());
            }
            turn.state = SessionState::Cancelling;
            turn.stop_requested = true;
        }

        let session_id = {
            let mut store = self.store.lock().unwrap();
            store.add_message(
                Message::new_assistant(
                    format!("msg-{}-status-stop", chrono::Utc::now().timestamp_millis()),
                    "",
                )
                .with_kind(Kind::Status)
                .with_metadata(
                    serde_json::to_value(StatusPayload::cancelled()).unwrap_or_default(),
                ),
            );
            store.current().map(|c| c.session_id().to_string())
        };

        if let Some(session_id) = session_id {
            if let Ok(client) = self.client() {
                if let Err(err) = client.interrupt(&session_id).await {
                    error!("interrupt failed: {}", err);
                }
            }
        }

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        let placeholder_id = {
            let mut turn = self.turn.lock().unwrap();
            turn.state = SessionState::Idle;
            turn.placeholder_id.take()
        };
        if let Some(placeholder_id) = placeholder_id {
            self.store
                .lock()
                .unwrap()
                .update_message(&placeholder_id, &MessageUpdate::new().with_streaming(false));
        }
        Ok(())
    }

    /// Unconditional teardown: aborts any open stream without touching the
    /// message log.
    pub fn shutdown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            debug!("aborting open stream on shutdown");
            cancel.cancel();
        }
    }

    fn notify(&self, notice: NoticeMessage) {
        let _ = self.notice_tx.send(notice);
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routes one stream's events into store mutations. Deltas accumulate in
/// the streaming placeholder; status, tool and result events each append a
/// new message with a per-turn sequence id.
struct TurnHandler {
    store: Arc<Mutex<ChatStore>>,
    turn: Arc<Mutex<TurnState>>,
    notice_tx: mpsc::UnboundedSender<NoticeMessage>,
}

impl TurnHandler {
    // The first event arriving promotes the turn out of the request
    // initiation phase.
    fn mark_streaming(&self) {
        let mut turn = self.turn.lock().unwrap();
        if turn.state == SessionState::Sending {
            turn.state = SessionState::Streaming;
        }
    }

    fn append_event(&self, prefix: &str, kind: Kind, content: String, metadata: serde_json::Value) {
        self.mark_streaming();
        let id = self.turn.lock().unwrap().next_event_id(prefix);
        self.store.lock().unwrap().add_message(
            Message::new_assistant(id, content)
                .with_kind(kind)
                .with_metadata(metadata),
        );
    }

    fn settle_placeholder(&self) -> Option<String> {
        let placeholder_id = {
            let mut turn = self.turn.lock().unwrap();
            turn.state = SessionState::Idle;
            turn.placeholder_id.take()
        };
        if let Some(id) = &placeholder_id {
            self.store
                .lock()
                .unwrap()
                .update_message(id, &MessageUpdate::new().with_streaming(false));
        }
        placeholder_id
    }
}

impl StreamHandlers for TurnHandler {
    fn on_delta(&mut self, delta: &str) {
        self.mark_streaming();
        let (placeholder_id, content) = {
            let mut turn = self.turn.lock().unwrap();
            turn.placeholder_content.push_str(delta);
            match &turn.placeholder_id {
                Some(id) => (id.clone(), turn.placeholder_content.clone()),
                None => return,
            }
        };
        self.store.lock().unwrap().update_message(
            &placeholder_id,
            &MessageUpdate::new().with_content(content).with_streaming(true),
        );
    }

    fn on_status(&mut self, payload: StatusPayload) {
        let metadata = serde_json::to_value(&payload).unwrap_or_default();
        self.append_event("status", Kind::Status, String::new(), metadata);
    }

    fn on_tool_use(&mut self, payload: ToolUsePayload) {
        let metadata = serde_json::to_value(&payload).unwrap_or_default();
        self.append_event("tool-use", Kind::ToolUse, String::new(), metadata);
    }

    fn on_tool_result(&mut self, payload: ToolResultPayload) {
        let metadata = serde_json::to_value(&payload).unwrap_or_default();
        self.append_event("tool-result", Kind::ToolResult, String::new(), metadata);
    }

    fn on_result(&mut self, payload: ResultPayload) {
        self.mark_streaming();
        let id = self.turn.lock().unwrap().next_event_id("result");
        self.store.lock().unwrap().add_message(
            Message::new_assistant(id, payload.content.unwrap_or_default())
                .with_kind(Kind::Result),
        );
    }

    fn on_done(&mut self) {
        self.settle_placeholder();
        self.turn.lock().unwrap().stop_requested = false;
    }

    fn on_error(&mut self, error: StreamError) {
        let suppressed = {
            let mut turn = self.turn.lock().unwrap();
            let suppressed = turn.stop_requested;
            turn.stop_requested = false;
            suppressed
        };
        if !suppressed {
            let _ = self.notice_tx.send(NoticeMessage::error(error.to_string()));
        }
        self.settle_placeholder();
    }
}
