use std::sync::{Arc, Mutex};
use std::time;

use chatbridge::{Command, init_logger};
use chatbridge_app::{ConnectionManager, Preferences, SessionOrchestrator, SessionState};
use chatbridge_models::wire::SessionCreateOptions;
use chatbridge_models::{
    ApiConnection, NoticeKind, NoticeMessage, ProcessDisplayMode, RenderBlock, render_blocks,
};
use chatbridge_storage::ChatStore;
use eyre::{Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        better_panic::Settings::auto().create_panic_handler()(panic_info);
    }));

    let config = Command::get_config()?;
    init_logger(&config)?;

    if config.connections.is_empty() {
        bail!("No backend connection configured");
    }

    let state = chatbridge_storage::new_storage(&config.storage).await?;

    let mut manager = ConnectionManager::new().with_state_store(Arc::clone(&state));
    manager.load().await?;

    // Reconcile configured connections against the persisted set by name,
    // keeping persisted ids (and verification stamps) stable.
    for entry in &config.connections {
        let existing = manager
            .connections()
            .iter()
            .find(|c| c.name() == entry.name)
            .map(|c| c.id().to_string());
        match existing {
            Some(id) => {
                let mut connection = manager.get(&id).cloned().unwrap();
                if connection.base_url() != entry.base_url {
                    connection.set_base_url(&entry.base_url);
                }
                if connection.api_key() != entry.api_key {
                    connection.set_api_key(&entry.api_key);
                }
                connection.set_process_display_mode(entry.process_display_mode);
                manager.update(connection);
                manager.set_admin_key(&id, entry.admin_key.as_deref());
            }
            None => {
                let mut connection =
                    ApiConnection::new(&entry.name, &entry.base_url).with_api_key(&entry.api_key);
                if let Some(mode) = entry.process_display_mode {
                    connection = connection.with_process_display_mode(mode);
                }
                let id = connection.id().to_string();
                manager.add(connection);
                manager.set_admin_key(&id, entry.admin_key.as_deref());
            }
        }
    }

    if manager.active().is_none() {
        let first = manager
            .connections()
            .iter()
            .find(|c| c.name() == config.connections[0].name)
            .map(|c| c.id().to_string());
        manager.set_active(first.as_deref());
    }

    let active_id = manager.active().map(|c| c.id().to_string()).unwrap();
    match manager.verify(&active_id).await {
        Some(true) => {}
        _ => bail!(
            "backend {} is unreachable or rejected the api key",
            manager.active().unwrap().base_url()
        ),
    }

    // The config file wins over the persisted preference when they differ.
    let mut preferences = Preferences::load(&state).await?;
    if preferences.process_display_mode != config.chat.process_display_mode {
        preferences.process_display_mode = config.chat.process_display_mode;
        preferences.persist(&state);
    }

    let mut store = ChatStore::new().with_state_store(Arc::clone(&state));
    store.load().await?;
    let store = Arc::new(Mutex::new(store));

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let mut orchestrator = SessionOrchestrator::new(Arc::clone(&store), notice_tx)
        .with_model(&config.chat.model);
    orchestrator.set_connection(manager.active().cloned());
    orchestrator.refresh_sessions().await?;

    if store.lock().unwrap().current().is_none() {
        let session_id = orchestrator
            .new_session(SessionCreateOptions::default())
            .await?;
        log::info!("started session {}", session_id);
    }

    let display_mode = manager
        .active()
        .and_then(|c| c.process_display_mode())
        .unwrap_or(preferences.process_display_mode);

    run_repl(&mut orchestrator, &manager, display_mode, &mut notice_rx).await?;

    orchestrator.shutdown();
    // Snapshot first so the guard is gone before the write awaits.
    let save = { store.lock().unwrap().save() };
    save.await?;
    Ok(())
}

async fn run_repl(
    orchestrator: &mut SessionOrchestrator,
    manager: &ConnectionManager,
    display_mode: ProcessDisplayMode,
    notices: &mut mpsc::UnboundedReceiver<NoticeMessage>,
) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(
            b"Commands: /new /sessions /open <n> /rename <title> /delete <n> /admin ... /quit\n> ",
        )
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').map_or((line, ""), |(a, b)| (a, b.trim())) {
            ("/quit", _) | ("/exit", _) => break,
            ("/new", _) => {
                let session_id = orchestrator
                    .new_session(SessionCreateOptions::default())
                    .await?;
                stdout
                    .write_all(format!("started session {}\n", session_id).as_bytes())
                    .await?;
            }
            ("/sessions", _) => {
                let listing = {
                    let store = orchestrator.store();
                    let store = store.lock().unwrap();
                    connection_conversations(orchestrator, &store)
                        .iter()
                        .enumerate()
                        .map(|(index, conv)| format!("{}. {}\n", index + 1, conv.title()))
                        .collect::<String>()
                };
                stdout.write_all(listing.as_bytes()).await?;
            }
            ("/open", arg) => {
                match conversation_at(orchestrator, arg) {
                    Some(id) => {
                        orchestrator.select_conversation(&id).await?;
                        print_transcript(orchestrator, display_mode, &mut stdout).await?;
                    }
                    None => stdout.write_all(b"no such session\n").await?,
                }
            }
            ("/delete", arg) => {
                match conversation_at(orchestrator, arg) {
                    Some(id) => {
                        let store = orchestrator.store();
                        store.lock().unwrap().delete_conversation(&id);
                        stdout.write_all(b"deleted\n").await?;
                    }
                    None => stdout.write_all(b"no such session\n").await?,
                }
            }
            ("/rename", title) if !title.is_empty() => {
                let current = {
                    let store = orchestrator.store();
                    let id = store.lock().unwrap().current().map(|c| c.id().to_string());
                    id
                };
                match current {
                    Some(id) => orchestrator.rename_conversation(&id, title).await?,
                    None => stdout.write_all(b"no open session\n").await?,
                }
            }
            ("/admin", arg) => {
                let output = run_admin(orchestrator, manager, arg).await;
                stdout.write_all(output.as_bytes()).await?;
            }
            ("", _) => {}
            _ => {
                if let Err(err) = orchestrator.send(line).await {
                    stdout
                        .write_all(format!("error: {}\n", err).as_bytes())
                        .await?;
                } else {
                    // Ctrl-C while the answer is streaming stops the turn
                    // instead of killing the process.
                    wait_for_turn(orchestrator).await?;
                    print_transcript(orchestrator, display_mode, &mut stdout).await?;
                }
            }
        }

        while let Ok(notice) = notices.try_recv() {
            let tag = match notice.kind() {
                NoticeKind::Error => "error",
                NoticeKind::Warning => "warning",
                NoticeKind::Info => "info",
            };
            stdout
                .write_all(format!("[{}] {}\n", tag, notice.message()).as_bytes())
                .await?;
        }

        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn connection_conversations<'a>(
    orchestrator: &SessionOrchestrator,
    store: &'a ChatStore,
) -> Vec<&'a chatbridge_models::Conversation> {
    match orchestrator.connection() {
        Some(connection) => store.conversations_for(connection.id()),
        None => store.conversations().iter().collect(),
    }
}

// Resolves a 1-based index from the `/sessions` listing to a conversation id.
fn conversation_at(orchestrator: &SessionOrchestrator, arg: &str) -> Option<String> {
    let n = arg.parse::<usize>().ok()?;
    let store = orchestrator.store();
    let store = store.lock().unwrap();
    connection_conversations(orchestrator, &store)
        .get(n.wrapping_sub(1))
        .map(|conv| conv.id().to_string())
}

async fn run_admin(
    orchestrator: &SessionOrchestrator,
    manager: &ConnectionManager,
    arg: &str,
) -> String {
    let Some(connection) = orchestrator.connection() else {
        return "no active connection\n".to_string();
    };
    let Some(admin_key) = manager.admin_key(connection.id()) else {
        return "no admin key configured for this connection\n".to_string();
    };
    let client = chatbridge_client::BackendClient::from(connection);

    match arg {
        "sessions" => match client.admin_list_sessions(admin_key).await {
            Ok(sessions) => sessions
                .iter()
                .map(|info| {
                    format!(
                        "{} key={} title={}\n",
                        info.session.id,
                        info.api_key_id,
                        info.session.title.as_deref().unwrap_or("-")
                    )
                })
                .collect(),
            Err(err) => format!("error: {}\n", err),
        },
        "keys" => match client.admin_list_api_keys(admin_key).await {
            Ok(keys) => keys
                .iter()
                .map(|key| {
                    format!(
                        "{} revoked={} expires={}\n",
                        key.id,
                        key.revoked,
                        if key.expires_at.is_empty() { "-" } else { &key.expires_at }
                    )
                })
                .collect(),
            Err(err) => format!("error: {}\n", err),
        },
        "newkey" => match client.admin_create_api_key(admin_key, None).await {
            Ok(created) => format!("{} {}\n", created.id, created.api_key),
            Err(err) => format!("error: {}\n", err),
        },
        _ => match arg.split_once(' ').map(|(a, b)| (a, b.trim())) {
            Some(("messages", session_id)) if !session_id.is_empty() => {
                match client.admin_list_messages(admin_key, session_id).await {
                    Ok(messages) => messages
                        .iter()
                        .map(|msg| format!("{}: {}\n", msg.role.as_str(), msg.content))
                        .collect(),
                    Err(err) => format!("error: {}\n", err),
                }
            }
            Some(("newkey", expires_at)) => {
                let expires_at = (!expires_at.is_empty()).then_some(expires_at);
                match client.admin_create_api_key(admin_key, expires_at).await {
                    Ok(created) => format!("{} {}\n", created.id, created.api_key),
                    Err(err) => format!("error: {}\n", err),
                }
            }
            Some(("revoke", api_key_id)) if !api_key_id.is_empty() => {
                match client.admin_revoke_api_key(admin_key, api_key_id).await {
                    Ok(()) => "revoked\n".to_string(),
                    Err(err) => format!("error: {}\n", err),
                }
            }
            _ => "usage: /admin <sessions|keys|messages <id>|newkey [expiry]|revoke <id>>\n"
                .to_string(),
        },
    }
}

async fn wait_for_turn(orchestrator: &mut SessionOrchestrator) -> Result<()> {
    while orchestrator.state() != SessionState::Idle {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop().await?;
            }
            _ = tokio::time::sleep(time::Duration::from_millis(50)) => {}
        }
    }
    Ok(())
}

async fn print_transcript(
    orchestrator: &SessionOrchestrator,
    display_mode: ProcessDisplayMode,
    stdout: &mut tokio::io::Stdout,
) -> Result<()> {
    let rendered = {
        let store = orchestrator.store();
        let store = store.lock().unwrap();
        let messages = store.current().map(|c| c.messages().to_vec()).unwrap_or_default();
        render_blocks(&messages)
            .iter()
            .map(|block| match block {
                RenderBlock::User(msg) => format!("you: {}\n", msg.content()),
                RenderBlock::Assistant(turn) => {
                    let mut out = String::new();
                    if display_mode == ProcessDisplayMode::Full {
                        for item in &turn.thinking {
                            if !item.content().is_empty() {
                                out.push_str(&format!("  [{:?}] {}\n", item.kind(), item.content()));
                            }
                        }
                    }
                    for result in &turn.results {
                        out.push_str(&format!("assistant: {}\n", result.content()));
                    }
                    if turn.results.is_empty() && !turn.thinking.is_empty() {
                        out.push_str("assistant: (working)\n");
                    }
                    out
                }
                RenderBlock::Other(msg) => format!("{}: {}\n", msg.role().as_str(), msg.content()),
            })
            .collect::<String>()
    };
    stdout.write_all(rendered.as_bytes()).await?;
    Ok(())
}
