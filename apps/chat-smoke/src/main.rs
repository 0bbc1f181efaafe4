//! Live smoke binary: open a room against real endpoints and chat.
//!
//! Requires a running broker and REST API. Configure with `CHAT_WS_URL`,
//! `CHAT_API_URL`, `CHAT_USER`, `CHAT_TOKEN`, and `CHAT_ROOM_ID`; set
//! `CHAT_SMOKE_MESSAGE` to publish one message on open. Stdin lines
//! are sent as messages; `/read`, `/resend`, and `/quit` are commands.

mod config;
mod logging;

use chat_core::session::Session;
use chat_core::types::{RoomCommand, RoomEvent};
#[cfg(not(feature = "os-keyring"))]
use chat_platform::InMemoryCredentialStore;
use chat_platform::SessionVault;
use chat_stomp::{RuntimeConfig, spawn_runtime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

use crate::config::SmokeConfig;

const VAULT_SERVICE: &str = "chat-smoke";

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    info!(
        ws_url = %config.ws_url,
        api_base_url = %config.api_base_url,
        user_id = %config.user_id,
        room_id = config.room_id,
        "starting chat smoke run"
    );

    let session = resolve_session(&config);
    let runtime_config = RuntimeConfig {
        ws_url: config.ws_url.clone(),
        api_base_url: config.api_base_url.clone(),
        policy: config.policy(),
    };

    let handle = spawn_runtime(runtime_config, session);
    let mut events = handle.subscribe();

    if let Err(err) = handle
        .send(RoomCommand::OpenRoom {
            room_id: config.room_id,
        })
        .await
    {
        error!(error = %err, "could not reach the room runtime");
        std::process::exit(1);
    }

    if let Some(message) = config.message.clone()
        && let Err(err) = handle.send(RoomCommand::SendMessage { content: message }).await
    {
        error!(error = %err, "could not queue the smoke message");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = handle.send(RoomCommand::CloseRoom).await;
                break;
            }
            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !dispatch_line(&handle, line.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        let _ = handle.send(RoomCommand::CloseRoom).await;
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(&event),
                    Err(err) => {
                        error!(error = %err, "event stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Vault first, environment fallback. With the default in-memory store
/// the vault never has a session; a keyring-backed build persists it
/// across runs.
fn resolve_session(config: &SmokeConfig) -> Session {
    let vault = SessionVault::new(smoke_store(), VAULT_SERVICE);
    match vault.load(&config.user_id) {
        Ok(session) => {
            info!(user_id = %session.user_id, "using stored session");
            session
        }
        Err(err) => {
            debug!(error = %err, "no stored session, using environment");
            let session = Session::new(config.user_id.clone(), config.access_token.clone());
            if session.access_token.is_some()
                && let Err(err) = vault.save(&config.user_id, &session)
            {
                debug!(error = %err, "could not store session");
            }
            session
        }
    }
}

#[cfg(feature = "os-keyring")]
fn smoke_store() -> chat_platform::OsKeyringCredentialStore {
    chat_platform::OsKeyringCredentialStore
}

#[cfg(not(feature = "os-keyring"))]
fn smoke_store() -> InMemoryCredentialStore {
    InMemoryCredentialStore::default()
}

/// Returns `false` when the run should end.
async fn dispatch_line(handle: &chat_stomp::RoomRuntimeHandle, line: &str) -> bool {
    let command = match line {
        "" => return true,
        "/quit" => {
            let _ = handle.send(RoomCommand::CloseRoom).await;
            return false;
        }
        "/read" => RoomCommand::MarkRead,
        "/resend" => RoomCommand::ResendPending,
        text => RoomCommand::SendMessage {
            content: text.to_owned(),
        },
    };
    if let Err(err) = handle.send(command).await {
        error!(error = %err, "could not reach the room runtime");
        return false;
    }
    true
}

fn print_event(event: &RoomEvent) {
    match event {
        RoomEvent::ConnectionChanged { state } => info!(?state, "connection"),
        RoomEvent::RoomOpened { room_id, info } => {
            info!(room_id, has_metadata = info.is_some(), "room opened");
        }
        RoomEvent::HistoryLoaded { room_id, messages } => {
            info!(room_id, count = messages.len(), "history loaded");
        }
        RoomEvent::MessageUpserted { room_id, index, message } => {
            info!(
                room_id,
                index,
                sender = %message.sender_id,
                confirmed = message.is_confirmed(),
                read = message.is_read,
                content = %message.content,
                "message"
            );
        }
        RoomEvent::MessagesRead { room_id, server_message_ids } => {
            info!(room_id, ids = ?server_message_ids, "messages read");
        }
        RoomEvent::RoomError { code, message, recoverable } => {
            error!(code = %code, recoverable, "room error: {message}");
        }
    }
}
