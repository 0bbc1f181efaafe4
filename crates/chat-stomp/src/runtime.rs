//! Room runtime: the single task that owns reconciliation state.
//!
//! Hosts talk to it over [`RoomChannels`]: commands in, events out.
//! The runtime drives one open room at a time, forwarding state
//! transitions from the transport and merging inbound traffic through
//! the [`RoomReconciler`]. Errors surface as `RoomError` events; the
//! runtime itself never dies on a bad room.

use chat_core::channel::{EventStream, RoomChannels};
use chat_core::error::{ChatError, ChatErrorCategory};
use chat_core::reconciler::{ReconcileOutcome, RoomReconciler};
use chat_core::retry::ReconnectPolicy;
use chat_core::session::Session;
use chat_core::types::{
    ChatMessage, ConnectionState, OutgoingMessage, ReadMarks, ReadRequest, RoomCommand, RoomEvent,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::client::{InboundEvent, RoomConnection, TransportConfig};
use crate::rest::RestApi;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 64;

/// Endpoints and timing for a runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// WebSocket endpoint of the STOMP broker.
    pub ws_url: String,
    /// Base URL of the REST collaborator.
    pub api_base_url: String,
    pub policy: ReconnectPolicy,
}

/// Host-side handle to a spawned room runtime.
#[derive(Clone)]
pub struct RoomRuntimeHandle {
    channels: RoomChannels,
}

impl RoomRuntimeHandle {
    /// Send one command to the runtime.
    pub async fn send(&self, command: RoomCommand) -> Result<(), ChatError> {
        self.channels.send_command(command).await.map_err(|_| {
            ChatError::new(
                ChatErrorCategory::Internal,
                "runtime_gone",
                "room runtime task has exited",
            )
        })
    }

    /// Subscribe to the runtime's event stream.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }
}

/// Spawn a room runtime on the current Tokio runtime.
pub fn spawn_runtime(config: RuntimeConfig, session: Session) -> RoomRuntimeHandle {
    let (channels, command_rx) = RoomChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let handle = RoomRuntimeHandle {
        channels: channels.clone(),
    };
    let runtime = RoomRuntime::new(channels, command_rx, config, session);
    tokio::spawn(runtime.run());
    handle
}

/// Live state for the one room currently open.
struct ActiveRoom {
    connection: RoomConnection,
    reconciler: RoomReconciler,
    inbound_rx: mpsc::Receiver<InboundEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Mark-read is published once, on the first transition to Connected.
    mark_read_on_connect: bool,
}

/// The runtime task. Owns the reconciler and the transport handle.
pub struct RoomRuntime {
    channels: RoomChannels,
    command_rx: mpsc::Receiver<RoomCommand>,
    config: RuntimeConfig,
    session: Session,
    rest: RestApi,
    active: Option<ActiveRoom>,
}

impl RoomRuntime {
    fn new(
        channels: RoomChannels,
        command_rx: mpsc::Receiver<RoomCommand>,
        config: RuntimeConfig,
        session: Session,
    ) -> Self {
        let rest = RestApi::new(config.api_base_url.clone(), session.clone());
        Self {
            channels,
            command_rx,
            config,
            session,
            rest,
            active: None,
        }
    }

    async fn run(mut self) {
        info!(user_id = %self.session.user_id, "room runtime started");
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command).await;
                }
                signal = transport_signal(&mut self.active) => {
                    match signal {
                        TransportSignal::Inbound(event) => self.handle_inbound(event).await,
                        TransportSignal::State(state) => self.handle_state_change(state).await,
                        // Transport handed us a closed channel; drop the room.
                        TransportSignal::Gone => self.teardown().await,
                    }
                }
            }
        }
        self.teardown().await;
        info!("room runtime stopped");
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::OpenRoom { room_id } => self.open_room(room_id).await,
            RoomCommand::SendMessage { content } => self.send_message(content).await,
            RoomCommand::ResendPending => self.resend_pending().await,
            RoomCommand::MarkRead => self.mark_read().await,
            RoomCommand::CloseRoom => self.teardown().await,
        }
    }

    /// Open a room end to end: metadata, history, connect, subscribe.
    async fn open_room(&mut self, room_id: u64) {
        if room_id == 0 {
            self.emit_error(&ChatError::new(
                ChatErrorCategory::Config,
                "invalid_room_id",
                "room id must be a positive integer",
            ));
            return;
        }

        // One connection per runtime: opening tears down the old room.
        self.teardown().await;

        let info = match self.rest.room(room_id).await {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(room_id, error = %err, "room metadata fetch failed");
                None
            }
        };

        let history = match self.rest.message_history(room_id).await {
            Ok(history) => history,
            Err(err) => {
                warn!(room_id, error = %err, "history fetch failed");
                self.channels.emit(RoomEvent::RoomError {
                    code: "history_fetch_failed".to_owned(),
                    message: err.message.clone(),
                    recoverable: err.is_recoverable(),
                });
                Vec::new()
            }
        };

        let mut reconciler = RoomReconciler::new(room_id, self.session.user_id.clone());
        reconciler.load_initial(history);

        // Entering a room marks it read unless we already spoke last;
        // an empty room still gets the receipt so the counterpart's
        // badge clears.
        let mark_read_on_connect = match reconciler.last_sender() {
            Some(sender) => !self.session.is_self(sender),
            None => true,
        };

        self.channels.emit(RoomEvent::RoomOpened { room_id, info });
        self.channels.emit(RoomEvent::HistoryLoaded {
            room_id,
            messages: reconciler.messages().to_vec(),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let transport = TransportConfig {
            ws_url: self.config.ws_url.clone(),
            policy: self.config.policy,
        };
        let connection =
            match RoomConnection::open(transport, self.session.clone(), room_id, inbound_tx) {
                Ok(connection) => connection,
                Err(err) => {
                    self.emit_error(&err);
                    return;
                }
            };
        let state_rx = connection.state_watch();

        self.active = Some(ActiveRoom {
            connection,
            reconciler,
            inbound_rx,
            state_rx,
            mark_read_on_connect,
        });
        info!(room_id, "room opened");
    }

    /// Optimistic send: the entry is visible before the broker replies.
    async fn send_message(&mut self, content: String) {
        let Some(active) = self.active.as_mut() else {
            self.emit_no_open_room("send_message");
            return;
        };

        let correlation_id = active.reconciler.append_local(content);
        let index = active.reconciler.len() - 1;
        let message = active.reconciler.messages()[index].clone();
        self.channels.emit(RoomEvent::MessageUpserted {
            room_id: active.reconciler.room_id(),
            index,
            message,
        });

        let Some(payload) = active.reconciler.outgoing_payload(&correlation_id) else {
            return;
        };
        publish_send(&active.connection, &payload).await;
    }

    /// Republish every unconfirmed local entry under its original
    /// correlation id. Safe against duplication: an echo that already
    /// arrived reconciles as a duplicate on the other end.
    async fn resend_pending(&mut self) {
        let Some(active) = self.active.as_mut() else {
            self.emit_no_open_room("resend_pending");
            return;
        };

        let payloads: Vec<_> = active
            .reconciler
            .unconfirmed()
            .map(|message| message.correlation_id.clone())
            .filter_map(|correlation_id| active.reconciler.outgoing_payload(&correlation_id))
            .collect();
        if payloads.is_empty() {
            debug!(room_id = active.reconciler.room_id(), "nothing to resend");
            return;
        }

        info!(
            room_id = active.reconciler.room_id(),
            count = payloads.len(),
            "republishing unconfirmed messages"
        );
        for payload in payloads {
            publish_send(&active.connection, &payload).await;
        }
    }

    /// Publish a mark-everything-read request for the open room.
    async fn mark_read(&mut self) {
        let Some(active) = self.active.as_mut() else {
            self.emit_no_open_room("mark_read");
            return;
        };

        let request = ReadRequest {
            chat_room_id: active.reconciler.room_id(),
            reader_id: self.session.user_id.clone(),
        };
        publish_read(&active.connection, &request).await;
    }

    async fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => self.handle_message(message).await,
            InboundEvent::ReadReceipt(marks) => self.handle_read_receipt(marks),
        }
    }

    async fn handle_message(&mut self, message: ChatMessage) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let room_id = active.reconciler.room_id();
        if message.room_id != room_id {
            warn!(
                room_id,
                got = message.room_id,
                "dropping broadcast for another room"
            );
            return;
        }

        let from_other = !self.session.is_self(&message.sender_id);
        let outcome = active.reconciler.reconcile_incoming(message);
        match outcome {
            ReconcileOutcome::Confirmed { index } | ReconcileOutcome::Appended { index } => {
                let message = active.reconciler.messages()[index].clone();
                self.channels.emit(RoomEvent::MessageUpserted {
                    room_id,
                    index,
                    message,
                });
            }
            ReconcileOutcome::Duplicate { index } => {
                debug!(room_id, index, "suppressed redelivered broadcast");
            }
        }

        // The room is on screen, so a counterpart message is read the
        // moment it lands.
        if from_other {
            let request = ReadRequest {
                chat_room_id: room_id,
                reader_id: self.session.user_id.clone(),
            };
            publish_read(&active.connection, &request).await;
        }
    }

    fn handle_read_receipt(&mut self, marks: ReadMarks) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let room_id = active.reconciler.room_id();

        let indices = active.reconciler.apply_read_receipt(&marks);
        if indices.is_empty() {
            debug!(room_id, "read receipt matched nothing new");
            return;
        }

        let mut server_message_ids = Vec::new();
        for &index in &indices {
            let message = &active.reconciler.messages()[index];
            match message.server_message_id {
                Some(server_id) => server_message_ids.push(server_id),
                // Still awaiting confirmation; there is no server id to
                // report, so surface the flip as an in-place update.
                None => self.channels.emit(RoomEvent::MessageUpserted {
                    room_id,
                    index,
                    message: message.clone(),
                }),
            }
        }
        if !server_message_ids.is_empty() {
            self.channels.emit(RoomEvent::MessagesRead {
                room_id,
                server_message_ids,
            });
        }
    }

    async fn handle_state_change(&mut self, state: ConnectionState) {
        self.channels.emit(RoomEvent::ConnectionChanged { state });

        let Some(active) = self.active.as_mut() else {
            return;
        };
        if state == ConnectionState::Connected && active.mark_read_on_connect {
            active.mark_read_on_connect = false;
            let request = ReadRequest {
                chat_room_id: active.reconciler.room_id(),
                reader_id: self.session.user_id.clone(),
            };
            publish_read(&active.connection, &request).await;
        }
    }

    /// Close the open room, if any. Idempotent.
    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let room_id = active.reconciler.room_id();
        active.connection.close().await;
        self.channels.emit(RoomEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
        });
        info!(room_id, "room closed");
    }

    // Recoverable: opening a room and retrying the command is enough.
    fn emit_no_open_room(&self, operation: &str) {
        self.channels.emit(RoomEvent::RoomError {
            code: "no_open_room".to_owned(),
            message: format!("'{operation}' requires an open room"),
            recoverable: true,
        });
    }

    fn emit_error(&self, err: &ChatError) {
        self.channels.emit(RoomEvent::RoomError {
            code: err.code.clone(),
            message: err.message.clone(),
            recoverable: err.is_recoverable(),
        });
    }
}

/// Serialize and publish one send payload; serialization of owned wire
/// structs cannot fail in practice, so failures are only logged.
async fn publish_send(connection: &RoomConnection, payload: &OutgoingMessage) {
    match serde_json::to_string(payload) {
        Ok(body) => connection.publish_message(body).await,
        Err(err) => warn!(error = %err, "send payload serialization failed"),
    }
}

/// Serialize and publish one read request.
async fn publish_read(connection: &RoomConnection, request: &ReadRequest) {
    match serde_json::to_string(request) {
        Ok(body) => connection.publish_read(body).await,
        Err(err) => warn!(error = %err, "read payload serialization failed"),
    }
}

/// Something the open room's transport wants the runtime to see.
enum TransportSignal {
    Inbound(InboundEvent),
    State(ConnectionState),
    /// The transport channels closed; the session task is gone.
    Gone,
}

/// Next transport signal for the open room; pends forever when no room
/// is open, so the runtime's select stays command-driven.
async fn transport_signal(active: &mut Option<ActiveRoom>) -> TransportSignal {
    let Some(active) = active.as_mut() else {
        return std::future::pending().await;
    };
    tokio::select! {
        inbound = active.inbound_rx.recv() => {
            match inbound {
                Some(event) => TransportSignal::Inbound(event),
                None => TransportSignal::Gone,
            }
        }
        changed = active.state_rx.changed() => {
            match changed {
                Ok(()) => TransportSignal::State(*active.state_rx.borrow_and_update()),
                // Watch sender dropped; the session task has exited, so
                // drain whatever is left on the inbound channel.
                Err(_) => match active.inbound_rx.recv().await {
                    Some(event) => TransportSignal::Inbound(event),
                    None => TransportSignal::Gone,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, timeout};

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            ws_url: "ws://localhost:59999/ws".to_owned(),
            api_base_url: "http://localhost:59998".to_owned(),
            policy: ReconnectPolicy::default(),
        }
    }

    async fn next_event(events: &mut EventStream) -> RoomEvent {
        timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("event should arrive in time")
            .expect("event stream should stay open")
    }

    #[tokio::test]
    async fn send_without_open_room_reports_error() {
        let handle = spawn_runtime(test_config(), Session::new("alice", None));
        let mut events = handle.subscribe();

        handle
            .send(RoomCommand::SendMessage {
                content: "hello".to_owned(),
            })
            .await
            .expect("command should reach the runtime");

        match next_event(&mut events).await {
            RoomEvent::RoomError { code, recoverable, .. } => {
                assert_eq!(code, "no_open_room");
                assert!(recoverable);
            }
            other => panic!("expected RoomError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_read_without_open_room_reports_error() {
        let handle = spawn_runtime(test_config(), Session::new("alice", None));
        let mut events = handle.subscribe();

        handle
            .send(RoomCommand::MarkRead)
            .await
            .expect("command should reach the runtime");

        match next_event(&mut events).await {
            RoomEvent::RoomError { code, .. } => assert_eq!(code, "no_open_room"),
            other => panic!("expected RoomError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_without_open_room_is_idempotent() {
        let handle = spawn_runtime(test_config(), Session::new("alice", None));
        let mut events = handle.subscribe();

        handle
            .send(RoomCommand::CloseRoom)
            .await
            .expect("command should reach the runtime");
        handle
            .send(RoomCommand::MarkRead)
            .await
            .expect("command should reach the runtime");

        // CloseRoom on nothing emits no event; the next error proves the
        // runtime survived it.
        match next_event(&mut events).await {
            RoomEvent::RoomError { code, .. } => assert_eq!(code, "no_open_room"),
            other => panic!("expected RoomError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_receipt_on_unconfirmed_entry_emits_upsert() {
        let (channels, command_rx) = RoomChannels::new(8, 32);
        let mut events = channels.subscribe();
        let mut runtime = RoomRuntime::new(
            channels,
            command_rx,
            test_config(),
            Session::new("alice", None),
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let connection = RoomConnection::open(
            TransportConfig {
                ws_url: test_config().ws_url,
                policy: ReconnectPolicy::default(),
            },
            Session::new("alice", None),
            7,
            inbound_tx,
        )
        .expect("connection should spawn");
        let state_rx = connection.state_watch();

        let mut reconciler = RoomReconciler::new(7, "alice");
        let correlation = reconciler.append_local("pending");
        runtime.active = Some(ActiveRoom {
            connection,
            reconciler,
            inbound_rx,
            state_rx,
            mark_read_on_connect: false,
        });

        // The entry has no server id yet, so the receipt joins on the
        // correlation id; the flip must still reach subscribers.
        runtime.handle_read_receipt(ReadMarks {
            server_ids: Vec::new(),
            correlation_ids: vec![correlation],
        });

        match next_event(&mut events).await {
            RoomEvent::MessageUpserted {
                room_id,
                index,
                message,
            } => {
                assert_eq!(room_id, 7);
                assert_eq!(index, 0);
                assert!(message.is_read);
                assert!(!message.is_confirmed());
            }
            other => panic!("expected MessageUpserted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reopening_tears_down_previous_room_first() {
        let handle = spawn_runtime(test_config(), Session::new("alice", None));
        let mut events = handle.subscribe();

        handle
            .send(RoomCommand::OpenRoom { room_id: 1 })
            .await
            .expect("first open should reach the runtime");
        handle
            .send(RoomCommand::OpenRoom { room_id: 2 })
            .await
            .expect("second open should reach the runtime");

        // The second open must close the first room's connection before
        // its own RoomOpened: a Disconnected transition sits between the
        // two open events.
        let mut saw_first_open = false;
        let mut saw_teardown_between = false;
        loop {
            match next_event(&mut events).await {
                RoomEvent::RoomOpened { room_id: 1, .. } => saw_first_open = true,
                RoomEvent::ConnectionChanged {
                    state: ConnectionState::Disconnected,
                } if saw_first_open => saw_teardown_between = true,
                RoomEvent::RoomOpened { room_id: 2, .. } => break,
                _ => {}
            }
        }

        assert!(saw_first_open, "first room never opened");
        assert!(
            saw_teardown_between,
            "no teardown observed between the two opens"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "runs against a live broker, requires env vars"]
    async fn live_open_room_send_and_confirm_smoke() {
        use std::env;

        let ws_url = env::var("CHAT_WS_URL").expect("CHAT_WS_URL must be set");
        let api_base_url = env::var("CHAT_API_URL").expect("CHAT_API_URL must be set");
        let user_id = env::var("CHAT_USER").expect("CHAT_USER must be set");
        let room_id: u64 = env::var("CHAT_ROOM_ID")
            .expect("CHAT_ROOM_ID must be set")
            .parse()
            .expect("CHAT_ROOM_ID must be a positive integer");
        let token = env::var("CHAT_TOKEN").ok();

        let config = RuntimeConfig {
            ws_url,
            api_base_url,
            policy: ReconnectPolicy::default(),
        };
        let handle = spawn_runtime(config, Session::new(user_id.clone(), token));
        let mut events = handle.subscribe();

        handle
            .send(RoomCommand::OpenRoom { room_id })
            .await
            .expect("open command should reach the runtime");
        loop {
            match next_event(&mut events).await {
                RoomEvent::ConnectionChanged {
                    state: ConnectionState::Connected,
                } => break,
                RoomEvent::RoomError { code, message, .. } => {
                    panic!("room open failed: {code}: {message}")
                }
                _ => {}
            }
        }

        handle
            .send(RoomCommand::SendMessage {
                content: format!("smoke message from {user_id}"),
            })
            .await
            .expect("send command should reach the runtime");

        // First upsert is the optimistic entry, a later one its echo.
        let mut saw_confirmed = false;
        for _ in 0..20 {
            if let RoomEvent::MessageUpserted { message, .. } = next_event(&mut events).await
                && message.sender_id == user_id
                && message.is_confirmed()
            {
                saw_confirmed = true;
                break;
            }
        }
        assert!(saw_confirmed, "optimistic message was never confirmed");

        handle
            .send(RoomCommand::CloseRoom)
            .await
            .expect("close command should reach the runtime");
    }

    #[tokio::test]
    async fn rejects_room_id_zero() {
        let handle = spawn_runtime(test_config(), Session::new("alice", None));
        let mut events = handle.subscribe();

        handle
            .send(RoomCommand::OpenRoom { room_id: 0 })
            .await
            .expect("command should reach the runtime");

        match next_event(&mut events).await {
            RoomEvent::RoomError { code, .. } => assert_eq!(code, "invalid_room_id"),
            other => panic!("expected RoomError, got {other:?}"),
        }
    }
}
