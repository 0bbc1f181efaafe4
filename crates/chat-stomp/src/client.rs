//! WebSocket/STOMP transport for a single chat room.
//!
//! [`RoomConnection`] owns a background task that keeps a broker
//! session alive for one room: handshake, subscriptions, heartbeats,
//! and a fixed-delay reconnect loop. Normalized inbound traffic is
//! handed to the caller over an mpsc channel; the connection itself
//! never touches reconciliation state.

use std::time::Duration;

use chat_core::error::{ChatError, ChatErrorCategory};
use chat_core::normalization::{normalize_message, normalize_read_marks};
use chat_core::retry::ReconnectPolicy;
use chat_core::session::Session;
use chat_core::state_machine::ConnectionStateMachine;
use chat_core::types::ConnectionState;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frame::{self, Command, Frame};

/// Destination messages are published to.
pub const SEND_DESTINATION: &str = "/app/chat.send";
/// Destination read notifications are published to.
pub const READ_DESTINATION: &str = "/app/chat.read";

const SUB_MESSAGES: &str = "sub-msg";
const SUB_READS: &str = "sub-read";

/// How long to wait for the broker's CONNECTED reply.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Broker topic carrying new messages for a room.
pub fn message_topic(room_id: u64) -> String {
    format!("/topic/chat/{room_id}")
}

/// Broker topic carrying read receipts for a room.
pub fn read_topic(room_id: u64) -> String {
    format!("/topic/chat/{room_id}/read")
}

/// Transport endpoint and timing configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint of the STOMP broker, e.g. `ws://host:8080/ws`.
    pub ws_url: String,
    pub policy: ReconnectPolicy,
}

/// Normalized traffic arriving from the broker for one room.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(chat_core::types::ChatMessage),
    ReadReceipt(chat_core::types::ReadMarks),
}

/// Handle to the background session task for one room.
#[derive(Debug)]
pub struct RoomConnection {
    room_id: u64,
    outgoing_tx: mpsc::Sender<Frame>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RoomConnection {
    /// Spawn the session task for `room_id` and start connecting.
    ///
    /// Inbound messages and read receipts are delivered on `inbound_tx`
    /// until the connection is closed.
    pub fn open(
        config: TransportConfig,
        session: Session,
        room_id: u64,
        inbound_tx: mpsc::Sender<InboundEvent>,
    ) -> Result<Self, ChatError> {
        if room_id == 0 {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_room_id",
                "room id must be a positive integer",
            ));
        }
        if config.ws_url.is_empty() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "missing_ws_url",
                "WebSocket endpoint is not configured",
            ));
        }

        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let worker = SessionWorker {
            config,
            session,
            room_id,
            inbound_tx,
            state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(outgoing_rx));

        Ok(Self {
            room_id,
            outgoing_tx,
            state_rx,
            cancel,
            task,
        })
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Last observed connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for connection state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Publish a chat message body to the send destination.
    ///
    /// Dropped with a warning while the session is not connected; the
    /// caller keeps the unconfirmed entry and may re-attempt later.
    pub async fn publish_message(&self, body: String) {
        self.publish_json(SEND_DESTINATION, body).await;
    }

    /// Publish a read request body to the read destination.
    ///
    /// Same disconnected semantics as [`Self::publish_message`].
    pub async fn publish_read(&self, body: String) {
        self.publish_json(READ_DESTINATION, body).await;
    }

    async fn publish_json(&self, destination: &str, body: String) {
        if self.state() != ConnectionState::Connected {
            warn!(
                room_id = self.room_id,
                destination, "dropping publish while disconnected"
            );
            return;
        }
        let frame = Frame::send_json(destination, body);
        if self.outgoing_tx.send(frame).await.is_err() {
            warn!(room_id = self.room_id, "session task gone, publish dropped");
        }
    }

    /// Tear down the session task, completing the graceful shutdown.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!(room_id = self.room_id, error = %err, "session task panicked");
            }
        }
    }
}

/// State owned by the background session task.
struct SessionWorker {
    config: TransportConfig,
    session: Session,
    room_id: u64,
    inbound_tx: mpsc::Sender<InboundEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl SessionWorker {
    /// Reconnect loop: run broker sessions back to back with a fixed
    /// delay between attempts until cancelled.
    async fn run(self, mut outgoing_rx: mpsc::Receiver<Frame>) {
        let mut machine = ConnectionStateMachine::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if machine.on_connect_started().is_ok() {
                let _ = self.state_tx.send(ConnectionState::Connecting);
            }

            match self.run_session(&mut machine, &mut outgoing_rx).await {
                Ok(()) => info!(room_id = self.room_id, "broker session closed"),
                Err(err) => {
                    warn!(room_id = self.room_id, error = %err, "broker session failed");
                }
            }

            let _ = machine.on_disconnected();
            let _ = self.state_tx.send(ConnectionState::Disconnected);

            if self.cancel.is_cancelled() {
                break;
            }
            let delay = self.config.policy.reconnect_delay();
            debug!(room_id = self.room_id, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    /// One full broker session: dial, handshake, subscribe, then pump
    /// frames until the socket drops or cancellation is requested.
    async fn run_session(
        &self,
        machine: &mut ConnectionStateMachine,
        outgoing_rx: &mut mpsc::Receiver<Frame>,
    ) -> Result<(), ChatError> {
        let (socket, _) = connect_async(&self.config.ws_url).await.map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Network,
                "ws_connect_failed",
                err.to_string(),
            )
        })?;
        let (mut sink, mut stream) = socket.split();

        let offered_ms = self.config.policy.heartbeat_interval_ms();
        let connect = Frame::connect(
            &host_of(&self.config.ws_url),
            offered_ms,
            self.session.access_token.as_deref(),
        );
        send_frame(&mut sink, &connect).await?;

        let connected = timeout(HANDSHAKE_TIMEOUT, await_connected(&mut stream))
            .await
            .map_err(|_| {
                ChatError::new(
                    ChatErrorCategory::Network,
                    "handshake_timeout",
                    "broker did not answer CONNECT in time",
                )
            })??;
        let (server_sx, server_sy) = connected
            .header("heart-beat")
            .map(frame::parse_heart_beat)
            .unwrap_or((0, 0));
        let send_interval_ms = frame::negotiated_interval(offered_ms, server_sy);
        let recv_interval_ms = frame::negotiated_interval(offered_ms, server_sx);

        send_frame(&mut sink, &Frame::subscribe(SUB_MESSAGES, &message_topic(self.room_id))).await?;
        send_frame(&mut sink, &Frame::subscribe(SUB_READS, &read_topic(self.room_id))).await?;

        if machine.on_connected().is_ok() {
            let _ = self.state_tx.send(ConnectionState::Connected);
        }
        info!(
            room_id = self.room_id,
            send_interval_ms, recv_interval_ms, "broker session established"
        );

        let mut heartbeat = heartbeat_timer(send_interval_ms);
        let half_open_after = self.config.policy.half_open_after(recv_interval_ms);
        let mut last_received = Instant::now();
        let mut liveness = heartbeat_timer(recv_interval_ms);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown(&mut sink).await;
                    return Ok(());
                }
                frame = outgoing_rx.recv() => {
                    match frame {
                        Some(frame) => send_frame(&mut sink, &frame).await?,
                        // Handle dropped; finish the session gracefully.
                        None => {
                            self.shutdown(&mut sink).await;
                            return Ok(());
                        }
                    }
                }
                _ = tick(&mut heartbeat) => {
                    sink.send(WsMessage::text(frame::HEARTBEAT)).await.map_err(|err| {
                        ChatError::new(
                            ChatErrorCategory::Network,
                            "heartbeat_send_failed",
                            err.to_string(),
                        )
                    })?;
                }
                _ = tick(&mut liveness) => {
                    if let Some(grace) = half_open_after {
                        if last_received.elapsed() >= grace {
                            return Err(ChatError::new(
                                ChatErrorCategory::Network,
                                "connection_half_open",
                                "no broker traffic within the heartbeat grace window",
                            ));
                        }
                    }
                }
                incoming = stream.next() => {
                    let message = match incoming {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            return Err(ChatError::new(
                                ChatErrorCategory::Network,
                                "ws_read_failed",
                                err.to_string(),
                            ));
                        }
                        None => {
                            return Err(ChatError::new(
                                ChatErrorCategory::Network,
                                "ws_closed",
                                "broker closed the connection",
                            ));
                        }
                    };
                    last_received = Instant::now();
                    self.handle_ws_message(message).await?;
                }
            }
        }
    }

    /// Dispatch one inbound WebSocket message.
    async fn handle_ws_message(&self, message: WsMessage) -> Result<(), ChatError> {
        let text = match message {
            WsMessage::Text(text) => text,
            // Pings/pongs already refreshed the liveness clock above.
            WsMessage::Ping(_) | WsMessage::Pong(_) => return Ok(()),
            WsMessage::Close(_) => {
                return Err(ChatError::new(
                    ChatErrorCategory::Network,
                    "ws_closed",
                    "broker sent a close frame",
                ));
            }
            other => {
                debug!(room_id = self.room_id, kind = ?other, "ignoring non-text frame");
                return Ok(());
            }
        };
        if Frame::is_heartbeat(&text) {
            return Ok(());
        }

        let frame = match Frame::parse(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(room_id = self.room_id, error = %err, "dropping unparseable frame");
                return Ok(());
            }
        };
        match frame.command {
            Command::Message => self.handle_broker_message(&frame).await,
            Command::Error => Err(ChatError::new(
                ChatErrorCategory::Protocol,
                "broker_error",
                frame
                    .header("message")
                    .map(str::to_owned)
                    .unwrap_or_else(|| frame.body.clone()),
            )),
            Command::Receipt => Ok(()),
            other => {
                debug!(room_id = self.room_id, command = other.as_str(), "ignoring frame");
                Ok(())
            }
        }
    }

    /// Route a MESSAGE frame to the right normalizer by subscription.
    async fn handle_broker_message(&self, frame: &Frame) -> Result<(), ChatError> {
        let is_read_feed = match frame.header("subscription") {
            Some(SUB_READS) => true,
            Some(SUB_MESSAGES) => false,
            // Fall back to the destination suffix when the broker omits
            // the subscription header.
            _ => frame
                .header("destination")
                .is_some_and(|dest| dest.ends_with("/read")),
        };

        let payload: serde_json::Value = match serde_json::from_str(&frame.body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(room_id = self.room_id, error = %err, "dropping non-JSON broker payload");
                return Ok(());
            }
        };

        let event = if is_read_feed {
            match normalize_read_marks(&payload) {
                Some(marks) => InboundEvent::ReadReceipt(marks),
                None => {
                    warn!(room_id = self.room_id, "dropping malformed read receipt");
                    return Ok(());
                }
            }
        } else {
            match normalize_message(Some(self.room_id), &payload) {
                Some(message) => InboundEvent::Message(message),
                None => {
                    warn!(room_id = self.room_id, "dropping malformed chat message");
                    return Ok(());
                }
            }
        };

        if self.inbound_tx.send(event).await.is_err() {
            return Err(ChatError::new(
                ChatErrorCategory::Internal,
                "inbound_channel_closed",
                "inbound consumer is gone",
            ));
        }
        Ok(())
    }

    /// Best-effort STOMP goodbye before dropping the socket.
    async fn shutdown(&self, sink: &mut WsSink) {
        let _ = send_frame(sink, &Frame::unsubscribe(SUB_MESSAGES)).await;
        let _ = send_frame(sink, &Frame::unsubscribe(SUB_READS)).await;
        let _ = send_frame(sink, &Frame::disconnect("bye")).await;
        let _ = sink.close().await;
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<(), ChatError> {
    sink.send(WsMessage::text(frame.serialize()))
        .await
        .map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Network,
                "ws_send_failed",
                err.to_string(),
            )
        })
}

/// Read frames until the broker answers the handshake.
async fn await_connected(
    stream: &mut (impl Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Result<Frame, ChatError> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Network,
                "ws_read_failed",
                err.to_string(),
            )
        })?;
        let WsMessage::Text(text) = message else {
            continue;
        };
        if Frame::is_heartbeat(&text) {
            continue;
        }
        let frame = Frame::parse(&text).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Protocol,
                "handshake_malformed",
                err.to_string(),
            )
        })?;
        return match frame.command {
            Command::Connected => Ok(frame),
            Command::Error => Err(ChatError::new(
                ChatErrorCategory::Auth,
                "handshake_rejected",
                frame
                    .header("message")
                    .map(str::to_owned)
                    .unwrap_or_else(|| frame.body.clone()),
            )),
            other => Err(ChatError::new(
                ChatErrorCategory::Protocol,
                "handshake_unexpected",
                format!("expected CONNECTED, got {}", other.as_str()),
            )),
        };
    }
    Err(ChatError::new(
        ChatErrorCategory::Network,
        "ws_closed",
        "broker closed the connection during the handshake",
    ))
}

/// Pull the authority out of a ws(s) URL for the STOMP `host` header.
fn host_of(ws_url: &str) -> String {
    let without_scheme = ws_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(ws_url);
    let authority = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme);
    authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority)
        .split(':')
        .next()
        .unwrap_or(authority)
        .to_owned()
}

/// Interval timer when the negotiated period is non-zero, else a timer
/// that never fires.
fn heartbeat_timer(interval_ms: u64) -> Option<tokio::time::Interval> {
    if interval_ms == 0 {
        return None;
    }
    let mut timer = tokio::time::interval(Duration::from_millis(interval_ms));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick.
    timer.reset();
    Some(timer)
}

async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
