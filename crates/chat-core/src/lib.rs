//! Transport-independent chat client contract.
//!
//! This crate defines the domain types and command/event protocol for a
//! marketplace chat client, plus the pieces every transport shares: the
//! message reconciler that merges optimistic, confirmed, and read-updated
//! state, the connection lifecycle state machine, payload normalization,
//! reconnect timing, and common error/channel abstractions.

/// Async command/event channel primitives.
pub mod channel;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Field-defaulting normalization for broker and REST payloads.
pub mod normalization;
/// The in-memory message reconciler for one open room.
pub mod reconciler;
/// Reconnect delay and heartbeat policy.
pub mod retry;
/// Injected identity context.
pub mod session;
/// Connection lifecycle state machine.
pub mod state_machine;
/// Domain types and the command/event protocol.
pub mod types;

pub use channel::{EventStream, RoomChannelError, RoomChannels};
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use normalization::{new_correlation_id, normalize_message, normalize_read_marks};
pub use reconciler::{ReconcileOutcome, RoomReconciler};
pub use retry::ReconnectPolicy;
pub use session::Session;
pub use state_machine::ConnectionStateMachine;
pub use types::{
    ChatMessage, ConnectionState, OutgoingMessage, ReadMarks, ReadRequest, RoomCommand, RoomEvent,
    RoomInfo,
};
