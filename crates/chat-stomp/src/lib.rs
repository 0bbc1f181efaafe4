//! STOMP-over-WebSocket transport and room runtime.
//!
//! Three layers, wired bottom-up:
//!
//! - [`frame`]: a whole-frame STOMP 1.2 codec.
//! - [`client`]: one room's broker session with heartbeats, half-open
//!   detection, and a fixed-delay reconnect loop.
//! - [`runtime`]: the command/event task hosts actually talk to, which
//!   owns the reconciler and the REST collaborator in [`rest`].

pub mod client;
pub mod frame;
pub mod rest;
pub mod runtime;

pub use client::{InboundEvent, RoomConnection, TransportConfig};
pub use frame::{Command, Frame, FrameError};
pub use rest::RestApi;
pub use runtime::{RoomRuntimeHandle, RuntimeConfig, spawn_runtime};
