use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// Broker protocol violation (bad frame, unexpected command).
    Protocol,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload carried across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-connection-transition error.
    pub fn invalid_transition(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_connection_transition",
            format!("cannot run '{action}' while connection is {current:?}"),
        )
    }

    /// Whether automatic retry may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            ChatErrorCategory::Network | ChatErrorCategory::RateLimited
        )
    }
}

/// Map REST collaborator HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        408 | 429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}
