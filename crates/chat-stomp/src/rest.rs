//! REST collaborator for room metadata and message history.
//!
//! Real-time traffic goes over the broker; this client only covers the
//! two read-side endpoints a room open needs.

use chat_core::error::{ChatError, ChatErrorCategory, classify_http_status};
use chat_core::normalization::normalize_message;
use chat_core::session::Session;
use chat_core::types::{ChatMessage, RoomInfo};
use tracing::warn;

/// HTTP client for the chat service's REST endpoints.
#[derive(Debug, Clone)]
pub struct RestApi {
    http: reqwest::Client,
    base_url: String,
    session: Session,
}

impl RestApi {
    /// Build a client against `base_url` (trailing slashes ignored).
    pub fn new(base_url: impl Into<String>, session: Session) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            session,
        }
    }

    /// Fetch metadata for one room.
    pub async fn room(&self, room_id: u64) -> Result<RoomInfo, ChatError> {
        let body = self.get_json(&self.endpoint(&format!("/chat-rooms/{room_id}"))).await?;
        serde_json::from_value(body).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "room_decode_failed",
                err.to_string(),
            )
        })
    }

    /// Fetch the full message history of one room, oldest first.
    ///
    /// Entries the normalizer cannot make sense of are logged and
    /// skipped rather than failing the whole fetch.
    pub async fn message_history(&self, room_id: u64) -> Result<Vec<ChatMessage>, ChatError> {
        let body = self
            .get_json(&self.endpoint(&format!("/chat-messages/{room_id}")))
            .await?;
        let entries = body.as_array().ok_or_else(|| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "history_decode_failed",
                "expected a JSON array of messages",
            )
        })?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match normalize_message(Some(room_id), entry) {
                Some(message) => messages.push(message),
                None => warn!(room_id, "skipping malformed history entry"),
            }
        }
        Ok(messages)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ChatError> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.session.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Network,
                "request_failed",
                err.to_string(),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::new(
                classify_http_status(status.as_u16()),
                "http_error",
                format!("GET {url} returned {status}"),
            ));
        }

        response.json().await.map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "body_decode_failed",
                err.to_string(),
            )
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoints_without_duplicate_slashes() {
        let api = RestApi::new("http://localhost:8080/", Session::new("alice", None));
        assert_eq!(
            api.endpoint("/chat-rooms/7"),
            "http://localhost:8080/chat-rooms/7"
        );
        assert_eq!(
            api.endpoint("/chat-messages/7"),
            "http://localhost:8080/chat-messages/7"
        );
    }
}
