//! Field-defaulting normalization for broker and REST payloads.
//!
//! The backend is loose about shapes: sender may be a string or a
//! nested user object, the read flag is spelled `isRead` or `read`,
//! timestamps arrive as ISO strings or epoch numbers, and optimistic
//! correlation ids (`clientId`) are absent on messages that originated
//! elsewhere. Everything entering the reconciler passes through here so
//! the rest of the crate only ever sees a canonical [`ChatMessage`].

use chrono::NaiveDateTime;
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ChatMessage, ReadMarks};

const ISO_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Generate a fresh correlation id for a locally created message.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Normalize one raw message event into a [`ChatMessage`].
///
/// Returns `None` when a required field (room, sender, content) is
/// missing or malformed; the caller drops the single event and logs.
/// The correlation id is always stable: wire `clientId` when present,
/// otherwise the server message id rendered as a string, otherwise a
/// freshly generated token.
pub fn normalize_message(room_id_hint: Option<u64>, value: &Value) -> Option<ChatMessage> {
    let room_id = field_u64(value, &["chatRoomId", "roomId"]).or(room_id_hint)?;
    let sender_id = extract_sender(value)?;
    let content = value.get("content")?.as_str()?.to_owned();

    let server_message_id = field_u64(value, &["messageId", "serverMessageId"]);
    let correlation_id = field_str(value, &["clientId", "correlationId"])
        .or_else(|| server_message_id.map(|id| id.to_string()))
        .unwrap_or_else(new_correlation_id);

    let sent_at = value.get("sentAt").and_then(parse_sent_at);
    let is_read = field_bool(value, &["isRead", "read"]).unwrap_or(false);

    Some(ChatMessage {
        room_id,
        sender_id,
        content,
        correlation_id,
        sent_at,
        server_message_id,
        is_read,
    })
}

/// Normalize a raw read-receipt body (a JSON array of identifiers).
///
/// Numbers and numeric strings become server ids; all other strings
/// are treated as correlation ids. Returns `None` for non-array bodies.
pub fn normalize_read_marks(value: &Value) -> Option<ReadMarks> {
    let entries = value.as_array()?;
    let mut marks = ReadMarks::default();

    for entry in entries {
        if let Some(id) = entry.as_u64() {
            marks.server_ids.push(id);
        } else if let Some(text) = entry.as_str() {
            match text.parse::<u64>() {
                Ok(id) => marks.server_ids.push(id),
                Err(_) => marks.correlation_ids.push(text.to_owned()),
            }
        }
    }

    Some(marks)
}

fn extract_sender(value: &Value) -> Option<String> {
    if let Some(sender_id) = value.get("senderId").and_then(Value::as_str) {
        return Some(sender_id.to_owned());
    }

    let sender = value.get("sender")?;
    if let Some(nested) = sender
        .get("userid")
        .or_else(|| sender.get("userId"))
        .and_then(Value::as_str)
    {
        return Some(nested.to_owned());
    }

    sender.as_str().map(ToOwned::to_owned)
}

fn parse_sent_at(value: &Value) -> Option<u64> {
    if let Some(millis) = value.as_u64() {
        return Some(millis);
    }

    let text = value.as_str()?;
    for format in ISO_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return u64::try_from(parsed.and_utc().timestamp_millis()).ok();
        }
    }

    None
}

fn field_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| value.get(key).and_then(Value::as_u64))
}

fn field_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn field_bool(value: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| value.get(key).and_then(Value::as_bool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_full_broadcast_payload() {
        let raw = json!({
            "chatRoomId": 7,
            "senderId": "alice",
            "content": "hello",
            "clientId": "c1",
            "sentAt": "2026-03-01T12:30:05",
            "messageId": 42
        });

        let msg = normalize_message(None, &raw).expect("payload should normalize");
        assert_eq!(msg.room_id, 7);
        assert_eq!(msg.sender_id, "alice");
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.correlation_id, "c1");
        assert_eq!(msg.server_message_id, Some(42));
        assert!(msg.sent_at.is_some());
        assert!(!msg.is_read);
    }

    #[test]
    fn falls_back_to_server_id_for_correlation() {
        let raw = json!({
            "chatRoomId": 7,
            "senderId": "bob",
            "content": "hi",
            "messageId": 43
        });

        let msg = normalize_message(None, &raw).expect("payload should normalize");
        assert_eq!(msg.correlation_id, "43");
    }

    #[test]
    fn generates_correlation_when_no_ids_are_present() {
        let raw = json!({
            "chatRoomId": 7,
            "senderId": "bob",
            "content": "hi"
        });

        let a = normalize_message(None, &raw).expect("payload should normalize");
        let b = normalize_message(None, &raw).expect("payload should normalize");
        assert!(!a.correlation_id.is_empty());
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn accepts_nested_sender_object_and_read_alias() {
        let raw = json!({
            "chatRoomId": 7,
            "sender": { "userid": "carol" },
            "content": "yo",
            "messageId": 9,
            "read": true
        });

        let msg = normalize_message(None, &raw).expect("payload should normalize");
        assert_eq!(msg.sender_id, "carol");
        assert!(msg.is_read);
    }

    #[test]
    fn accepts_numeric_epoch_sent_at() {
        let raw = json!({
            "chatRoomId": 7,
            "senderId": "bob",
            "content": "hi",
            "sentAt": 168000u64
        });

        let msg = normalize_message(None, &raw).expect("payload should normalize");
        assert_eq!(msg.sent_at, Some(168_000));
    }

    #[test]
    fn uses_room_hint_when_payload_omits_room() {
        let raw = json!({ "senderId": "bob", "content": "hi" });
        let msg = normalize_message(Some(5), &raw).expect("hint should fill room");
        assert_eq!(msg.room_id, 5);
    }

    #[test]
    fn rejects_payloads_missing_required_fields() {
        assert_eq!(normalize_message(None, &json!({ "content": "x" })), None);
        assert_eq!(
            normalize_message(Some(1), &json!({ "senderId": "bob" })),
            None
        );
        assert_eq!(normalize_message(None, &json!("not an object")), None);
    }

    #[test]
    fn invalid_sent_at_degrades_to_none() {
        let raw = json!({
            "chatRoomId": 7,
            "senderId": "bob",
            "content": "hi",
            "sentAt": "yesterday-ish"
        });
        let msg = normalize_message(None, &raw).expect("payload should normalize");
        assert_eq!(msg.sent_at, None);
    }

    #[test]
    fn splits_read_marks_by_identifier_kind() {
        let marks =
            normalize_read_marks(&json!([42, "43", "c-local-1"])).expect("array should parse");
        assert_eq!(marks.server_ids, vec![42, 43]);
        assert_eq!(marks.correlation_ids, vec!["c-local-1".to_owned()]);
        assert!(!marks.is_empty());
    }

    #[test]
    fn rejects_non_array_read_bodies() {
        assert_eq!(normalize_read_marks(&json!({"read": [1]})), None);
    }
}
