//! Minimal STOMP 1.2 frame codec.
//!
//! The broker speaks STOMP over WebSocket, one frame per WebSocket
//! message, so the codec works on whole frames: no streaming, no
//! partial reads. Only the commands this client exchanges are modeled.

use thiserror::Error;

/// Wire text of a client heartbeat (a bare end-of-line).
pub const HEARTBEAT: &str = "\n";

/// Errors produced while parsing a STOMP frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The input contained no command line.
    #[error("empty frame")]
    Empty,
    /// The command line is not a known STOMP command.
    #[error("unknown STOMP command '{0}'")]
    UnknownCommand(String),
    /// A header line has no `name:value` separator.
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
}

/// STOMP commands exchanged by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    /// Wire spelling of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "CONNECT" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SEND" => Some(Self::Send),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "MESSAGE" => Some(Self::Message),
            "RECEIPT" => Some(Self::Receipt),
            "ERROR" => Some(Self::Error),
            "DISCONNECT" => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Whether header values of this frame use STOMP 1.2 escaping.
    ///
    /// STOMP 1.2 exempts CONNECT/CONNECTED for 1.0 compatibility.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// One STOMP frame: command, ordered headers, optional textual body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Build a bodiless frame.
    pub fn new(command: Command, headers: Vec<(String, String)>) -> Self {
        Self {
            command,
            headers,
            body: String::new(),
        }
    }

    /// CONNECT handshake frame with heartbeat offer and optional bearer token.
    pub fn connect(host: &str, heartbeat_ms: u64, access_token: Option<&str>) -> Self {
        let mut headers = vec![
            ("accept-version".to_owned(), "1.2".to_owned()),
            ("host".to_owned(), host.to_owned()),
            (
                "heart-beat".to_owned(),
                format!("{heartbeat_ms},{heartbeat_ms}"),
            ),
        ];
        if let Some(token) = access_token {
            headers.push(("Authorization".to_owned(), format!("Bearer {token}")));
        }
        Self::new(Command::Connect, headers)
    }

    /// SUBSCRIBE frame for a destination under a client-chosen id.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(
            Command::Subscribe,
            vec![
                ("id".to_owned(), id.to_owned()),
                ("destination".to_owned(), destination.to_owned()),
                ("ack".to_owned(), "auto".to_owned()),
            ],
        )
    }

    /// UNSUBSCRIBE frame for a previously subscribed id.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe, vec![("id".to_owned(), id.to_owned())])
    }

    /// SEND frame carrying a JSON body.
    pub fn send_json(destination: &str, body: String) -> Self {
        let headers = vec![
            ("destination".to_owned(), destination.to_owned()),
            ("content-type".to_owned(), "application/json".to_owned()),
            ("content-length".to_owned(), body.len().to_string()),
        ];
        Self {
            command: Command::Send,
            headers,
            body,
        }
    }

    /// DISCONNECT frame asking for a receipt.
    pub fn disconnect(receipt_id: &str) -> Self {
        Self::new(
            Command::Disconnect,
            vec![("receipt".to_owned(), receipt_id.to_owned())],
        )
    }

    /// First header value with the given name, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether `input` is a bare heartbeat rather than a frame.
    pub fn is_heartbeat(input: &str) -> bool {
        matches!(input, "\n" | "\r\n")
    }

    /// Render the frame to its wire form, NUL-terminated.
    pub fn serialize(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one complete frame from its wire form.
    pub fn parse(input: &str) -> Result<Self, FrameError> {
        let input = input.strip_suffix('\0').unwrap_or(input);
        // EOL may be LF or CRLF; the blank line separates head from body.
        let (head, body) = match input
            .split_once("\r\n\r\n")
            .or_else(|| input.split_once("\n\n"))
        {
            Some((head, body)) => (head, body),
            None => (input, ""),
        };

        let mut lines = head.lines().map(|line| line.strip_suffix('\r').unwrap_or(line));
        let command_line = lines.next().filter(|line| !line.is_empty()).ok_or(FrameError::Empty)?;
        let command = Command::from_wire(command_line)
            .ok_or_else(|| FrameError::UnknownCommand(command_line.to_owned()))?;

        let unescape_headers = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_owned()))?;
            if unescape_headers {
                headers.push((unescape(name), unescape(value)));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        Ok(Self {
            command,
            headers,
            body: body.to_owned(),
        })
    }
}

/// Parse a `heart-beat` header value (`"sx,sy"`); malformed values
/// degrade to `(0, 0)`, which disables heartbeats.
pub fn parse_heart_beat(value: &str) -> (u64, u64) {
    let Some((sx, sy)) = value.split_once(',') else {
        return (0, 0);
    };
    match (sx.trim().parse::<u64>(), sy.trim().parse::<u64>()) {
        (Ok(sx), Ok(sy)) => (sx, sy),
        _ => (0, 0),
    }
}

/// Effective interval for one heartbeat direction: the larger of what
/// we offer and what the peer wants, or disabled when either side is 0.
pub fn negotiated_interval(ours_ms: u64, theirs_ms: u64) -> u64 {
    if ours_ms == 0 || theirs_ms == 0 {
        return 0;
    }
    ours_ms.max(theirs_ms)
}

fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            // Undefined escape: keep it verbatim rather than dropping data.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_connect_frame_without_escaping() {
        let frame = Frame::connect("broker.example.org", 10_000, Some("tok:en"));
        let wire = frame.serialize();

        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("accept-version:1.2\n"));
        assert!(wire.contains("heart-beat:10000,10000\n"));
        // CONNECT headers are exempt from escaping.
        assert!(wire.contains("Authorization:Bearer tok:en\n"));
        assert!(wire.ends_with("\n\n\0"));
    }

    #[test]
    fn send_frame_round_trips() {
        let body = r#"{"chatRoomId":7,"content":"hello"}"#.to_owned();
        let frame = Frame::send_json("/app/chat.send", body.clone());
        let parsed = Frame::parse(&frame.serialize()).expect("serialized frame must parse");

        assert_eq!(parsed.command, Command::Send);
        assert_eq!(parsed.header("destination"), Some("/app/chat.send"));
        assert_eq!(parsed.header("content-length"), Some("34"));
        assert_eq!(parsed.body, body);
    }

    #[test]
    fn parses_broker_message_frame() {
        let wire = "MESSAGE\ndestination:/topic/chat/7\nsubscription:sub-msg\nmessage-id:m-1\n\n{\"content\":\"hi\"}\0";
        let frame = Frame::parse(wire).expect("message frame must parse");

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("destination"), Some("/topic/chat/7"));
        assert_eq!(frame.header("subscription"), Some("sub-msg"));
        assert_eq!(frame.body, "{\"content\":\"hi\"}");
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let wire = "CONNECTED\r\nversion:1.2\r\nheart-beat:10000,10000\r\n\r\n\0";
        let frame = Frame::parse(wire).expect("frame must parse");
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(frame.header("heart-beat"), Some("10000,10000"));
    }

    #[test]
    fn escapes_and_unescapes_header_values() {
        let frame = Frame::send_json("/queue/a:b", String::new());
        let wire = frame.serialize();
        assert!(wire.contains("destination:/queue/a\\cb\n"));

        let parsed = Frame::parse(&wire).expect("escaped frame must parse");
        assert_eq!(parsed.header("destination"), Some("/queue/a:b"));
    }

    #[test]
    fn rejects_garbage_input() {
        assert_eq!(Frame::parse(""), Err(FrameError::Empty));
        assert_eq!(
            Frame::parse("HELLO\n\n"),
            Err(FrameError::UnknownCommand("HELLO".to_owned()))
        );
        assert_eq!(
            Frame::parse("SEND\nno-separator-here\n\n"),
            Err(FrameError::MalformedHeader("no-separator-here".to_owned()))
        );
    }

    #[test]
    fn recognizes_heartbeats() {
        assert!(Frame::is_heartbeat("\n"));
        assert!(Frame::is_heartbeat("\r\n"));
        assert!(!Frame::is_heartbeat("MESSAGE\n\n\0"));
    }

    #[test]
    fn negotiates_heartbeat_intervals() {
        assert_eq!(parse_heart_beat("10000,10000"), (10_000, 10_000));
        assert_eq!(parse_heart_beat("bogus"), (0, 0));

        assert_eq!(negotiated_interval(10_000, 5_000), 10_000);
        assert_eq!(negotiated_interval(10_000, 0), 0);
        assert_eq!(negotiated_interval(0, 5_000), 0);
    }
}
