use serde::{Deserialize, Serialize};

/// One message in a room's visible sequence.
///
/// Created locally (optimistic) the instant the user submits, promoted
/// when the matching broadcast arrives, marked read when a read receipt
/// references it. Exactly one entry exists per `correlation_id` within
/// a room; confirmation updates the existing entry in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Identifier of the conversation this message belongs to.
    pub room_id: u64,
    /// User ID of the author.
    pub sender_id: String,
    /// Free-text body.
    pub content: String,
    /// Client-generated opaque token matching an optimistic entry to its
    /// server-confirmed counterpart. Never reused; after normalization it
    /// is always non-empty (server id string when the wire omits it).
    pub correlation_id: String,
    /// Server-assigned timestamp in epoch milliseconds; `None` until the
    /// message is confirmed.
    pub sent_at: Option<u64>,
    /// Server-assigned identifier; `None` until confirmed. Join key for
    /// read-receipt events.
    pub server_message_id: Option<u64>,
    /// Monotonic false→true; never reverts once set.
    pub is_read: bool,
}

impl ChatMessage {
    /// Whether this entry has been confirmed by the server.
    pub fn is_confirmed(&self) -> bool {
        self.server_message_id.is_some()
    }
}

/// Transport connection lifecycle, as observed by callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection; reconnect pending or room closed.
    Disconnected,
    /// Connection and STOMP handshake in progress.
    Connecting,
    /// Handshake complete, both room channels subscribed.
    Connected,
}

/// Outgoing send payload published to the broker.
///
/// Field names are the broker's wire contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub chat_room_id: u64,
    pub sender_id: String,
    pub content: String,
    pub client_id: String,
}

/// Outgoing read-acknowledgement payload published to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub chat_room_id: u64,
    pub reader_id: String,
}

/// Identifiers reported read by the broker, split by kind.
///
/// Numeric ids are server message ids; non-numeric strings are
/// correlation ids for entries that were unconfirmed at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadMarks {
    pub server_ids: Vec<u64>,
    pub correlation_ids: Vec<String>,
}

impl ReadMarks {
    /// Whether the receipt contains no usable identifiers.
    pub fn is_empty(&self) -> bool {
        self.server_ids.is_empty() && self.correlation_ids.is_empty()
    }
}

/// Room metadata fetched from the REST collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomInfo {
    /// Room identifier.
    #[serde(rename = "chatroomId")]
    pub room_id: u64,
    /// `"TRANSACTION"` for listing-bound rooms, `"FRIEND"` otherwise.
    #[serde(rename = "roomType")]
    pub room_type: String,
    /// Buyer user ID when known.
    #[serde(rename = "buyerId")]
    pub buyer_id: Option<String>,
    /// Seller user ID when known.
    #[serde(rename = "sellerId")]
    pub seller_id: Option<String>,
    /// Bound listing ID for transaction rooms.
    #[serde(rename = "itemId")]
    pub item_id: Option<u64>,
    /// Bound listing title for transaction rooms.
    #[serde(rename = "itemTitle")]
    pub item_title: Option<String>,
}

/// Command channel input accepted by the room runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomCommand {
    /// Open a room: fetch metadata and history, connect, subscribe.
    /// Tears down any previously open room first.
    OpenRoom {
        /// Target room ID.
        room_id: u64,
    },
    /// Append an optimistic message and publish it to the broker.
    SendMessage {
        /// Message body.
        content: String,
    },
    /// Republish every unconfirmed local entry with its original
    /// correlation id. The manual re-attempt for sends dropped while
    /// disconnected.
    ResendPending,
    /// Publish a mark-everything-read request for the open room.
    MarkRead,
    /// Close the open room: unsubscribe, disconnect, discard the
    /// in-memory sequence.
    CloseRoom,
}

/// Event channel output emitted by the room runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomEvent {
    /// Transport state transition for the open room.
    ConnectionChanged {
        /// New connection state.
        state: ConnectionState,
    },
    /// A room was opened and its metadata resolved (best effort).
    RoomOpened {
        /// Target room ID.
        room_id: u64,
        /// Metadata when the REST fetch succeeded.
        info: Option<RoomInfo>,
    },
    /// Initial history snapshot replacing the visible sequence.
    HistoryLoaded {
        /// Target room ID.
        room_id: u64,
        /// Normalized messages in display order.
        messages: Vec<ChatMessage>,
    },
    /// One entry was appended or updated in place.
    MessageUpserted {
        /// Target room ID.
        room_id: u64,
        /// Stable position of the entry in the sequence.
        index: usize,
        /// Entry state after reconciliation.
        message: ChatMessage,
    },
    /// Read receipts flipped entries to read.
    MessagesRead {
        /// Target room ID.
        room_id: u64,
        /// Server ids of entries newly marked read.
        server_message_ids: Vec<u64>,
    },
    /// Non-fatal runtime error; the session always survives.
    RoomError {
        /// Stable machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Whether retrying may recover.
        recoverable: bool,
    },
}
