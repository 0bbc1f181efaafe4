use std::collections::HashMap;

use crate::{
    normalization::new_correlation_id,
    types::{ChatMessage, OutgoingMessage, ReadMarks},
};

/// How one incoming broadcast was merged into the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// An optimistic local entry was confirmed in place.
    Confirmed {
        /// Unchanged position of the entry.
        index: usize,
    },
    /// A message from another sender was appended in arrival order.
    Appended {
        /// Position of the new entry.
        index: usize,
    },
    /// Redelivery of an already-known message; nothing was added.
    Duplicate {
        /// Position of the existing entry.
        index: usize,
    },
}

impl ReconcileOutcome {
    /// Position of the affected entry regardless of outcome kind.
    pub fn index(&self) -> usize {
        match self {
            Self::Confirmed { index } | Self::Appended { index } | Self::Duplicate { index } => {
                *index
            }
        }
    }
}

/// In-memory ordered message sequence for one open room.
///
/// The single authority resolving optimistic vs. confirmed vs.
/// read-updated state. Pending optimistic entries are resolved through
/// index maps keyed by their client-generated correlation token, so a
/// confirmation never scans or reorders the sequence: insertion order
/// is display order, and an entry's position is fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct RoomReconciler {
    room_id: u64,
    self_user_id: String,
    messages: Vec<ChatMessage>,
    by_correlation: HashMap<String, usize>,
    by_server_id: HashMap<u64, usize>,
}

impl RoomReconciler {
    /// Create an empty reconciler for `room_id`, acting as `self_user_id`.
    pub fn new(room_id: u64, self_user_id: impl Into<String>) -> Self {
        Self {
            room_id,
            self_user_id: self_user_id.into(),
            messages: Vec::new(),
            by_correlation: HashMap::new(),
            by_server_id: HashMap::new(),
        }
    }

    /// Room this sequence belongs to.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Current messages in display order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of entries in the sequence.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Sender of the newest entry, if any.
    pub fn last_sender(&self) -> Option<&str> {
        self.messages.last().map(|msg| msg.sender_id.as_str())
    }

    /// Local entries that have not been confirmed by the server yet.
    pub fn unconfirmed(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|msg| !msg.is_confirmed() && msg.sender_id == self.self_user_id)
    }

    /// Append an optimistic entry for a message the user just submitted.
    ///
    /// Returns the fresh correlation id so the caller can hand it to the
    /// transport publish unchanged.
    pub fn append_local(&mut self, content: impl Into<String>) -> String {
        let correlation_id = new_correlation_id();
        let message = ChatMessage {
            room_id: self.room_id,
            sender_id: self.self_user_id.clone(),
            content: content.into(),
            correlation_id: correlation_id.clone(),
            sent_at: None,
            server_message_id: None,
            is_read: false,
        };

        self.by_correlation
            .insert(correlation_id.clone(), self.messages.len());
        self.messages.push(message);
        correlation_id
    }

    /// Replace the sequence with the server's historical list.
    pub fn load_initial(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.rebuild_indexes();
    }

    /// Merge one incoming confirmed message into the sequence.
    ///
    /// Matches by correlation id first (confirming an optimistic entry
    /// in place), then by server id (suppressing redelivery), and only
    /// appends when the message is genuinely new.
    pub fn reconcile_incoming(&mut self, incoming: ChatMessage) -> ReconcileOutcome {
        if let Some(&index) = self.by_correlation.get(&incoming.correlation_id) {
            let already_confirmed = self.messages[index].is_confirmed();
            self.promote(index, &incoming);
            return if already_confirmed {
                ReconcileOutcome::Duplicate { index }
            } else {
                ReconcileOutcome::Confirmed { index }
            };
        }

        if let Some(server_id) = incoming.server_message_id
            && let Some(&index) = self.by_server_id.get(&server_id)
        {
            self.promote(index, &incoming);
            return ReconcileOutcome::Duplicate { index };
        }

        let index = self.messages.len();
        self.by_correlation
            .insert(incoming.correlation_id.clone(), index);
        if let Some(server_id) = incoming.server_message_id {
            self.by_server_id.insert(server_id, index);
        }
        self.messages.push(incoming);
        ReconcileOutcome::Appended { index }
    }

    /// Flip matched entries to read; returns the indices newly flipped.
    ///
    /// Joins are exact: server id against confirmed entries, correlation
    /// id against entries still awaiting confirmation. Identifiers with
    /// no match are ignored, and an entry already read stays read.
    pub fn apply_read_receipt(&mut self, marks: &ReadMarks) -> Vec<usize> {
        let mut newly_read = Vec::new();

        for server_id in &marks.server_ids {
            if let Some(&index) = self.by_server_id.get(server_id)
                && self.mark_read(index)
            {
                newly_read.push(index);
            }
        }

        for correlation_id in &marks.correlation_ids {
            if let Some(&index) = self.by_correlation.get(correlation_id)
                && self.mark_read(index)
            {
                newly_read.push(index);
            }
        }

        newly_read.sort_unstable();
        newly_read
    }

    /// Wire payload for republishing a local entry, by correlation id.
    pub fn outgoing_payload(&self, correlation_id: &str) -> Option<OutgoingMessage> {
        let index = *self.by_correlation.get(correlation_id)?;
        let message = &self.messages[index];
        Some(OutgoingMessage {
            chat_room_id: message.room_id,
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            client_id: message.correlation_id.clone(),
        })
    }

    fn promote(&mut self, index: usize, incoming: &ChatMessage) {
        let entry = &mut self.messages[index];
        if entry.sent_at.is_none() {
            entry.sent_at = incoming.sent_at;
        }
        if entry.server_message_id.is_none()
            && let Some(server_id) = incoming.server_message_id
        {
            entry.server_message_id = Some(server_id);
            self.by_server_id.insert(server_id, index);
        }
        // is_read only ever widens.
        if incoming.is_read {
            self.messages[index].is_read = true;
        }
    }

    fn mark_read(&mut self, index: usize) -> bool {
        let entry = &mut self.messages[index];
        if entry.is_read {
            return false;
        }
        entry.is_read = true;
        true
    }

    fn rebuild_indexes(&mut self) {
        self.by_correlation.clear();
        self.by_server_id.clear();
        for (index, message) in self.messages.iter().enumerate() {
            self.by_correlation
                .insert(message.correlation_id.clone(), index);
            if let Some(server_id) = message.server_message_id {
                self.by_server_id.insert(server_id, index);
            }
        }
    }
}
