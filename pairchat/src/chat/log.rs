//! The conversation log.
//!
//! [`MessageLog`] is append-ordered: local sends and live inbound messages go
//! to the tail in arrival order and nothing is ever re-sorted. No two entries
//! share a [`DedupKey`] (author, text and timestamp truncated to the second),
//! with one exception: an inbound message that arrived without a timestamp
//! is stamped on receipt and always kept.

use std::collections::HashSet;

use pairchat_proto::event::ChatPayload;
use pairchat_proto::identity::Identity;
use pairchat_proto::timestamp::Timestamp;
use uuid::Uuid;

/// Locally generated message id, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh, time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a message for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    author: Identity,
    text: String,
    second: i64,
}

impl DedupKey {
    /// Builds the key for a message.
    #[must_use]
    pub fn new(author: &Identity, text: &str, timestamp: &Timestamp) -> Self {
        Self {
            author: author.clone(),
            text: text.to_string(),
            second: timestamp.as_secs(),
        }
    }
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Local id.
    pub id: MessageId,
    /// Who wrote it.
    pub author: Identity,
    /// Message text.
    pub text: String,
    /// When the author created it.
    pub timestamp: Timestamp,
    /// Accepted locally but not yet handed to the relay.
    pub pending: bool,
}

impl Message {
    /// Returns the message's duplicate-suppression key.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.author, &self.text, &self.timestamp)
    }
}

/// Result of [`MessageLog::merge_inbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// The message was appended.
    Appended(MessageId),
    /// A message with the same key is already in the log.
    Duplicate,
}

/// Ordered, deduplicated conversation history.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    keys: HashSet<DedupKey>,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a locally written message.
    ///
    /// Returns `None` without touching the log if a message with the same
    /// key is already present.
    pub fn append_local(
        &mut self,
        author: Identity,
        text: String,
        timestamp: Timestamp,
        pending: bool,
    ) -> Option<MessageId> {
        let key = DedupKey::new(&author, &text, &timestamp);
        if self.keys.contains(&key) {
            return None;
        }
        let id = MessageId::new();
        self.keys.insert(key);
        self.messages.push(Message {
            id,
            author,
            text,
            timestamp,
            pending,
        });
        Some(id)
    }

    /// Merges one live inbound message.
    pub fn merge_inbound(&mut self, payload: &ChatPayload) -> Merge {
        let id = MessageId::new();
        if let Some(timestamp) = payload.timestamp {
            let key = DedupKey::new(&payload.username, &payload.message, &timestamp);
            if !self.keys.insert(key) {
                return Merge::Duplicate;
            }
            self.messages.push(Message {
                id,
                author: payload.username.clone(),
                text: payload.message.clone(),
                timestamp,
                pending: false,
            });
        } else {
            self.messages.push(Message {
                id,
                author: payload.username.clone(),
                text: payload.message.clone(),
                timestamp: Timestamp::now(),
                pending: false,
            });
        }
        Merge::Appended(id)
    }

    /// Replaces the log with a relay-provided history.
    ///
    /// The history is taken in order, each entry gets a fresh id and
    /// duplicates within it are dropped. Local messages that are still
    /// pending and do not appear in the history are kept after it, so a
    /// send racing the join confirmation is not lost.
    pub fn replace_with_history(&mut self, history: &[ChatPayload]) {
        let pending: Vec<Message> = self.messages.drain(..).filter(|m| m.pending).collect();
        self.keys.clear();

        for payload in history {
            self.merge_inbound(payload);
        }

        let mut kept = 0usize;
        for message in pending {
            if self.keys.insert(message.dedup_key()) {
                self.messages.push(message);
                kept += 1;
            }
        }
        tracing::debug!(
            history = history.len(),
            kept_pending = kept,
            "log replaced with history"
        );
    }

    /// Flips the matching message to not pending. Returns `false` if no
    /// pending message has that key.
    pub fn mark_delivered(&mut self, key: &DedupKey) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.pending && m.dedup_key() == *key)
        {
            Some(message) => {
                message.pending = false;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a message with this key is present.
    #[must_use]
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Drops every message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.keys.clear();
    }

    /// The messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.pending).count()
    }
}
