//! Outbound delivery queue.
//!
//! Messages that cannot be handed to the relay right away wait here in send
//! order. [`DeliveryQueue::flush`] takes the whole queue before sending
//! anything, so a second flush started while the first is still running
//! sees an empty queue instead of sending the same entries twice.

use std::collections::VecDeque;

use pairchat_proto::event::{ChatPayload, ClientEvent};
use pairchat_proto::identity::Identity;
use pairchat_proto::timestamp::Timestamp;

use crate::transport::TransportError;

use super::log::DedupKey;

/// Transmissible snapshot of a local message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEntry {
    /// Author of the message.
    pub author: Identity,
    /// Message text.
    pub text: String,
    /// Addressee.
    pub recipient: Identity,
    /// Creation time, kept so a late delivery carries the original time.
    pub timestamp: Timestamp,
}

impl DeliveryEntry {
    /// Key of the log message this entry was made from.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.author, &self.text, &self.timestamp)
    }

    /// The `send_message` event for this entry.
    #[must_use]
    pub fn to_event(&self) -> ClientEvent {
        ClientEvent::SendMessage(ChatPayload {
            username: self.author.clone(),
            message: self.text.clone(),
            recipient: Some(self.recipient.clone()),
            timestamp: Some(self.timestamp),
        })
    }
}

/// What a flush did.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Entries handed to the transport, in send order.
    pub delivered: Vec<DeliveryEntry>,
    /// Entries put back because the transport refused one of them.
    pub requeued: usize,
}

/// FIFO of messages waiting for a connection.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    entries: VecDeque<DeliveryEntry>,
}

impl DeliveryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail.
    pub fn enqueue(&mut self, entry: DeliveryEntry) {
        self.entries.push_back(entry);
        tracing::debug!(queued = self.entries.len(), "message queued for delivery");
    }

    /// Drains the queue through `send`, in order.
    ///
    /// Stops at the first entry `send` rejects; that entry and everything
    /// after it go back to the head of the queue in their original order.
    pub fn flush<F>(&mut self, mut send: F) -> FlushReport
    where
        F: FnMut(&DeliveryEntry) -> Result<(), TransportError>,
    {
        let mut batch = std::mem::take(&mut self.entries);
        let mut report = FlushReport::default();

        while let Some(entry) = batch.pop_front() {
            match send(&entry) {
                Ok(()) => report.delivered.push(entry),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        remaining = batch.len() + 1,
                        "flush interrupted, requeueing"
                    );
                    batch.push_front(entry);
                    report.requeued = batch.len();
                    batch.append(&mut self.entries);
                    self.entries = batch;
                    break;
                }
            }
        }

        if !report.delivered.is_empty() {
            tracing::info!(count = report.delivered.len(), "flushed queued messages");
        }
        report
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued entries, head first.
    pub fn iter(&self) -> impl Iterator<Item = &DeliveryEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> DeliveryEntry {
        DeliveryEntry {
            author: Identity::from("a@x.com"),
            text: text.to_string(),
            recipient: Identity::from("b@x.com"),
            timestamp: Timestamp::from_millis(1_700_000_000_000).unwrap(),
        }
    }

    fn texts(queue: &DeliveryQueue) -> Vec<String> {
        queue.iter().map(|e| e.text.clone()).collect()
    }

    #[test]
    fn flush_sends_in_enqueue_order_and_empties() {
        let mut queue = DeliveryQueue::new();
        for text in ["s1", "s2", "s3"] {
            queue.enqueue(entry(text));
        }

        let mut sent = Vec::new();
        let report = queue.flush(|e| {
            sent.push(e.text.clone());
            Ok(())
        });

        assert_eq!(sent, ["s1", "s2", "s3"]);
        assert_eq!(report.delivered.len(), 3);
        assert_eq!(report.requeued, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejected_entry_and_tail_are_requeued_in_order() {
        let mut queue = DeliveryQueue::new();
        for text in ["s1", "s2", "s3"] {
            queue.enqueue(entry(text));
        }

        let report = queue.flush(|e| {
            if e.text == "s2" {
                Err(TransportError::NotConnected)
            } else {
                Ok(())
            }
        });

        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.requeued, 2);
        assert_eq!(texts(&queue), ["s2", "s3"]);
    }

    #[test]
    fn flush_of_empty_queue_is_a_no_op() {
        let mut queue = DeliveryQueue::new();
        let report = queue.flush(|_| Err(TransportError::NotConnected));
        assert!(report.delivered.is_empty());
        assert_eq!(report.requeued, 0);
    }

    #[test]
    fn entry_event_carries_original_timestamp() {
        let e = entry("hi");
        let ClientEvent::SendMessage(payload) = e.to_event() else {
            panic!("expected send_message");
        };
        assert_eq!(payload.timestamp, Some(e.timestamp));
        assert_eq!(payload.recipient, Some(Identity::from("b@x.com")));
    }
}
