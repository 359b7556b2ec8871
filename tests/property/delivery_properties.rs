//! Property tests for the message log and the delivery queue.
//!
//! 1. Merging the same inbound messages any number of times leaves the log
//!    as if each had been merged once.
//! 2. Whatever prefix of a flush the transport accepts, the accepted entries
//!    plus the requeued ones are exactly the original queue, in order.

use std::collections::HashSet;

use pairchat::chat::delivery::{DeliveryEntry, DeliveryQueue};
use pairchat::chat::log::{Message, MessageLog};
use pairchat::transport::TransportError;
use pairchat_proto::event::ChatPayload;
use pairchat_proto::identity::Identity;
use pairchat_proto::timestamp::Timestamp;
use proptest::prelude::*;

fn arb_payload() -> impl Strategy<Value = ChatPayload> {
    (
        prop::sample::select(vec!["a@x.com", "b@x.com"]),
        "[a-z ]{1,16}",
        1_700_000_000_000i64..1_700_000_010_000,
    )
        .prop_map(|(author, text, millis)| ChatPayload {
            username: Identity::from(author),
            message: text,
            recipient: None,
            timestamp: Timestamp::from_millis(millis),
        })
}

fn entry(n: usize) -> DeliveryEntry {
    DeliveryEntry {
        author: Identity::from("a@x.com"),
        text: format!("message {n}"),
        recipient: Identity::from("b@x.com"),
        timestamp: Timestamp::now(),
    }
}

proptest! {
    #[test]
    fn merge_is_idempotent(
        payloads in prop::collection::vec(arb_payload(), 0..32),
        repeats in 1usize..4,
    ) {
        let mut once = MessageLog::new();
        for p in &payloads {
            once.merge_inbound(p);
        }

        let mut many = MessageLog::new();
        for _ in 0..repeats {
            for p in &payloads {
                many.merge_inbound(p);
            }
        }

        let texts = |log: &MessageLog| -> Vec<(Identity, String)> {
            log.messages()
                .iter()
                .map(|m| (m.author.clone(), m.text.clone()))
                .collect()
        };
        prop_assert_eq!(texts(&once), texts(&many));
    }

    #[test]
    fn history_replace_has_no_duplicate_keys(
        payloads in prop::collection::vec(arb_payload(), 0..32),
    ) {
        let mut log = MessageLog::new();
        log.replace_with_history(&payloads);

        let keys: HashSet<_> = log.messages().iter().map(Message::dedup_key).collect();
        prop_assert_eq!(keys.len(), log.len());
        prop_assert!(log.messages().iter().all(|m| !m.pending));
    }

    #[test]
    fn flush_preserves_order_across_failures(
        count in 0usize..24,
        accept in 0usize..30,
    ) {
        let mut queue = DeliveryQueue::new();
        for n in 0..count {
            queue.enqueue(entry(n));
        }

        let mut sent = 0usize;
        let report = queue.flush(|_| {
            if sent < accept {
                sent += 1;
                Ok(())
            } else {
                Err(TransportError::NotConnected)
            }
        });

        let expected_delivered = count.min(accept);
        prop_assert_eq!(report.delivered.len(), expected_delivered);
        prop_assert_eq!(report.requeued, count - expected_delivered);
        prop_assert_eq!(queue.len(), count - expected_delivered);

        let order: Vec<String> = report
            .delivered
            .iter()
            .chain(queue.iter())
            .map(|e| e.text.clone())
            .collect();
        let original: Vec<String> = (0..count).map(|n| format!("message {n}")).collect();
        prop_assert_eq!(order, original);
    }
}
