// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end scenarios for `ChatSessionController` over a loopback link.
//!
//! The test plays the relay: it flips the link online, feeds inbound events
//! and inspects what the controller emitted. Time is driven explicitly so
//! retry and refresh deadlines are deterministic.

use std::time::{Duration, Instant};

use pairchat::chat::session::NegotiationState;
use pairchat::chat::{ChatConfig, ChatSessionController, SendOutcome};
use pairchat::transport::InboundEvent;
use pairchat::transport::loopback::LoopbackLink;
use pairchat_proto::event::{
    ChatPayload, ClientEvent, RoomJoined, ServerEvent, UserDisconnected, UserJoined,
};
use pairchat_proto::identity::Identity;
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::session::SessionId;
use pairchat_proto::timestamp::Timestamp;

fn a() -> Identity {
    Identity::from("a@x.com")
}

fn b() -> Identity {
    Identity::from("b@x.com")
}

fn paired() -> (ChatSessionController<LoopbackLink>, LoopbackLink) {
    let link = LoopbackLink::new();
    let mut chat = ChatSessionController::new(link.clone(), &ChatConfig::default());
    chat.set_identities(Some(a()), Some(b()));
    (chat, link)
}

fn go_online(chat: &mut ChatSessionController<LoopbackLink>, link: &LoopbackLink, now: Instant) {
    link.set_online(true);
    chat.handle_event(&InboundEvent::Connect, now);
}

fn go_offline(chat: &mut ChatSessionController<LoopbackLink>, link: &LoopbackLink, now: Instant) {
    link.set_online(false);
    chat.handle_event(&InboundEvent::Disconnect, now);
}

fn confirm(chat: &mut ChatSessionController<LoopbackLink>, history: Option<Vec<ChatPayload>>) {
    chat.handle_event(
        &InboundEvent::Server(ServerEvent::RoomJoined(RoomJoined {
            room: SessionId::derive(&a(), &b()),
            sender: Some(a()),
            recipient: Some(b()),
            recipient_online: Some(true),
            message_history: history,
        })),
        Instant::now(),
    );
}

fn payload(author: &Identity, text: &str, millis: i64) -> ChatPayload {
    ChatPayload {
        username: author.clone(),
        message: text.to_string(),
        recipient: None,
        timestamp: Timestamp::from_millis(millis),
    }
}

fn texts(chat: &ChatSessionController<LoopbackLink>) -> Vec<&str> {
    chat.messages().iter().map(|m| m.text.as_str()).collect()
}

#[test]
fn offline_sends_are_queued_then_flushed_in_order() {
    let now = Instant::now();
    let (mut chat, link) = paired();

    assert!(matches!(chat.send_message("hi"), SendOutcome::Queued(_)));
    assert!(matches!(chat.send_message("there"), SendOutcome::Queued(_)));
    assert_eq!(chat.queue_len(), 2);
    assert!(chat.messages().iter().all(|m| m.pending));
    assert!(link.sent_messages().is_empty());

    go_online(&mut chat, &link, now);

    let delivered: Vec<String> = link.sent_messages().into_iter().map(|p| p.message).collect();
    assert_eq!(delivered, ["hi", "there"]);
    assert_eq!(chat.queue_len(), 0);
    assert!(chat.messages().iter().all(|m| !m.pending));
    for message in link.sent_messages() {
        assert_eq!(message.recipient, Some(b()));
        assert_eq!(message.username, a());
    }
}

#[test]
fn connect_announces_presence_then_joins_and_asks_for_peer_status() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);

    let sent = link.sent();
    assert!(matches!(
        sent.first(),
        Some(ClientEvent::UserStatusChange(change)) if change.status == PresenceStatus::Online
    ));
    assert!(sent.iter().any(|e| matches!(
        e,
        ClientEvent::JoinPrivateChat(join) if join.sender_email == a() && join.recipient_email == b()
    )));
    assert!(sent.iter().any(|e| matches!(
        e,
        ClientEvent::RequestUserStatus(req) if req.target_email == b()
    )));
    assert_eq!(chat.negotiation_state(), NegotiationState::Negotiating);

    confirm(&mut chat, None);
    assert_eq!(chat.negotiation_state(), NegotiationState::Joined);
    assert_eq!(chat.peer_status(now), PresenceStatus::Online);
}

#[test]
fn history_replaces_the_log() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);

    chat.handle_event(
        &InboundEvent::Server(ServerEvent::ReceiveMessage(payload(&b(), "stale", 1_000))),
        now,
    );
    confirm(
        &mut chat,
        Some(vec![
            payload(&a(), "first", 1_700_000_000_000),
            payload(&b(), "second", 1_700_000_001_000),
        ]),
    );

    assert_eq!(texts(&chat), ["first", "second"]);
}

#[test]
fn unsent_messages_survive_history_replacement() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    assert!(matches!(chat.send_message("draft"), SendOutcome::Queued(_)));

    // Connected for the relay, but the flush failed: the link refuses emits.
    chat.handle_event(&InboundEvent::Connect, now);
    assert_eq!(chat.queue_len(), 1);

    confirm(&mut chat, Some(vec![payload(&b(), "older", 1_700_000_000_000)]));
    assert_eq!(texts(&chat), ["older", "draft"]);
    assert!(chat.messages()[1].pending);
    assert!(link.sent_messages().is_empty());
}

#[test]
fn duplicate_inbound_messages_are_suppressed() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    confirm(&mut chat, None);

    let event = InboundEvent::Server(ServerEvent::ReceiveMessage(payload(
        &b(),
        "hello",
        1_700_000_000_250,
    )));
    chat.handle_event(&event, now);
    chat.handle_event(&event, now);
    // Same author, text and second: still the same message.
    chat.handle_event(
        &InboundEvent::Server(ServerEvent::ReceiveMessage(payload(
            &b(),
            "hello",
            1_700_000_000_900,
        ))),
        now,
    );

    assert_eq!(texts(&chat), ["hello"]);
}

#[test]
fn own_echo_does_not_duplicate_a_sent_message() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    confirm(&mut chat, None);

    assert!(matches!(chat.send_message("ping"), SendOutcome::Sent(_)));
    let echoed = link.sent_messages().pop().unwrap();
    chat.handle_event(&InboundEvent::Server(ServerEvent::ReceiveMessage(echoed)), now);

    assert_eq!(texts(&chat), ["ping"]);
    assert!(!chat.messages()[0].pending);
}

#[test]
fn changing_the_peer_tears_the_session_down() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    confirm(&mut chat, None);
    chat.handle_event(
        &InboundEvent::Server(ServerEvent::ReceiveMessage(payload(
            &b(),
            "hello",
            1_700_000_000_000,
        ))),
        now,
    );
    assert!(chat.next_deadline().is_some());

    chat.handle_event(
        &InboundEvent::Server(ServerEvent::UserJoined(UserJoined {
            email: b(),
            status: None,
            room: None,
        })),
        now,
    );
    assert_eq!(chat.peer_status(now), PresenceStatus::Online);

    chat.set_recipient(Identity::from("c@x.com"));

    assert!(chat.messages().is_empty());
    assert_eq!(chat.status_of(&b(), now), PresenceStatus::Unknown);
    assert_eq!(chat.negotiation_state(), NegotiationState::Idle);
    assert_eq!(chat.next_deadline(), None);

    let _ = link.take_sent();
    assert!(chat.initialize_chat(now));
    assert!(link.sent().iter().any(|e| matches!(
        e,
        ClientEvent::JoinPrivateChat(join) if join.recipient_email == Identity::from("c@x.com")
    )));
}

#[test]
fn lost_connection_renegotiates_on_reconnect() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    confirm(&mut chat, None);

    go_offline(&mut chat, &link, now);
    assert!(!chat.is_connected());
    assert_eq!(chat.negotiation_state(), NegotiationState::Joined);

    let _ = link.take_sent();
    link.set_online(true);
    chat.handle_event(&InboundEvent::ReconnectAttempt(1), now);
    chat.handle_event(&InboundEvent::Connect, now);
    chat.handle_event(&InboundEvent::Reconnect, now);

    assert!(chat.is_connected());
    assert_eq!(chat.transport().reconnect_attempts(), 0);
    assert!(
        link.sent()
            .iter()
            .any(|e| matches!(e, ClientEvent::JoinPrivateChat(_)))
    );
}

#[test]
fn join_retry_backs_off_until_confirmed() {
    let start = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, start);
    let joins = |link: &LoopbackLink| {
        link.sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::JoinPrivateChat(_)))
            .count()
    };
    assert_eq!(joins(&link), 1);

    // Nothing due before the first retry delay.
    chat.on_tick(start + Duration::from_secs(1));
    assert_eq!(joins(&link), 1);

    let first = chat.next_deadline().unwrap();
    chat.on_tick(first);
    assert_eq!(joins(&link), 2);

    let second = chat.next_deadline().unwrap();
    assert!(second > first);

    confirm(&mut chat, None);
    let after = joins(&link);
    chat.on_tick(second + Duration::from_secs(60));
    assert_eq!(joins(&link), after);
}

#[test]
fn peer_presence_follows_relay_events() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    assert_eq!(chat.peer_status(now), PresenceStatus::Unknown);

    chat.handle_event(
        &InboundEvent::Server(ServerEvent::UserJoined(UserJoined {
            email: b(),
            status: None,
            room: None,
        })),
        now,
    );
    assert_eq!(chat.peer_status(now), PresenceStatus::Online);
    assert!(chat.snapshot(now).peer_online);

    chat.handle_event(
        &InboundEvent::Server(ServerEvent::UserDisconnected(UserDisconnected { email: b() })),
        now,
    );
    assert_eq!(chat.peer_status(now), PresenceStatus::Offline);
    assert!(!chat.snapshot(now).peer_online);

    // Entries expire after the presence lifetime.
    chat.handle_event(
        &InboundEvent::Server(ServerEvent::UserJoined(UserJoined {
            email: b(),
            status: Some(PresenceStatus::Online),
            room: None,
        })),
        now,
    );
    assert_eq!(chat.peer_status(now), PresenceStatus::Online);
    assert_eq!(
        chat.peer_status(now + Duration::from_secs(31)),
        PresenceStatus::Unknown
    );
}

#[test]
fn messages_from_the_previous_pair_are_ignored_after_switching() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    confirm(&mut chat, None);

    let c = Identity::from("c@x.com");
    chat.set_recipient(c.clone());

    // Still routed to the old room until the new join lands.
    let stale = ChatPayload {
        recipient: Some(a()),
        ..payload(&b(), "from the old room", 1_700_000_000_000)
    };
    chat.handle_event(&InboundEvent::Server(ServerEvent::ReceiveMessage(stale)), now);
    let own_stale = ChatPayload {
        recipient: Some(b()),
        ..payload(&a(), "mine, old room", 1_700_000_000_000)
    };
    chat.handle_event(
        &InboundEvent::Server(ServerEvent::ReceiveMessage(own_stale)),
        now,
    );
    assert!(chat.messages().is_empty());

    let fresh = ChatPayload {
        recipient: Some(a()),
        ..payload(&c, "hi from c", 1_700_000_001_000)
    };
    chat.handle_event(&InboundEvent::Server(ServerEvent::ReceiveMessage(fresh)), now);
    assert_eq!(texts(&chat), ["hi from c"]);
}

#[test]
fn queued_messages_outlive_a_give_up() {
    let now = Instant::now();
    let (mut chat, link) = paired();
    go_online(&mut chat, &link, now);
    confirm(&mut chat, None);

    go_offline(&mut chat, &link, now);
    chat.handle_event(&InboundEvent::ReconnectAttempt(1), now);
    chat.handle_event(&InboundEvent::ReconnectAttempt(2), now);
    chat.handle_event(&InboundEvent::ReconnectFailed, now);
    let connects = link.connect_calls();

    assert!(matches!(chat.send_message("still here"), SendOutcome::Queued(_)));
    assert_eq!(link.connect_calls(), connects + 1);

    let _ = link.take_sent();
    go_online(&mut chat, &link, now);
    let delivered: Vec<String> = link.sent_messages().into_iter().map(|p| p.message).collect();
    assert_eq!(delivered, ["still here"]);
}
