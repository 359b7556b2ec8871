// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Two chat clients talking through an in-process relay.
//!
//! Each client is a full `spawn_chat` stack (WebSocket link, controller and
//! chat task). The tests observe them only through published snapshots.

use std::time::Duration;

use pairchat::chat::ChatSnapshot;
use pairchat::net::{self, ChatHandle, NetConfig};
use pairchat::transport::ws::RetryPolicy;
use pairchat_proto::identity::Identity;
use pairchat_proto::presence::PresenceStatus;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn start_relay() -> String {
    let (addr, _handle) = pairchat_relay::relay::start_server("127.0.0.1:0")
        .await
        .unwrap();
    format!("ws://{addr}/ws")
}

fn client(url: &str, user: &str, peer: &str) -> ChatHandle {
    net::spawn_chat(NetConfig {
        user: Some(Identity::from(user)),
        peer: Some(Identity::from(peer)),
        retry: RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(2),
        },
        ..NetConfig::new(url)
    })
}

async fn wait_until(
    handle: &ChatHandle,
    what: &str,
    pred: impl FnMut(&ChatSnapshot) -> bool,
) -> ChatSnapshot {
    let mut rx = handle.subscribe();
    tokio::time::timeout(TIMEOUT, rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("chat task stopped")
        .clone()
}

fn has_text(snap: &ChatSnapshot, text: &str) -> bool {
    snap.messages.iter().any(|m| m.text == text)
}

#[tokio::test]
async fn both_sides_join_the_same_session() {
    let url = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    let bob = client(&url, "bob@x.com", "alice@x.com");

    let a = wait_until(&alice, "alice joined", ChatSnapshot::is_joined).await;
    let b = wait_until(&bob, "bob joined", ChatSnapshot::is_joined).await;
    assert_eq!(a.session, b.session);

    wait_until(&alice, "bob online for alice", |s| s.peer_online).await;
    wait_until(&bob, "alice online for bob", |s| s.peer_online).await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn messages_flow_both_ways_without_duplicates() {
    let url = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    let bob = client(&url, "bob@x.com", "alice@x.com");
    wait_until(&alice, "alice joined", ChatSnapshot::is_joined).await;
    wait_until(&bob, "bob joined", ChatSnapshot::is_joined).await;

    alice.send_message("hello bob").await.unwrap();
    let snap = wait_until(&bob, "bob receives", |s| has_text(s, "hello bob")).await;
    let received = snap.messages.iter().find(|m| m.text == "hello bob").unwrap();
    assert_eq!(received.author, Identity::from("alice@x.com"));

    bob.send_message("hi alice").await.unwrap();
    let snap = wait_until(&alice, "alice receives", |s| has_text(s, "hi alice")).await;

    // Alice's own message came back from the relay too, but only once.
    let own = snap.messages.iter().filter(|m| m.text == "hello bob").count();
    assert_eq!(own, 1);
    assert!(snap.messages.iter().all(|m| !m.pending));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn late_joiner_gets_history() {
    let url = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    wait_until(&alice, "alice joined", ChatSnapshot::is_joined).await;

    alice.send_message("left while you were away").await.unwrap();
    wait_until(&alice, "message logged", |s| {
        has_text(s, "left while you were away")
    })
    .await;
    // Give the relay a moment to store it before bob asks for history.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bob = client(&url, "bob@x.com", "alice@x.com");
    wait_until(&bob, "history delivered", |s| {
        s.is_joined() && has_text(s, "left while you were away")
    })
    .await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn peer_going_away_is_seen_as_offline() {
    let url = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    let bob = client(&url, "bob@x.com", "alice@x.com");
    wait_until(&alice, "bob online", |s| s.peer_online).await;
    wait_until(&bob, "bob joined", ChatSnapshot::is_joined).await;

    bob.shutdown().await;

    let snap = wait_until(&alice, "bob offline", |s| {
        s.peer_status == PresenceStatus::Offline
    })
    .await;
    assert!(!snap.peer_online);

    alice.shutdown().await;
}

#[tokio::test]
async fn unreachable_relay_gives_up_and_keeps_messages_queued() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let handle = net::spawn_chat(NetConfig {
        user: Some(Identity::from("alice@x.com")),
        peer: Some(Identity::from("bob@x.com")),
        retry: RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(500),
        },
        ..NetConfig::new(format!("ws://{addr}/ws"))
    });

    handle.send_message("anyone there?").await.unwrap();
    let snap = wait_until(&handle, "queued", |s| s.queued == 1).await;
    assert!(snap.messages[0].pending);
    assert!(!snap.is_connected());

    handle.shutdown().await;
}
