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

//! Reconnection against a live relay.
//!
//! The relay's `close_all_connections` sends a close frame to every client,
//! which the clients treat as a dropped connection. The reconnect delay is
//! long enough for a test to act while the clients are offline.

use std::sync::Arc;
use std::time::Duration;

use pairchat::chat::ChatSnapshot;
use pairchat::net::{self, ChatHandle, NetConfig};
use pairchat::transport::ConnectionState;
use pairchat::transport::ws::RetryPolicy;
use pairchat_proto::identity::Identity;
use pairchat_relay::relay::{self, RelayState};

const TIMEOUT: Duration = Duration::from_secs(15);

async fn start_relay() -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), state)
}

fn client(url: &str, user: &str, peer: &str) -> ChatHandle {
    net::spawn_chat(NetConfig {
        user: Some(Identity::from(user)),
        peer: Some(Identity::from(peer)),
        retry: RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(2),
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
async fn client_reconnects_and_rejoins_after_drop() {
    let (url, state) = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    wait_until(&alice, "joined", ChatSnapshot::is_joined).await;

    state.close_all_connections().await;

    let snap = wait_until(&alice, "reconnecting", |s| !s.is_connected()).await;
    assert_ne!(snap.connection, ConnectionState::Connected);

    let snap = wait_until(&alice, "rejoined", |s| s.is_connected() && s.is_joined()).await;
    assert_eq!(snap.reconnect_attempts, 0);

    alice.shutdown().await;
}

#[tokio::test]
async fn messages_sent_while_offline_are_delivered_after_reconnect() {
    let (url, state) = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    let bob = client(&url, "bob@x.com", "alice@x.com");
    wait_until(&alice, "alice joined", ChatSnapshot::is_joined).await;
    wait_until(&bob, "bob joined", ChatSnapshot::is_joined).await;

    state.close_all_connections().await;
    wait_until(&alice, "alice offline", |s| !s.is_connected()).await;

    alice.send_message("sent while offline").await.unwrap();
    alice.send_message("and another").await.unwrap();
    let snap = wait_until(&alice, "queued", |s| s.queued == 2).await;
    assert!(snap.messages.iter().all(|m| m.pending));

    let snap = wait_until(&alice, "flushed", |s| s.is_connected() && s.queued == 0).await;
    assert!(snap.messages.iter().all(|m| !m.pending));

    let snap = wait_until(&bob, "bob receives both", |s| {
        has_text(s, "sent while offline") && has_text(s, "and another")
    })
    .await;
    let order: Vec<&str> = snap
        .messages
        .iter()
        .map(|m| m.text.as_str())
        .filter(|t| *t == "sent while offline" || *t == "and another")
        .collect();
    assert_eq!(order, ["sent while offline", "and another"]);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn shutdown_during_reconnect_completes() {
    let (url, state) = start_relay().await;
    let alice = client(&url, "alice@x.com", "bob@x.com");
    wait_until(&alice, "joined", ChatSnapshot::is_joined).await;

    state.close_all_connections().await;
    wait_until(&alice, "offline", |s| !s.is_connected()).await;

    tokio::time::timeout(TIMEOUT, alice.shutdown())
        .await
        .expect("shutdown hung during reconnect");
}
