//! Loopback link for testing.
//!
//! [`LoopbackLink`] stands in for the relay: it records every event the core
//! emits and accepts or rejects emits according to an online flag the test
//! controls. Clones share state, so a test keeps one clone for inspection
//! while the [`TransportConnection`](super::TransportConnection) owns another.
//! Inbound events are fed to the core directly by the test.

use std::sync::Arc;

use parking_lot::Mutex;

use pairchat_proto::event::{ChatPayload, ClientEvent};

use super::{RelayLink, TransportError};

#[derive(Debug, Default)]
struct LoopbackState {
    online: bool,
    sent: Vec<ClientEvent>,
    connect_calls: u32,
    disconnect_calls: u32,
}

/// In-memory [`RelayLink`] with a shared, inspectable outbox.
#[derive(Debug, Clone, Default)]
pub struct LoopbackLink {
    inner: Arc<Mutex<LoopbackState>>,
}

impl LoopbackLink {
    /// Creates an offline link with an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether emits are accepted.
    pub fn set_online(&self, online: bool) {
        self.inner.lock().online = online;
    }

    /// Returns whether emits are accepted.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.lock().online
    }

    /// Every event accepted so far, in emit order.
    #[must_use]
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.inner.lock().sent.clone()
    }

    /// Drains and returns the outbox.
    #[must_use]
    pub fn take_sent(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    /// The `send_message` payloads accepted so far, in emit order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<ChatPayload> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter_map(|event| match event {
                ClientEvent::SendMessage(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times `connect` was called.
    #[must_use]
    pub fn connect_calls(&self) -> u32 {
        self.inner.lock().connect_calls
    }

    /// How many times `disconnect` was called.
    #[must_use]
    pub fn disconnect_calls(&self) -> u32 {
        self.inner.lock().disconnect_calls
    }
}

impl RelayLink for LoopbackLink {
    fn connect(&self) {
        self.inner.lock().connect_calls += 1;
    }

    fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.disconnect_calls += 1;
        state.online = false;
    }

    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        if !state.online {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(event.clone());
        Ok(())
    }
}
