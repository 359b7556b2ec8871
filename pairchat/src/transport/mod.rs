//! Connection to the relay.
//!
//! The relay and its event-transport library are a single collaborator
//! behind the [`RelayLink`] trait: it can be asked to connect (with its own
//! automatic retry), to disconnect, and to emit named events. Everything the
//! link observes comes back as [`InboundEvent`]s on a channel.
//!
//! [`TransportConnection`] owns one link and turns the inbound stream into
//! observable flags (`connected`, `reconnect_attempts`) plus a subscriber
//! registry keyed by [`EventName`]. Implementations of [`RelayLink`]:
//! - [`ws::WsLink`]: WebSocket link with bounded, linearly backed-off retry
//! - [`loopback::LoopbackLink`]: in-memory link for tests

pub mod loopback;
pub mod ws;

use std::fmt;

use pairchat_proto::event::{ClientEvent, CodecError, ServerEvent, StatusChange};
use pairchat_proto::presence::PresenceStatus;

/// Errors reported by a [`RelayLink`].
///
/// None of these are fatal: the caller either queues the work or logs and
/// moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No live connection to the relay.
    #[error("not connected to relay")]
    NotConnected,

    /// The link's background task has gone away.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting took longer than the configured timeout.
    #[error("transport operation timed out")]
    Timeout,

    /// The relay address could not be reached.
    #[error("relay {0} is unreachable")]
    Unreachable(String),

    /// The event could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The event-transport collaborator.
///
/// `emit` is a non-blocking handoff: `Ok(())` means the event was accepted
/// for transmission on the current connection, not that the relay saw it.
pub trait RelayLink: Send {
    /// Open the connection (or restart retrying) if it is not already open.
    fn connect(&self);

    /// Close the connection and stop retrying until the next [`connect`](Self::connect).
    fn disconnect(&self);

    /// Hand an event to the connection for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if there is no live
    /// connection, or another [`TransportError`] if the handoff failed.
    fn emit(&self, event: &ClientEvent) -> Result<(), TransportError>;
}

/// Everything a link can report to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A connection to the relay was established.
    Connect,
    /// The connection to the relay dropped.
    Disconnect,
    /// The link is about to make retry number `n` (1-based).
    ReconnectAttempt(u32),
    /// A retry succeeded.
    Reconnect,
    /// The link exhausted its retry budget and stopped.
    ReconnectFailed,
    /// A named event sent by the relay.
    Server(ServerEvent),
}

impl InboundEvent {
    /// Returns the subscription key for this event.
    #[must_use]
    pub const fn name(&self) -> EventName {
        match self {
            Self::Connect => EventName::Connect,
            Self::Disconnect => EventName::Disconnect,
            Self::ReconnectAttempt(_) => EventName::ReconnectAttempt,
            Self::Reconnect => EventName::Reconnect,
            Self::ReconnectFailed => EventName::ReconnectFailed,
            Self::Server(event) => match event {
                ServerEvent::ConnectionSuccess(_) => EventName::ConnectionSuccess,
                ServerEvent::RoomJoined(_) => EventName::RoomJoined,
                ServerEvent::UserJoined(_) => EventName::UserJoined,
                ServerEvent::UserDisconnected(_) => EventName::UserDisconnected,
                ServerEvent::UserStatusUpdate(_) => EventName::UserStatusUpdate,
                ServerEvent::ReceiveMessage(_) => EventName::ReceiveMessage,
                ServerEvent::MessageSent(_) => EventName::MessageSent,
                ServerEvent::Error(_) => EventName::Error,
            },
        }
    }
}

/// Names of inbound events, used as subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `connection_success`
    ConnectionSuccess,
    /// `reconnect_attempt`
    ReconnectAttempt,
    /// `reconnect`
    Reconnect,
    /// `reconnect_failed`
    ReconnectFailed,
    /// `room_joined`
    RoomJoined,
    /// `user_joined`
    UserJoined,
    /// `user_disconnected`
    UserDisconnected,
    /// `user_status_update`
    UserStatusUpdate,
    /// `receive_message`
    ReceiveMessage,
    /// `message_sent`
    MessageSent,
    /// `error`
    Error,
}

impl EventName {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::ConnectionSuccess => "connection_success",
            Self::ReconnectAttempt => "reconnect_attempt",
            Self::Reconnect => "reconnect",
            Self::ReconnectFailed => "reconnect_failed",
            Self::RoomJoined => "room_joined",
            Self::UserJoined => "user_joined",
            Self::UserDisconnected => "user_disconnected",
            Self::UserStatusUpdate => "user_status_update",
            Self::ReceiveMessage => "receive_message",
            Self::MessageSent => "message_sent",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// A connection attempt (first or retry) is in progress.
    Connecting,
    /// Connected to the relay.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Connectivity edge produced by [`TransportConnection::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The connection became usable.
    Connected,
    /// A usable connection was lost.
    Lost,
}

/// Handle returned by [`TransportConnection::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked for every inbound event of a subscribed name.
pub type EventHandler = Box<dyn FnMut(&InboundEvent) + Send>;

struct Subscriber {
    id: SubscriptionId,
    name: EventName,
    handler: EventHandler,
}

/// The single connection to the relay, as seen by the rest of the core.
pub struct TransportConnection<L: RelayLink> {
    link: L,
    state: ConnectionState,
    reconnect_attempts: u32,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

impl<L: RelayLink> TransportConnection<L> {
    /// Wraps a link and asks it to start connecting.
    pub fn new(link: L) -> Self {
        link.connect();
        Self {
            link,
            state: ConnectionState::Connecting,
            reconnect_attempts: 0,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Ask the link to connect. No-op while already connected.
    pub fn connect(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }
        self.state = ConnectionState::Connecting;
        self.link.connect();
    }

    /// Close the connection and stop automatic retry.
    pub fn disconnect(&mut self) {
        self.link.disconnect();
        self.state = ConnectionState::Disconnected;
    }

    /// Hand an event to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] without touching the link
    /// while the connection is not up, or whatever the link reports.
    pub fn emit(&self, event: &ClientEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.link.emit(event)
    }

    /// Returns `true` while connected to the relay.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Returns the current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of retries since the last successful connect.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Register a handler for every inbound event named `name`.
    pub fn on(&mut self, name: EventName, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber { id, name, handler });
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Update connection state from an inbound event, then notify subscribers.
    ///
    /// Returns the connectivity edge the event caused, if any. On every
    /// transition into `Connected` the presence-online notification is sent.
    pub fn handle(&mut self, event: &InboundEvent) -> Option<Transition> {
        let transition = self.apply(event);

        if transition == Some(Transition::Connected) {
            let online = ClientEvent::UserStatusChange(StatusChange {
                status: PresenceStatus::Online,
            });
            if let Err(e) = self.emit(&online) {
                tracing::debug!(error = %e, "failed to announce online status");
            }
        }

        let name = event.name();
        for sub in self.subscribers.iter_mut().filter(|s| s.name == name) {
            (sub.handler)(event);
        }

        transition
    }

    fn apply(&mut self, event: &InboundEvent) -> Option<Transition> {
        match event {
            InboundEvent::Connect
            | InboundEvent::Reconnect
            | InboundEvent::Server(ServerEvent::ConnectionSuccess(_)) => {
                if self.state == ConnectionState::Connected {
                    return None;
                }
                tracing::info!(attempts = self.reconnect_attempts, "connected to relay");
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                Some(Transition::Connected)
            }
            InboundEvent::Disconnect => {
                let was_connected = self.state == ConnectionState::Connected;
                self.state = ConnectionState::Disconnected;
                if was_connected {
                    tracing::info!("disconnected from relay");
                    Some(Transition::Lost)
                } else {
                    None
                }
            }
            InboundEvent::ReconnectAttempt(n) => {
                tracing::debug!(attempt = n, "reconnecting to relay");
                self.reconnect_attempts = *n;
                let was_connected = self.state == ConnectionState::Connected;
                self.state = ConnectionState::Connecting;
                was_connected.then_some(Transition::Lost)
            }
            InboundEvent::ReconnectFailed => {
                tracing::warn!(
                    attempts = self.reconnect_attempts,
                    "gave up reconnecting to relay"
                );
                self.state = ConnectionState::Disconnected;
                None
            }
            InboundEvent::Server(_) => None,
        }
    }
}
