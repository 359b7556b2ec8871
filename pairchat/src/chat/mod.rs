//! Chat session layer for `PairChat`.
//!
//! Contains the [`ChatSessionController`] which ties the transport, the
//! session negotiator, the delivery queue, the message log and presence
//! tracking together behind two entry points: [`initialize_chat`] and
//! [`send_message`].
//!
//! The controller is a plain state machine. It never spawns or sleeps:
//! inbound events and the current instant are handed in by the caller
//! (see [`crate::net`]), and [`next_deadline`] tells the caller when to
//! call [`on_tick`] next.
//!
//! [`initialize_chat`]: ChatSessionController::initialize_chat
//! [`send_message`]: ChatSessionController::send_message
//! [`next_deadline`]: ChatSessionController::next_deadline
//! [`on_tick`]: ChatSessionController::on_tick

pub mod delivery;
pub mod log;
pub mod presence;
pub mod session;

use std::time::{Duration, Instant};

use pairchat_proto::event::{ChatPayload, ClientEvent, RequestUserStatus, ServerEvent};
use pairchat_proto::identity::Identity;
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::session::SessionId;
use pairchat_proto::timestamp::Timestamp;

use crate::timer::{self, Timer};
use crate::transport::{
    ConnectionState, EventHandler, EventName, InboundEvent, RelayLink, SubscriptionId,
    Transition, TransportConnection,
};

use delivery::{DeliveryEntry, DeliveryQueue};
use log::{Merge, Message, MessageId, MessageLog};
use presence::PresenceTracker;
use session::{JoinRetryPolicy, NegotiationState, RetryAction, SessionNegotiator};

/// Why a send was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    /// The local user or the peer is not set.
    #[error("both identities must be set before sending")]
    MissingIdentity,
    /// The text is empty after trimming.
    #[error("message text is empty")]
    EmptyText,
    /// An identical message was sent within the same second.
    #[error("identical message already in the log")]
    Duplicate,
}

/// Result of [`ChatSessionController::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the relay immediately.
    Sent(MessageId),
    /// Logged as pending and queued until the connection returns.
    Queued(MessageId),
    /// Nothing was logged or sent.
    Dropped(DropReason),
}

/// Tunables for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Join retry schedule.
    pub join_retry: JoinRetryPolicy,
    /// Presence refresh period, `None` to disable.
    pub presence_refresh: Option<Duration>,
    /// Age after which a presence entry reads as unknown, `None` to disable.
    pub presence_ttl: Option<Duration>,
    /// Wait before dialling again once the link has given up, `None` to
    /// stay offline until the next send or `initialize_chat`.
    pub reconnect_after: Option<Duration>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            join_retry: JoinRetryPolicy::default(),
            presence_refresh: Some(Duration::from_secs(10)),
            presence_ttl: Some(Duration::from_secs(30)),
            reconnect_after: Some(Duration::from_secs(60)),
        }
    }
}

/// Read-only view of the controller, published to the UI after every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    /// Conversation in display order.
    pub messages: Vec<Message>,
    /// Relay connection state.
    pub connection: ConnectionState,
    /// Retries since the last successful connect.
    pub reconnect_attempts: u32,
    /// Negotiation state.
    pub negotiation: NegotiationState,
    /// Session being negotiated or joined.
    pub session: Option<SessionId>,
    /// The local user.
    pub user: Option<Identity>,
    /// The other participant.
    pub peer: Option<Identity>,
    /// Last known status of the peer.
    pub peer_status: PresenceStatus,
    /// Connected and the peer is known to be online.
    pub peer_online: bool,
    /// Messages waiting for a connection.
    pub queued: usize,
    /// Sends dropped so far.
    pub dropped_sends: u64,
    /// Why the most recent send was dropped.
    pub last_drop: Option<DropReason>,
}

impl ChatSnapshot {
    /// Returns `true` while connected to the relay.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Returns `true` once the session is confirmed.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.negotiation == NegotiationState::Joined
    }
}

/// Orchestrates one two-party chat session over one relay connection.
pub struct ChatSessionController<L: RelayLink> {
    transport: TransportConnection<L>,
    user: Option<Identity>,
    peer: Option<Identity>,
    log: MessageLog,
    queue: DeliveryQueue,
    negotiator: SessionNegotiator,
    presence: PresenceTracker,
    reconnect: Timer,
    reconnect_after: Option<Duration>,
    dropped_sends: u64,
    last_drop: Option<DropReason>,
}

impl<L: RelayLink> ChatSessionController<L> {
    /// Creates a controller and starts connecting `link`.
    pub fn new(link: L, config: &ChatConfig) -> Self {
        Self {
            transport: TransportConnection::new(link),
            user: None,
            peer: None,
            log: MessageLog::new(),
            queue: DeliveryQueue::new(),
            negotiator: SessionNegotiator::new(config.join_retry.clone()),
            presence: PresenceTracker::new(config.presence_refresh, config.presence_ttl),
            reconnect: Timer::new(),
            reconnect_after: config.reconnect_after,
            dropped_sends: 0,
            last_drop: None,
        }
    }

    /// Sets both identities. Empty identities count as unset.
    ///
    /// Any change tears the current session down: the log and the presence
    /// map are cleared, negotiation goes back to `Idle` and both session
    /// deadlines are cancelled.
    /// Queued messages are kept and still delivered to their original peer.
    pub fn set_identities(&mut self, user: Option<Identity>, peer: Option<Identity>) {
        let user = user.filter(|id| !id.is_empty());
        let peer = peer.filter(|id| !id.is_empty());
        if user == self.user && peer == self.peer {
            return;
        }

        if self.negotiator.state() != NegotiationState::Idle || !self.log.is_empty() {
            tracing::info!(
                session = ?self.negotiator.session().map(SessionId::as_str),
                "identities changed, tearing down session"
            );
        }
        self.log.clear();
        self.negotiator.reset();
        self.presence.stop_refresh();
        self.presence.clear();
        self.user = user;
        self.peer = peer;
    }

    /// Sets the local user, keeping the peer.
    pub fn set_current_user(&mut self, user: Identity) {
        let peer = self.peer.clone();
        self.set_identities(Some(user), peer);
    }

    /// Sets the peer, keeping the local user.
    pub fn set_recipient(&mut self, peer: Identity) {
        let user = self.user.clone();
        self.set_identities(user, Some(peer));
    }

    /// Starts negotiating the session for the current pair.
    ///
    /// No-op (returns `false`) unless both identities are set and the
    /// negotiator is idle. If the link has given up reconnecting, it is
    /// asked to dial again either way.
    pub fn initialize_chat(&mut self, now: Instant) -> bool {
        let Some((user, peer)) = self.pair() else {
            tracing::debug!("initialize_chat without both identities, ignoring");
            return false;
        };
        if !self.negotiator.begin(SessionId::derive(&user, &peer), now) {
            self.redial();
            return false;
        }
        if self.transport.is_connected() {
            self.announce(&user, &peer, now);
        } else {
            self.transport.connect();
        }
        true
    }

    /// Sends a chat message to the peer.
    ///
    /// The message shows up in the log right away. While connected it is
    /// handed to the relay and logged as delivered; otherwise it is logged as
    /// pending and queued. Failures are logged and reported through the
    /// returned [`SendOutcome`], never raised.
    pub fn send_message(&mut self, text: &str) -> SendOutcome {
        let Some((user, peer)) = self.pair() else {
            tracing::warn!("cannot send: identities not set");
            return self.drop_send(DropReason::MissingIdentity);
        };
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("ignoring empty message");
            return self.drop_send(DropReason::EmptyText);
        }

        let entry = DeliveryEntry {
            author: user,
            text: text.to_string(),
            recipient: peer,
            timestamp: Timestamp::now(),
        };
        if self.log.contains(&entry.dedup_key()) {
            tracing::info!("identical message sent within the same second, dropping");
            return self.drop_send(DropReason::Duplicate);
        }

        let sent = self.transport.is_connected()
            && match self.transport.emit(&entry.to_event()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "send failed, queueing");
                    false
                }
            };

        let Some(id) = self.log.append_local(
            entry.author.clone(),
            entry.text.clone(),
            entry.timestamp,
            !sent,
        ) else {
            return self.drop_send(DropReason::Duplicate);
        };

        if sent {
            tracing::debug!(message_id = %id, "message sent");
            SendOutcome::Sent(id)
        } else {
            self.queue.enqueue(entry);
            self.redial();
            SendOutcome::Queued(id)
        }
    }

    fn drop_send(&mut self, reason: DropReason) -> SendOutcome {
        self.dropped_sends += 1;
        self.last_drop = Some(reason);
        SendOutcome::Dropped(reason)
    }

    /// Asks the link to dial again if it has given up.
    fn redial(&mut self) {
        if self.transport.state() == ConnectionState::Disconnected {
            tracing::info!(queued = self.queue.len(), "relay link idle, reconnecting");
            self.reconnect.cancel();
            self.transport.connect();
        }
    }

    /// Applies one inbound event.
    pub fn handle_event(&mut self, event: &InboundEvent, now: Instant) {
        match self.transport.handle(event) {
            Some(Transition::Connected) => {
                self.reconnect.cancel();
                self.on_connected(now);
            }
            Some(Transition::Lost) => {
                self.negotiator.connection_lost();
                self.presence.stop_refresh();
            }
            None => {}
        }

        match event {
            InboundEvent::ReconnectFailed => self.on_reconnect_failed(now),
            InboundEvent::Server(server_event) => self.handle_server_event(server_event, now),
            _ => {}
        }
    }

    /// The link exhausted its retries. With a pair set or messages waiting,
    /// schedule another round instead of staying offline for good.
    fn on_reconnect_failed(&mut self, now: Instant) {
        if self.pair().is_none() && self.queue.is_empty() {
            return;
        }
        match self.reconnect_after {
            Some(after) => {
                tracing::warn!(
                    retry_in = ?after,
                    queued = self.queue.len(),
                    "relay unreachable, will retry later"
                );
                self.reconnect.arm(now, after);
            }
            None => tracing::warn!(
                queued = self.queue.len(),
                "relay unreachable, staying offline"
            ),
        }
    }

    fn on_connected(&mut self, now: Instant) {
        self.flush();

        let Some((user, peer)) = self.pair() else {
            return;
        };
        match self.negotiator.state() {
            NegotiationState::Idle => {
                self.initialize_chat(now);
            }
            NegotiationState::Negotiating => self.announce(&user, &peer, now),
            NegotiationState::Joined => {
                tracing::debug!("reconnected while joined, rejoining session");
                self.announce(&user, &peer, now);
            }
        }
    }

    /// Sends the join request and a status request, and arms the presence
    /// refresh.
    fn announce(&mut self, user: &Identity, peer: &Identity, now: Instant) {
        self.emit(&SessionNegotiator::join_request(user, peer));
        self.emit(&status_request(peer));
        self.presence.start_refresh(now);
    }

    fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let transport = &self.transport;
        let report = self.queue.flush(|entry| transport.emit(&entry.to_event()));
        for entry in &report.delivered {
            self.log.mark_delivered(&entry.dedup_key());
        }
    }

    fn handle_server_event(&mut self, event: &ServerEvent, now: Instant) {
        match event {
            ServerEvent::ConnectionSuccess(success) => {
                tracing::debug!(sid = %success.session_id, "relay accepted connection");
            }
            ServerEvent::RoomJoined(joined) => {
                if !self.negotiator.confirm(&joined.room) {
                    tracing::warn!(room = %joined.room, "confirmation for another session, ignoring");
                    return;
                }
                if let Some(history) = &joined.message_history {
                    self.log.replace_with_history(history);
                }
                if let (Some(online), Some(peer)) = (joined.recipient_online, &self.peer) {
                    let status = if online {
                        PresenceStatus::Online
                    } else {
                        PresenceStatus::Offline
                    };
                    self.presence.record(peer, status, now);
                }
            }
            ServerEvent::UserJoined(joined) => {
                let status = joined.status.unwrap_or(PresenceStatus::Online);
                self.presence.record(&joined.email, status, now);
            }
            ServerEvent::UserDisconnected(gone) => {
                self.presence
                    .record(&gone.email, PresenceStatus::Offline, now);
            }
            ServerEvent::UserStatusUpdate(update) => {
                self.presence.record(&update.email, update.status, now);
            }
            ServerEvent::ReceiveMessage(payload) => {
                let Some((user, peer)) = self.pair() else {
                    tracing::debug!("message received without a session, ignoring");
                    return;
                };
                if !belongs_to_pair(payload, &user, &peer) {
                    tracing::debug!(
                        author = %payload.username,
                        "message for another session, ignoring"
                    );
                    return;
                }
                if self.log.merge_inbound(payload) == Merge::Duplicate {
                    tracing::trace!(author = %payload.username, "duplicate message suppressed");
                }
            }
            ServerEvent::MessageSent(ack) => {
                if ack.is_ok() {
                    tracing::trace!(id = ?ack.id, "relay stored message");
                } else {
                    tracing::warn!(reason = ?ack.message, "relay rejected message");
                }
            }
            ServerEvent::Error(err) => {
                tracing::warn!(message = %err.message, "relay error");
            }
        }
    }

    /// Fires whatever deadlines are due at `now`.
    pub fn on_tick(&mut self, now: Instant) {
        if let RetryAction::Retry(retry) = self.negotiator.poll_retry(now)
            && let Some((user, peer)) = self.pair()
        {
            if self.transport.is_connected() {
                tracing::debug!(retry, "re-sending join request");
                self.emit(&SessionNegotiator::join_request(&user, &peer));
            } else {
                tracing::debug!(retry, "join retry while disconnected, reconnecting");
                self.transport.connect();
            }
        }

        if self.presence.poll_refresh(now)
            && self.transport.is_connected()
            && let Some(peer) = self.peer.clone()
        {
            self.emit(&status_request(&peer));
        }

        if self.reconnect.fire(now) {
            self.redial();
        }
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest(
            timer::earliest(
                self.negotiator.next_deadline(),
                self.presence.next_deadline(),
            ),
            self.reconnect.due(),
        )
    }

    /// Cancels every deadline and closes the transport.
    pub fn shutdown(&mut self) {
        tracing::info!("shutting down chat session");
        self.negotiator.reset();
        self.presence.stop_refresh();
        self.reconnect.cancel();
        self.transport.disconnect();
    }

    /// Subscribes to inbound events on the underlying transport.
    pub fn on(&mut self, name: EventName, handler: EventHandler) -> SubscriptionId {
        self.transport.on(name, handler)
    }

    /// Removes a transport subscription.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.transport.off(id)
    }

    /// The conversation in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    /// Returns `true` while connected to the relay.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Current negotiation state.
    #[must_use]
    pub const fn negotiation_state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Status of the peer at `now`.
    #[must_use]
    pub fn peer_status(&self, now: Instant) -> PresenceStatus {
        self.peer
            .as_ref()
            .map_or(PresenceStatus::Unknown, |peer| self.presence.status(peer, now))
    }

    /// Last known status of any identity at `now`.
    #[must_use]
    pub fn status_of(&self, identity: &Identity, now: Instant) -> PresenceStatus {
        self.presence.status(identity, now)
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &TransportConnection<L> {
        &self.transport
    }

    /// Captures the current state.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> ChatSnapshot {
        let peer_status = self.peer_status(now);
        ChatSnapshot {
            messages: self.log.messages().to_vec(),
            connection: self.transport.state(),
            reconnect_attempts: self.transport.reconnect_attempts(),
            negotiation: self.negotiator.state(),
            session: self.negotiator.session().cloned(),
            user: self.user.clone(),
            peer: self.peer.clone(),
            peer_status,
            peer_online: self.transport.is_connected() && peer_status == PresenceStatus::Online,
            queued: self.queue.len(),
            dropped_sends: self.dropped_sends,
            last_drop: self.last_drop,
        }
    }

    fn pair(&self) -> Option<(Identity, Identity)> {
        Some((self.user.clone()?, self.peer.clone()?))
    }

    fn emit(&self, event: &ClientEvent) {
        if let Err(e) = self.transport.emit(event) {
            tracing::debug!(event = event.name(), error = %e, "emit failed");
        }
    }
}

/// Whether a live message belongs to the session of `user` and `peer`.
///
/// The relay keeps a connection in its previous room until the next join
/// lands, so messages of an abandoned pair can still arrive. A message
/// without a recipient is accepted from either participant.
fn belongs_to_pair(payload: &ChatPayload, user: &Identity, peer: &Identity) -> bool {
    match &payload.recipient {
        Some(recipient) => {
            SessionId::derive(&payload.username, recipient) == SessionId::derive(user, peer)
        }
        None => payload.username == *user || payload.username == *peer,
    }
}

fn status_request(peer: &Identity) -> ClientEvent {
    ClientEvent::RequestUserStatus(RequestUserStatus {
        target_email: peer.clone(),
    })
}
