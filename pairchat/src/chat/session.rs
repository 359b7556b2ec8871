//! Session (room) negotiation.
//!
//! ```text
//!   Idle ──begin──► Negotiating ──confirm──► Joined
//!    ▲                 │   │                   │
//!    └─connection lost─┘   └─retries exhausted │
//!    └──────────────────── reset ──────────────┘
//! ```
//!
//! While negotiating, a retry deadline re-issues the join. Retries back off
//! linearly from `base` up to `max` and stop after `max_retries`, returning
//! the negotiator to `Idle`.

use std::time::{Duration, Instant};

use pairchat_proto::event::{ClientEvent, JoinPrivateChat};
use pairchat_proto::identity::Identity;
use pairchat_proto::session::SessionId;

use crate::timer::Timer;

/// Negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// No session and no join in flight.
    #[default]
    Idle,
    /// A join request was issued and not yet confirmed.
    Negotiating,
    /// The relay confirmed the session.
    Joined,
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Negotiating => write!(f, "negotiating"),
            Self::Joined => write!(f, "joined"),
        }
    }
}

/// Join retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRetryPolicy {
    /// Wait before the first retry; retry `n` waits `n * base`.
    pub base: Duration,
    /// Upper bound on a single wait.
    pub max: Duration,
    /// Retries before giving up.
    pub max_retries: u32,
}

impl Default for JoinRetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(30),
            max_retries: 20,
        }
    }
}

impl JoinRetryPolicy {
    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base.saturating_mul(retry.max(1)).min(self.max)
    }
}

/// What [`SessionNegotiator::poll_retry`] asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Nothing is due.
    None,
    /// Re-issue the join; carries the retry number.
    Retry(u32),
    /// The retry budget is spent; the negotiator is back to `Idle`.
    GaveUp,
}

/// Drives the join handshake for one identity pair.
#[derive(Debug, Default)]
pub struct SessionNegotiator {
    state: NegotiationState,
    session: Option<SessionId>,
    policy: JoinRetryPolicy,
    retry: Timer,
    retries: u32,
}

impl SessionNegotiator {
    /// Creates an idle negotiator.
    #[must_use]
    pub fn new(policy: JoinRetryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// The join request for a pair.
    #[must_use]
    pub fn join_request(user: &Identity, peer: &Identity) -> ClientEvent {
        ClientEvent::JoinPrivateChat(JoinPrivateChat {
            sender_email: user.clone(),
            recipient_email: peer.clone(),
        })
    }

    /// `Idle → Negotiating` for `session`. Returns `false` and changes
    /// nothing in any other state.
    pub fn begin(&mut self, session: SessionId, now: Instant) -> bool {
        if self.state != NegotiationState::Idle {
            return false;
        }
        tracing::info!(session = %session, "negotiating session");
        self.state = NegotiationState::Negotiating;
        self.session = Some(session);
        self.retries = 0;
        self.retry.arm(now, self.policy.delay_for(1));
        true
    }

    /// Handles a join confirmation. Returns `false` if `room` is not the
    /// session being negotiated.
    pub fn confirm(&mut self, room: &SessionId) -> bool {
        if self.session.as_ref() != Some(room) {
            return false;
        }
        if self.state != NegotiationState::Joined {
            tracing::info!(session = %room, retries = self.retries, "session joined");
        }
        self.state = NegotiationState::Joined;
        self.retry.cancel();
        self.retries = 0;
        true
    }

    /// Connectivity dropped. An unconfirmed join is considered lost.
    pub fn connection_lost(&mut self) {
        if self.state == NegotiationState::Negotiating {
            tracing::debug!("join unconfirmed at disconnect, back to idle");
            self.state = NegotiationState::Idle;
            self.retry.cancel();
        }
    }

    /// Back to `Idle`, forgetting the session and cancelling the retry.
    pub fn reset(&mut self) {
        self.state = NegotiationState::Idle;
        self.session = None;
        self.retry.cancel();
        self.retries = 0;
    }

    /// Fires the retry deadline if it is due.
    pub fn poll_retry(&mut self, now: Instant) -> RetryAction {
        if self.state != NegotiationState::Negotiating || !self.retry.fire(now) {
            return RetryAction::None;
        }
        self.retries += 1;
        if self.retries > self.policy.max_retries {
            tracing::warn!(
                retries = self.policy.max_retries,
                "no join confirmation, giving up"
            );
            self.state = NegotiationState::Idle;
            self.retries = 0;
            return RetryAction::GaveUp;
        }
        self.retry.arm(now, self.policy.delay_for(self.retries + 1));
        RetryAction::Retry(self.retries)
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    /// The session being negotiated or joined.
    #[must_use]
    pub const fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// When the next retry is due.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.retry.due()
    }
}
