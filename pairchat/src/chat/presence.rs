//! Peer presence tracking.
//!
//! The last observed status wins. With a TTL configured, an entry older
//! than the TTL reads as [`PresenceStatus::Unknown`] until it is refreshed.
//! The refresh deadline is only armed while connected with a known peer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pairchat_proto::identity::Identity;
use pairchat_proto::presence::PresenceStatus;

use crate::timer::Timer;

#[derive(Debug, Clone, Copy)]
struct PresenceEntry {
    status: PresenceStatus,
    observed_at: Instant,
}

/// Identity → presence map with a periodic refresh deadline.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: HashMap<Identity, PresenceEntry>,
    ttl: Option<Duration>,
    refresh_every: Option<Duration>,
    refresh: Timer,
}

impl PresenceTracker {
    /// `None` for either duration disables that behaviour.
    #[must_use]
    pub fn new(refresh_every: Option<Duration>, ttl: Option<Duration>) -> Self {
        Self {
            refresh_every,
            ttl,
            ..Self::default()
        }
    }

    /// Records an observation, replacing whatever was known.
    pub fn record(&mut self, identity: &Identity, status: PresenceStatus, now: Instant) {
        tracing::debug!(identity = %identity, status = %status, "presence update");
        self.entries.insert(
            identity.clone(),
            PresenceEntry {
                status,
                observed_at: now,
            },
        );
    }

    /// Current status of `identity`.
    #[must_use]
    pub fn status(&self, identity: &Identity, now: Instant) -> PresenceStatus {
        match self.entries.get(identity) {
            Some(entry) if !self.is_stale(entry, now) => entry.status,
            _ => PresenceStatus::Unknown,
        }
    }

    fn is_stale(&self, entry: &PresenceEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.observed_at) > ttl)
    }

    /// Arms the refresh deadline if refreshing is enabled and it is not armed.
    pub fn start_refresh(&mut self, now: Instant) {
        if let Some(every) = self.refresh_every
            && !self.refresh.is_armed()
        {
            self.refresh.arm(now, every);
        }
    }

    /// Disarms the refresh deadline.
    pub const fn stop_refresh(&mut self) {
        self.refresh.cancel();
    }

    /// Returns `true` if a refresh is due, re-arming for the next period.
    pub fn poll_refresh(&mut self, now: Instant) -> bool {
        if !self.refresh.fire(now) {
            return false;
        }
        if let Some(every) = self.refresh_every {
            self.refresh.arm(now, every);
        }
        true
    }

    /// When the next refresh is due.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.refresh.due()
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
