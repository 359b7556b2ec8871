//! One-shot deadlines used for the negotiation retry and presence refresh.
//!
//! Timers here never fire by themselves. The owner asks [`Timer::fire`]
//! with the current instant, and the event loop in [`crate::net`] sleeps
//! until the earliest armed deadline. Keeping time as an argument lets the
//! chat state machine be driven deterministically in tests.

use std::time::{Duration, Instant};

/// A cancellable deadline.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    due: Option<Instant>,
}

impl Timer {
    /// Creates a disarmed timer.
    #[must_use]
    pub const fn new() -> Self {
        Self { due: None }
    }

    /// Arms the timer to fire `after` from `now`, replacing any earlier deadline.
    pub fn arm(&mut self, now: Instant, after: Duration) {
        self.due = Some(now + after);
    }

    /// Disarms the timer.
    pub const fn cancel(&mut self) {
        self.due = None;
    }

    /// Returns `true` if a deadline is set.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.due.is_some()
    }

    /// Returns the armed deadline, if any.
    #[must_use]
    pub const fn due(&self) -> Option<Instant> {
        self.due
    }

    /// Disarms and returns `true` if the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if due <= now => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}

/// Returns the earlier of two optional deadlines.
#[must_use]
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
