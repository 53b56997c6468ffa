//! Explicit timer-reset state for debouncing.
//!
//! A [`Debouncer`] holds at most one pending deadline. Every event pushes the
//! deadline out; the owner sleeps until [`Debouncer::deadline`] and then calls
//! [`Debouncer::fire`]. No callbacks, no spawned timers.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    deadline: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at `now`; the quiet window restarts.
    pub fn trigger(&mut self, now: Instant, window: Duration) {
        self.deadline = Some(now + window);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending deadline if it has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
