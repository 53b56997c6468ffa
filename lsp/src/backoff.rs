//! Capped exponential backoff with down-jitter.
//!
//! Shared by the checker supervisor (restart delays) and the scheduler
//! (retries of transient backend failures).

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Jitter factor for down-jitter (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
}

impl Backoff {
    #[must_use]
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            jitter_factor: 0.25,
        }
    }

    /// Delay before retry number `step + 1`: `min(initial * 2^step, max)`,
    /// reduced by a random factor in `[1 - jitter_factor, 1.0]`.
    #[must_use]
    pub fn delay(&self, step: u32) -> Duration {
        let exponent = i32::try_from(step).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = 1.0 - rand::random::<f64>() * self.jitter_factor.clamp(0.0, 1.0);
        Duration::from_secs_f64(capped * jitter)
    }
}
