//! Exponential Backoff with Full Jitter
//!
//! Delay for attempt `n` (0-based) is uniform in `[0, min(cap, base * 2^n)]`,
//! the "Full Jitter" algorithm:
//! <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>

use std::time::Duration;

use rand::Rng;

/// Stateless full-jitter backoff calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a calculator. A cap below the base is raised to the base.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    /// Base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Maximum delay.
    #[must_use]
    pub const fn cap(&self) -> Duration {
        self.cap
    }

    /// Upper bound of the delay for attempt `attempt` before jitter.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Jittered delay for attempt `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.ceiling(attempt).as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Reconnection policy: a [`Backoff`] plus the running attempt count.
///
/// Never gives up; the session keeps trying until shut down.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    backoff: Backoff,
    current_attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            current_attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the counter.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.backoff.delay(self.current_attempt);
        self.current_attempt = self.current_attempt.saturating_add(1);
        delay
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Attempts since the last success.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}
