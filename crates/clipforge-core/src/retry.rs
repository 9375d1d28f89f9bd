//! Exponential backoff policy shared by the job store and source fetchers.

use std::time::Duration;

/// Computes `delay = base * multiplier^(attempts_made - 1)`, capped at `max_delay`.
///
/// Attempt numbers are 1-based from the caller's perspective (`attempts_made`
/// is the count of attempts already consumed before the one about to start).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth factor applied per subsequent retry.
    pub multiplier: f64,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Construct a policy from its three knobs.
    #[must_use]
    pub const fn new(base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base,
            multiplier,
            max_delay,
        }
    }

    /// Delay to wait before the next attempt, given attempts already made.
    #[must_use]
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return self.base.min(self.max_delay);
        }
        #[expect(
            clippy::cast_precision_loss,
            reason = "attempt counts are small; precision loss is not observable"
        )]
        let exponent = attempts_made as i32 - 1;
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

impl Default for RetryPolicy {
    /// Base 5s, multiplier 2, capped at 30s.
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 2.0, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn zero_attempts_returns_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
    }
}
