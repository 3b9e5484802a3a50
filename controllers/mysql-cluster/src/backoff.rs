//! # Exponential Backoff
//!
//! Provides the per-item retry delay used by the retry queue.
//! The delay doubles with every consecutive failure of the same key,
//! starting from a base delay and capped at a ceiling.
//!
//! With the default 5ms base: 5ms, 10ms, 20ms, 40ms, ... up to 1000s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Stateless: the retry queue tracks the failure count per key and asks
/// for the delay belonging to that count.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    base: Duration,
    /// Maximum delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base and ceiling
    ///
    /// # Arguments
    ///
    /// * `base` - Delay returned for the first failure
    /// * `max` - Ceiling the sequence never exceeds
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Calculate the delay for a given number of previous failures
    ///
    /// `failures` is 0-indexed: the first retry waits `base`, the second
    /// `2 * base`, and so on, capped at `max`. Overflow saturates to `max`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        assert_eq!(backoff.delay_for(0), Duration::from_millis(5));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(40));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(5120));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(backoff.delay_for(3), Duration::from_millis(800));
        // Next would be 1.6s, capped at 1s
        assert_eq!(backoff.delay_for(4), Duration::from_secs(1));
        // Overflowing exponents stay at the cap
        assert_eq!(backoff.delay_for(40), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_non_decreasing() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(30));
        let delays: Vec<Duration> = (0..64).map(|n| backoff.delay_for(n)).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
    }
}
