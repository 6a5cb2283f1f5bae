//! # Exponential Backoff
//!
//! Doubling backoff used by the work queue's per-key rate limiter and by
//! in-line provisioning retries.
//!
//! ## Usage
//!
//! ```rust
//! use stash_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
//! assert_eq!(backoff.delay(0), Duration::from_millis(5));
//! assert_eq!(backoff.delay(1), Duration::from_millis(10));
//! assert_eq!(backoff.delay(2), Duration::from_millis(20));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// The delay for the `n`th consecutive failure is `base * 2^n`, capped at
/// `max`. The calculator itself is stateless; callers keep the failure count
/// (the work queue keeps one per key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `failures` (0-based)
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Iterator over successive delays, starting at `base`
    pub fn delays(self) -> impl Iterator<Item = Duration> {
        (0..).map(move |n| self.delay(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(10), Duration::from_millis(5120));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        // 5ms * 2^18 = 1310.72s, past the cap
        assert_eq!(backoff.delay(18), Duration::from_secs(1000));
        assert_eq!(backoff.delay(40), Duration::from_secs(1000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1000));
    }

    #[test]
    fn test_exponential_backoff_never_decreases() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30));
        let delays: Vec<_> = backoff.delays().take(20).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays.last(), Some(&Duration::from_secs(30)));
    }
}
