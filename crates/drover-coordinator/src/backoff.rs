//! Exponential backoff as explicit state
//!
//! Each worker owns one [`Backoff`] and passes it to the coordinator's
//! decision function. The coordinator advances it when there is nothing to
//! do and resets it when work is granted.

use crate::config::CoordinatorConfig;
use std::time::Duration;

/// Doubling delay with a cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Backoff {
    /// Backoff starting at `base` and never exceeding `cap`
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            attempts: 0,
        }
    }

    /// Backoff using the coordinator's configured bounds
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
        )
    }

    /// Delay for the next wait, then double
    pub fn next_delay(&mut self) -> Duration {
        // 2^31 * base already saturates any sensible cap
        let factor = 1u32.checked_shl(self.attempts.min(31)).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Back to the base delay
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive waits since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000));
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_many_attempts_saturate() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        for _ in 0..200 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_cap_below_base_is_raised() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_from_config() {
        let mut backoff = Backoff::from_config(&CoordinatorConfig::default());
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
