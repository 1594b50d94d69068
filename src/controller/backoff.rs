//! # Exponential Backoff
//!
//! Per-resource backoff for failed reconciliations of the rule itself (fetch, update,
//! cleanup). Object-level failures use a short fixed retry delay instead and never
//! reach this backoff.
//!
//! The delay starts at `start` and doubles after every consecutive failure up to `max`.
//!
//! ## Usage
//!
//! ```rust
//! use rbac_rule_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! ```

use std::time::Duration;

/// Doubling backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start: Duration,
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start` and capped at `max`
    ///
    /// A `max` below `start` caps every delay at `max`.
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            current: start.min(max),
            max,
        }
    }

    /// Delay to wait before the next attempt; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Next delay in whole seconds, at least one
    pub fn next_backoff_seconds(&mut self) -> u64 {
        self.next_backoff().as_secs().max(1)
    }

    /// Back to the start value after a successful reconciliation
    pub fn reset(&mut self) {
        self.current = self.start.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_millis(300_000));
        let delays: Vec<u64> = (0..11).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(60));
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_sub_second_start_reports_one_second() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff_seconds(), 1);
    }

    #[test]
    fn test_max_below_start_caps_everything() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(3));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(3));
    }
}
