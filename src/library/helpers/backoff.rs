//! Exponential backoff implementations

use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Yields monotonically increasing delays, each one being the previous one multiplied by `multiplier`
/// and capped at `ceiling`. Once `limit` delays have been handed out the iterator is exhausted, which
/// callers use as the signal to give up on whatever they were retrying.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    limit: u32,
    multiplier: u32,
    current: Duration,
    ceiling: Duration,
}

impl Backoff {
    /// Creates a new instance starting at `initial` which gives up after `limit` delays
    pub fn new(initial: Duration, limit: u32) -> Self {
        Self {
            attempts: 0,
            limit,
            current: initial,
            ..Default::default()
        }
    }

    /// Caps every delay at the given duration
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 0,
            limit: 13,
            multiplier: 2,
            current: Duration::from_millis(25),
            ceiling: Duration::from_secs(30),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.attempts >= self.limit {
            return None;
        }

        let delay = self.current.min(self.ceiling);
        self.attempts += 1;
        self.current = self.current.saturating_mul(self.multiplier);

        Some(delay)
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn increase_monotonically_until_ceiling() {
        let ceiling = Duration::from_secs(1);
        let mut previous = Duration::default();

        for delay in Backoff::default().with_ceiling(ceiling) {
            assert!(previous <= delay);
            assert!(delay <= ceiling);
            previous = delay;
        }

        assert_eq!(previous, ceiling);
    }

    #[test]
    fn give_up_after_limit() {
        let mut backoff = Backoff::new(Duration::from_millis(10), 3);

        assert_eq!(backoff.next(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(40)));
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempts(), 3);
    }
}
