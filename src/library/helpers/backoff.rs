//! Exponential backoff implementations

use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Returns monotonically increasing delays until the configured number of attempts is exhausted.
/// Each element is the previous element multiplied by the `multiplier` property.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    limit: u32,
    multiplier: u32,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff yielding at most `limit` delays, the first one being `initial * multiplier`
    pub fn new(limit: u32, initial: Duration, multiplier: u32) -> Self {
        Self {
            attempts: 0,
            limit,
            multiplier,
            current: initial,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(8, Duration::from_millis(25), 2)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.attempts += 1;

        if self.attempts > self.limit {
            None
        } else {
            self.current *= self.multiplier;
            Some(self.current)
        }
    }
}
