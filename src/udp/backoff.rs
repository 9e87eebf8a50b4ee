//! Exponential reconnect backoff: 2 s, 4 s, 8 s ... capped at 64 s.

use std::time::Duration;

/// First reconnect delay in seconds
pub const RECONNECT_MIN_SECS: u64 = 2;

/// Longest reconnect delay in seconds
pub const RECONNECT_MAX_SECS: u64 = 64;

/// Reconnect interval that doubles on every scheduled attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current_secs: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current_secs: RECONNECT_MIN_SECS,
        }
    }
}

impl Backoff {
    /// Delay to use for the next attempt; doubles the stored interval
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_secs);
        self.current_secs = (self.current_secs * 2).min(RECONNECT_MAX_SECS);
        delay
    }

    /// Interval the next attempt would use
    pub fn current(&self) -> Duration {
        Duration::from_secs(self.current_secs)
    }

    pub fn reset(&mut self) {
        self.current_secs = RECONNECT_MIN_SECS;
    }
}
