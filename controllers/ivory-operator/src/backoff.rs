//! # Fibonacci Backoff
//!
//! Retry delays for failed reconciles. The sequence grows more slowly than
//! exponential backoff so transient API errors are retried promptly while a
//! persistently failing object settles at the cap.
//!
//! Sequence with the operator defaults: 5s, 5s, 10s, 15s, 25s, 40s, ... 300s (max).
//! A success drops the object's backoff entirely; see `Reconciler::reset_error`.

/// Smallest delay, used for the first two retries
pub const MIN_BACKOFF_SECONDS: u64 = 5;
/// Largest delay
pub const MAX_BACKOFF_SECONDS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS)
    }
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given bounds in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next delay in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }
}
