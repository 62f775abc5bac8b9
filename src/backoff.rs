use std::time::Duration;

/// Linear backoff calculator for retried provider calls.
///
/// The n-th delay is `n * base`.
pub struct LinearBackoff {
    base: Duration,
    /// Number of delays handed out so far.
    pub attempt: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    /// Returns the next delay and advances the state.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        self.base * self.attempt
    }
}
