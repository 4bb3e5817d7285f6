use std::time::Duration;

use backon::ExponentialBuilder;

/// Bounded exponential backoff shared by write-conflict and fetch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.base_delay * 32)
            .with_max_times(self.attempts)
            .with_jitter()
    }
}
