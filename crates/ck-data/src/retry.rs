use ck_types::UpstreamError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with linear backoff: after failed attempt `n` the client
/// waits `base_backoff * n` before trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// How a single attempt ended, as seen by the retry loop
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Failed, but the budget allows another attempt
    Retryable(UpstreamError),
    /// Failed and no retries are left
    Exhausted(UpstreamError),
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    /// Total physical attempts, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(attempt)
    }

    /// Classify the result of the `attempt`-th try (1-based)
    pub fn classify<T>(&self, attempt: u32, result: Result<T, UpstreamError>) -> AttemptOutcome<T> {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(cause) if attempt <= self.max_retries => AttemptOutcome::Retryable(cause),
            Err(cause) => AttemptOutcome::Exhausted(cause),
        }
    }
}
