use ck_types::{CkResult, UpstreamError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::providers::{KlineProvider, Page, PageRequest};
use crate::rate_limit::RateLimiter;
use crate::retry::{AttemptOutcome, RetryPolicy};

/// Throttled, retrying front for a [`KlineProvider`].
///
/// Cloning is cheap and clones share the provider and the limiter, so every
/// clone draws from the same request budget.
#[derive(Debug, Clone)]
pub struct KlineClient {
    provider: Arc<dyn KlineProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    max_page_size: usize,
}

impl KlineClient {
    pub fn new(
        provider: Arc<dyn KlineProvider>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        max_page_size: usize,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
            max_page_size: max_page_size.max(1),
        }
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Fetch one page, newest bar first. `limit` is clamped to
    /// `[1, max_page_size]`; every attempt waits on the shared limiter.
    pub async fn fetch_page(&self, request: PageRequest) -> CkResult<Page> {
        let limit = request.limit.clamp(1, self.max_page_size);
        let request = request.limit(limit);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.acquire().await;
            let result = self.provider.fetch_page(&request).await;

            match self.retry.classify(attempt, result) {
                AttemptOutcome::Success(page) => {
                    debug!(
                        "{} {}@{}: page of {} bars (attempt {})",
                        self.provider.name(),
                        request.symbol,
                        request.interval,
                        page.len(),
                        attempt
                    );
                    return Ok(page);
                }
                AttemptOutcome::Retryable(cause) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "{} {}@{}: attempt {}/{} failed: {}; retrying in {:?}",
                        self.provider.name(),
                        request.symbol,
                        request.interval,
                        attempt,
                        self.retry.max_attempts(),
                        cause,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                AttemptOutcome::Exhausted(cause) => {
                    return Err(UpstreamError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(cause),
                    }
                    .into());
                }
            }
        }
    }
}
