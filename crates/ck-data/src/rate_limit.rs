//! Request throttle shared by every caller of one remote API.
//!
//! A leaky bucket of size one: each physical request must start at least
//! `min_interval` after the previous one, no matter which task issued it.
//! The last dispatch instant lives behind an async mutex that is held across
//! the wait, so concurrent workers queue up behind each other instead of
//! each sleeping independently and then firing together.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Lowest accepted request rate; anything below is clamped.
const MIN_QPS: f64 = 0.1;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Limiter allowing at most `qps` requests per second
    pub fn per_second(qps: f64) -> Self {
        let qps = if qps.is_finite() { qps.max(MIN_QPS) } else { MIN_QPS };
        Self::new(Duration::from_secs_f64(1.0 / qps))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be dispatched and claim that slot.
    pub async fn acquire(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                debug!(
                    "Rate limiter: waiting {:?}",
                    ready_at.saturating_duration_since(Instant::now())
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
