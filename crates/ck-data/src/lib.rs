pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod client;
pub mod paginate;
pub mod storage;
pub mod cache;
pub mod reconcile;

pub use providers::*;
pub use rate_limit::*;
pub use retry::*;
pub use client::*;
pub use storage::*;
pub use cache::*;
pub use reconcile::*;

use ck_types::CkResult;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Knobs for wiring a Bybit-backed [`CoverageReconciler`]
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub qps: f64,
    pub retry: RetryPolicy,
    pub max_page_size: usize,
}

/// Build a reconciler that talks to Bybit and caches under `cache_dir`.
pub fn bybit_reconciler<P: AsRef<Path>>(
    settings: &ConnectorSettings,
    cache_dir: P,
) -> CkResult<CoverageReconciler> {
    let provider = BybitProvider::new(&settings.base_url, settings.request_timeout)?;
    tracing::info!(
        "Connecting to {} at {} ({} req/s, {} retries)",
        provider.name(),
        settings.base_url,
        settings.qps,
        settings.retry.max_retries
    );

    let client = KlineClient::new(
        Arc::new(provider),
        Arc::new(RateLimiter::per_second(settings.qps)),
        settings.retry,
        settings.max_page_size,
    );
    let store = CsvSeriesStore::new(cache_dir)?;
    Ok(CoverageReconciler::new(client, Arc::new(store)))
}
