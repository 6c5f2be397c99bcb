use ck_types::{AcquisitionRequest, Bar, CkResult, Selection, Series};
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::KlineClient;
use crate::storage::SeriesStore;

/// What a reconcile pass did to the cached series
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// The series as persisted at the end of the pass
    pub series: Series,
    /// Timestamps that were not cached before the pass
    pub bars_added: usize,
    /// Whether the series now satisfies the selection. `false` means the
    /// remote ran out of history, which is not an error.
    pub covered: bool,
    pub cold_start: bool,
}

/// Brings the cached series for a request up to date with the remote,
/// fetching only what is missing at either end.
#[derive(Debug, Clone)]
pub struct CoverageReconciler {
    client: KlineClient,
    store: Arc<dyn SeriesStore>,
}

impl CoverageReconciler {
    pub fn new(client: KlineClient, store: Arc<dyn SeriesStore>) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &KlineClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn SeriesStore> {
        &self.store
    }

    /// Reconcile the cache against `request`.
    ///
    /// An empty cache is filled by one backward walk bounded by the
    /// selection. A non-empty cache is first topped up forward from its
    /// newest bar, then extended backward one page at a time until the
    /// selection is covered, the remote returns an empty page, or a page
    /// brings nothing new. Every page is merged and persisted before the
    /// next one is requested.
    pub async fn reconcile(&self, request: &AcquisitionRequest) -> CkResult<ReconcileReport> {
        let key = &request.key;
        let category = request.category;
        let selection = request.selection;

        let mut series = self.store.load(key).await?;
        let initial_len = series.len();
        let cold_start = series.is_empty();

        if cold_start {
            debug!("{}: cold cache, walking backward for {:?}", key, selection);
            let bars = self
                .client
                .fetch_backward_until(category, key, selection.need_count(), selection.since_ms())
                .await?;
            series = self.store.merge_append(key, bars).await?;
        } else {
            if let Some(latest) = series.latest_ms() {
                let fresh = self.client.fetch_forward_from(category, key, latest).await?;
                if !fresh.is_empty() {
                    debug!("{}: {} bars newer than {}", key, fresh.len(), latest);
                    series = self.store.merge_append(key, fresh).await?;
                }
            }

            while !selection.is_covered_by(&series) {
                let Some(earliest) = series.earliest_ms() else {
                    break;
                };
                let page = self.client.fetch_backward_page(category, key, earliest).await?;
                if page.is_empty() {
                    debug!("{}: no history before {}", key, earliest);
                    break;
                }

                let before = series.len();
                series = self.store.merge_append(key, page.into_ascending()).await?;
                if series.len() == before {
                    debug!("{}: backward page before {} added nothing, stopping", key, earliest);
                    break;
                }
            }
        }

        let covered = selection.is_covered_by(&series);
        let bars_added = series.len().saturating_sub(initial_len);
        info!(
            "Reconciled {} ({}): {} bars cached, {} new, covered={}",
            key,
            if cold_start { "cold" } else { "warm" },
            series.len(),
            bars_added,
            covered
        );

        Ok(ReconcileReport {
            series,
            bars_added,
            covered,
            cold_start,
        })
    }
}

/// The part of `series` a selection asks for, ascending
pub fn slice(series: &Series, selection: Selection) -> Vec<Bar> {
    match selection {
        Selection::Count(count) => series.tail(count),
        Selection::Since(threshold_ms) => series.since(threshold_ms),
    }
}
