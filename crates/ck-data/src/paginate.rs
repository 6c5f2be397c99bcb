//! Paging strategies over [`KlineClient`].
//!
//! The remote returns pages newest first and pages backward through `end`.
//! Every strategy here hands back bars oldest first.

use ck_types::{now_ms, validation_error, Bar, Category, CkResult, SeriesKey};
use std::collections::BTreeMap;
use tracing::debug;

use crate::client::KlineClient;
use crate::providers::{Page, PageRequest};

impl KlineClient {
    /// Page backward from the newest bar until `need_count` bars were
    /// gathered or a bar at or before `since_ms` was seen. An empty page means
    /// the history is exhausted and ends the walk without error, as does a
    /// page that does not move the cursor further back.
    pub async fn fetch_backward_until(
        &self,
        category: Category,
        key: &SeriesKey,
        need_count: Option<usize>,
        since_ms: Option<i64>,
    ) -> CkResult<Vec<Bar>> {
        if need_count.is_none() && since_ms.is_none() {
            return Err(validation_error!(
                "backward fetch for {} needs a count or a since bound",
                key
            ));
        }

        let mut collected: BTreeMap<i64, Bar> = BTreeMap::new();
        let mut end: Option<i64> = None;
        let mut pages = 0usize;

        loop {
            let limit = match need_count {
                Some(need) => need.saturating_sub(collected.len()).min(self.max_page_size()),
                None => self.max_page_size(),
            };
            if limit == 0 {
                break;
            }

            let request = PageRequest::new(category, &key.symbol, &key.interval)
                .limit(limit)
                .end(end);
            let page = self.fetch_page(request).await?;
            pages += 1;

            let Some(oldest) = page.oldest_ms() else {
                debug!("{}: empty page, history exhausted after {} pages", key, pages);
                break;
            };
            for bar in page.into_ascending() {
                collected.insert(bar.timestamp_ms, bar);
            }

            if need_count.is_some_and(|need| collected.len() >= need) {
                break;
            }
            if since_ms.is_some_and(|since| oldest <= since) {
                break;
            }
            if end.is_some_and(|cursor| oldest > cursor) {
                debug!("{}: cursor did not advance past {}, stopping", key, oldest);
                break;
            }
            end = Some(oldest - 1);
        }

        debug!("{}: backward walk gathered {} bars in {} pages", key, collected.len(), pages);
        Ok(collected.into_values().collect())
    }

    /// Bars strictly newer than `from_exclusive_ms`, in a single request
    /// capped at `max_page_size`.
    pub async fn fetch_forward_from(
        &self,
        category: Category,
        key: &SeriesKey,
        from_exclusive_ms: i64,
    ) -> CkResult<Vec<Bar>> {
        let request = PageRequest::new(category, &key.symbol, &key.interval)
            .limit(self.max_page_size())
            .start(Some(from_exclusive_ms + 1))
            .end(Some(now_ms()));
        let page = self.fetch_page(request).await?;
        Ok(page.into_ascending())
    }

    /// One backward page of bars strictly older than `before_ms`
    pub async fn fetch_backward_page(
        &self,
        category: Category,
        key: &SeriesKey,
        before_ms: i64,
    ) -> CkResult<Page> {
        let request = PageRequest::new(category, &key.symbol, &key.interval)
            .limit(self.max_page_size())
            .end(Some(before_ms - 1));
        self.fetch_page(request).await
    }
}
