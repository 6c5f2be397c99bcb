use async_trait::async_trait;
use ck_types::{Bar, Category, UpstreamError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Parameters of one physical kline request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub category: Category,
    pub symbol: String,
    pub interval: String,
    pub limit: usize,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl PageRequest {
    pub fn new(category: Category, symbol: &str, interval: &str) -> Self {
        Self {
            category,
            symbol: symbol.trim().to_uppercase(),
            interval: interval.to_string(),
            limit: 200,
            start: None,
            end: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn start(mut self, start_ms: Option<i64>) -> Self {
        self.start = start_ms;
        self
    }

    pub fn end(mut self, end_ms: Option<i64>) -> Self {
        self.end = end_ms;
        self
    }

    /// Query string pairs in the remote's parameter names
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("category", self.category.to_string()),
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.clone()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(end) = self.end {
            params.push(("end", end.to_string()));
        }
        if let Some(start) = self.start {
            params.push(("start", start.to_string()));
        }
        params
    }
}

/// One remote fetch result, newest bar first as the remote returns it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    bars: Vec<Bar>,
}

impl Page {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn oldest_ms(&self) -> Option<i64> {
        self.bars.iter().map(|b| b.timestamp_ms).min()
    }

    pub fn newest_ms(&self) -> Option<i64> {
        self.bars.iter().map(|b| b.timestamp_ms).max()
    }

    /// Bars in ascending timestamp order
    pub fn into_ascending(mut self) -> Vec<Bar> {
        self.bars.sort_by_key(|b| b.timestamp_ms);
        self.bars
    }
}

/// A source of kline pages. One call is one physical request; throttling and
/// retries are layered on top by [`crate::KlineClient`].
#[async_trait]
pub trait KlineProvider: Send + Sync + std::fmt::Debug {
    /// Issue a single request and return the page or the failure cause
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// `/v5/market/kline` response envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineResponse {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

impl KlineResponse {
    /// Check the remote status and decode the row list
    pub fn into_page(self) -> Result<Page, UpstreamError> {
        if self.ret_code != 0 {
            return Err(UpstreamError::Remote {
                code: self.ret_code,
                message: self.ret_msg,
            });
        }
        let rows = self.result.map(|r| r.list).unwrap_or_default();
        let bars = rows
            .iter()
            .map(|row| parse_kline_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(bars))
    }
}

/// Decode `[startTime, open, high, low, close, volume, turnover]`
pub fn parse_kline_row(row: &[String]) -> Result<Bar, UpstreamError> {
    if row.len() < 7 {
        return Err(UpstreamError::Decode {
            message: format!("kline row has {} fields, expected 7", row.len()),
        });
    }

    let timestamp_ms = row[0].parse::<i64>().map_err(|e| UpstreamError::Decode {
        message: format!("Failed to parse start time '{}': {}", row[0], e),
    })?;
    let field = |idx: usize, name: &str| {
        Decimal::from_str(&row[idx]).map_err(|e| UpstreamError::Decode {
            message: format!("Failed to parse {} value '{}': {}", name, row[idx], e),
        })
    };

    Ok(Bar::new(
        timestamp_ms,
        field(1, "open")?,
        field(2, "high")?,
        field(3, "low")?,
        field(4, "close")?,
        field(5, "volume")?,
        field(6, "turnover")?,
    ))
}

/// Bybit v5 REST provider
#[derive(Debug)]
pub struct BybitProvider {
    pub name: String,
    pub base_url: String,
    pub client: reqwest::Client,
}

impl BybitProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            name: "Bybit".to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn kline_url(&self) -> String {
        format!("{}/v5/market/kline", self.base_url)
    }
}

#[async_trait]
impl KlineProvider for BybitProvider {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError> {
        tracing::debug!(
            "GET kline {} {} interval={} limit={} start={:?} end={:?}",
            request.category,
            request.symbol,
            request.interval,
            request.limit,
            request.start,
            request.end
        );

        let response = self
            .client
            .get(self.kline_url())
            .query(&request.query_params())
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                message: if e.is_timeout() {
                    format!("request timed out: {}", e)
                } else {
                    format!("HTTP request failed: {}", e)
                },
            })?;

        if !response.status().is_success() {
            return Err(UpstreamError::HttpStatus {
                status: response.status().as_u16(),
            });
        }

        let body: KlineResponse = response.json().await.map_err(|e| UpstreamError::Decode {
            message: format!("Failed to parse JSON response: {}", e),
        })?;

        body.into_page()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Deterministic in-process provider for tests and demos.
///
/// Serves a bar every `step_ms` ending at `latest_ms`, honouring `start`,
/// `end` and `limit` the way the remote does (newest first). History can be
/// bounded, pages can be capped below the requested limit, and the first N
/// calls can be made to fail.
#[derive(Debug)]
pub struct SampleProvider {
    pub name: String,
    step_ms: i64,
    latest_ms: i64,
    history_start_ms: Option<i64>,
    page_cap: Option<usize>,
    ignore_cursor: bool,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
    requests: Mutex<Vec<PageRequest>>,
}

impl SampleProvider {
    pub fn new(step_ms: i64, latest_ms: i64) -> Self {
        Self {
            name: "Sample Provider".to_string(),
            step_ms: step_ms.max(1),
            latest_ms,
            history_start_ms: None,
            page_cap: None,
            ignore_cursor: false,
            failures_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// No bars older than `start_ms` exist
    pub fn with_history_start(mut self, start_ms: i64) -> Self {
        self.history_start_ms = Some(start_ms);
        self
    }

    /// Never return more than `cap` bars per page
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = Some(cap);
        self
    }

    /// Drop `start` and `end` from every request and always answer with the
    /// newest page, like a remote that ignores its time window
    pub fn ignoring_cursor(mut self) -> Self {
        self.ignore_cursor = true;
        self
    }

    /// Fail the next `count` calls with a rate-limit status
    pub fn with_failures(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Number of physical requests received, failed ones included
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }

    fn bar_at(&self, timestamp_ms: i64) -> Bar {
        let level = Decimal::from(100 + (timestamp_ms / self.step_ms).rem_euclid(50));
        Bar::new(
            timestamp_ms,
            level,
            level + Decimal::ONE,
            level - Decimal::ONE,
            level,
            Decimal::from(10),
            Decimal::from(15),
        )
    }
}

#[async_trait]
impl KlineProvider for SampleProvider {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(UpstreamError::Remote {
                code: 10006,
                message: "Too many visits".to_string(),
            });
        }

        let (start, end) = match self.ignore_cursor {
            true => (None, None),
            false => (request.start, request.end),
        };
        let upper = end.map_or(self.latest_ms, |end| end.min(self.latest_ms));
        // first grid point at or below `upper`
        let steps_back = (self.latest_ms - upper + self.step_ms - 1) / self.step_ms;
        let newest = self.latest_ms - steps_back * self.step_ms;
        let lower = match (start, self.history_start_ms) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => i64::MIN,
        };
        let limit = self.page_cap.map_or(request.limit, |cap| cap.min(request.limit));

        let bars = (0..limit as i64)
            .map(|i| newest - i * self.step_ms)
            .take_while(|ts| *ts >= lower)
            .map(|ts| self.bar_at(ts))
            .collect();
        Ok(Page::new(bars))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;
    const LATEST: i64 = 1_700_000_000_000 - 1_700_000_000_000 % HOUR;

    #[test]
    fn test_decode_kline_response() {
        let body = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "linear",
                "symbol": "BTCUSDT",
                "list": [
                    ["1700002800000", "37000.5", "37100", "36950", "37050.25", "12.5", "462000.1"],
                    ["1699999200000", "36900", "37010", "36880", "37000.5", "8", "295000"]
                ]
            },
            "time": 1700003000000
        }"#;

        let response: KlineResponse = serde_json::from_str(body).unwrap();
        let page = response.into_page().unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page.newest_ms(), Some(1_700_002_800_000));
        assert_eq!(page.oldest_ms(), Some(1_699_999_200_000));
        assert_eq!(page.bars()[0].close, Decimal::from_str("37050.25").unwrap());

        let ascending = page.into_ascending();
        assert_eq!(ascending[0].timestamp_ms, 1_699_999_200_000);
    }

    #[test]
    fn test_remote_failure_status() {
        let body = r#"{"retCode": 10001, "retMsg": "params error", "result": {}}"#;
        let response: KlineResponse = serde_json::from_str(body).unwrap();

        match response.into_page() {
            Err(UpstreamError::Remote { code, message }) => {
                assert_eq!(code, 10001);
                assert_eq!(message, "params error");
            }
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_row_is_decode_error() {
        let short = vec!["1700000000000".to_string(), "1".to_string()];
        assert!(matches!(parse_kline_row(&short), Err(UpstreamError::Decode { .. })));

        let bad_price: Vec<String> = ["1700000000000", "x", "1", "1", "1", "1", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(parse_kline_row(&bad_price), Err(UpstreamError::Decode { .. })));
    }

    #[test]
    fn test_query_params() {
        let request = PageRequest::new(Category::Spot, "ethusdt", "60")
            .limit(50)
            .end(Some(1_000));
        let params = request.query_params();

        assert!(params.contains(&("category", "spot".to_string())));
        assert!(params.contains(&("symbol", "ETHUSDT".to_string())));
        assert!(params.contains(&("limit", "50".to_string())));
        assert!(params.contains(&("end", "1000".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "start"));
    }

    #[tokio::test]
    async fn test_sample_provider_paginates_newest_first() {
        let provider = SampleProvider::new(HOUR, LATEST).with_history_start(LATEST - 9 * HOUR);

        let first = provider
            .fetch_page(&PageRequest::new(Category::Linear, "BTCUSDT", "60").limit(4))
            .await
            .unwrap();
        let ts: Vec<i64> = first.bars().iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(ts, vec![LATEST, LATEST - HOUR, LATEST - 2 * HOUR, LATEST - 3 * HOUR]);

        let older = provider
            .fetch_page(
                &PageRequest::new(Category::Linear, "BTCUSDT", "60")
                    .limit(100)
                    .end(Some(LATEST - 3 * HOUR - 1)),
            )
            .await
            .unwrap();
        assert_eq!(older.newest_ms(), Some(LATEST - 4 * HOUR));
        assert_eq!(older.oldest_ms(), Some(LATEST - 9 * HOUR));
        assert_eq!(older.len(), 6);

        let forward = provider
            .fetch_page(
                &PageRequest::new(Category::Linear, "BTCUSDT", "60")
                    .limit(100)
                    .start(Some(LATEST - 2 * HOUR + 1)),
            )
            .await
            .unwrap();
        assert_eq!(forward.len(), 2);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_sample_provider_scripted_failures() {
        let provider = SampleProvider::new(HOUR, LATEST).with_failures(1);
        let request = PageRequest::new(Category::Linear, "BTCUSDT", "60");

        assert!(provider.fetch_page(&request).await.is_err());
        assert!(provider.fetch_page(&request).await.is_ok());
        assert_eq!(provider.calls(), 2);
    }
}
