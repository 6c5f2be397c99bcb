use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;

/// Current UTC time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// RFC 3339 rendering of an epoch-millisecond timestamp
pub fn iso_from_ms(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false))
        .unwrap_or_default()
}

/// Bybit product category a kline request is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Spot,
    #[default]
    Linear,
    Inverse,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Spot => "spot",
            Category::Linear => "linear",
            Category::Inverse => "inverse",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spot" => Ok(Category::Spot),
            "linear" => Ok(Category::Linear),
            "inverse" => Ok(Category::Inverse),
            _ => Err(ValidationError::InvalidCategory {
                category: s.to_string(),
            }),
        }
    }
}

/// OHLCV bar with turnover, keyed by its open time in epoch milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
}

impl Bar {
    pub fn new(
        timestamp_ms: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        turnover: Decimal,
    ) -> Self {
        Self {
            timestamp_ms,
            open,
            high,
            low,
            close,
            volume,
            turnover,
        }
    }

    /// Bar open time, `None` if the timestamp is outside chrono's range
    pub fn open_time(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
    }
}

/// Identity of a persisted series: upper-cased symbol plus remote interval token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub interval: String,
}

impl SeriesKey {
    pub fn new(symbol: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            interval: interval.to_string(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Ascending, timestamp-unique sequence of bars for one [`SeriesKey`].
///
/// Every constructor and mutator restores the ordering/uniqueness invariant,
/// so holders of a `Series` never see duplicates or out-of-order bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SeriesParts")]
pub struct Series {
    key: SeriesKey,
    bars: Vec<Bar>,
}

/// Wire shape of a [`Series`]; deserialized bars go through `from_bars`
#[derive(Deserialize)]
struct SeriesParts {
    key: SeriesKey,
    bars: Vec<Bar>,
}

impl From<SeriesParts> for Series {
    fn from(parts: SeriesParts) -> Self {
        Series::from_bars(parts.key, parts.bars)
    }
}

impl Series {
    pub fn empty(key: SeriesKey) -> Self {
        Self {
            key,
            bars: Vec::new(),
        }
    }

    /// Build a series from bars in any order; on duplicate timestamps the
    /// later bar in iteration order wins.
    pub fn from_bars(key: SeriesKey, bars: impl IntoIterator<Item = Bar>) -> Self {
        let mut series = Self::empty(key);
        series.merge(bars);
        series
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn earliest_ms(&self) -> Option<i64> {
        self.bars.first().map(|b| b.timestamp_ms)
    }

    pub fn latest_ms(&self) -> Option<i64> {
        self.bars.last().map(|b| b.timestamp_ms)
    }

    /// Union `incoming` into the series. A bar whose timestamp is already
    /// present replaces the cached one. Returns the number of timestamps
    /// that were not present before.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Bar>) -> usize {
        let mut by_ts: BTreeMap<i64, Bar> = self
            .bars
            .drain(..)
            .map(|bar| (bar.timestamp_ms, bar))
            .collect();
        let mut added = 0;
        for bar in incoming {
            if by_ts.insert(bar.timestamp_ms, bar).is_none() {
                added += 1;
            }
        }
        self.bars = by_ts.into_values().collect();
        added
    }

    /// The most recent `count` bars, ascending
    pub fn tail(&self, count: usize) -> Vec<Bar> {
        let start = self.bars.len().saturating_sub(count);
        self.bars[start..].to_vec()
    }

    /// All bars with `timestamp_ms >= threshold_ms`, ascending
    pub fn since(&self, threshold_ms: i64) -> Vec<Bar> {
        let start = self.bars.partition_point(|b| b.timestamp_ms < threshold_ms);
        self.bars[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, close: i64) -> Bar {
        Bar::new(
            ts,
            Decimal::from(close),
            Decimal::from(close + 1),
            Decimal::from(close - 1),
            Decimal::from(close),
            Decimal::from(10),
            Decimal::from(15),
        )
    }

    fn key() -> SeriesKey {
        SeriesKey::new(" btcusdt ", "60")
    }

    #[test]
    fn test_series_key_normalizes_symbol() {
        assert_eq!(key().symbol, "BTCUSDT");
        assert_eq!(key().to_string(), "BTCUSDT@60");
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("Spot".parse::<Category>().unwrap(), Category::Spot);
        assert_eq!(Category::default(), Category::Linear);
        assert!(matches!(
            "options".parse::<Category>(),
            Err(ValidationError::InvalidCategory { .. })
        ));
    }

    #[test]
    fn test_from_bars_sorts_and_dedups() {
        let series = Series::from_bars(key(), vec![bar(3, 1), bar(1, 1), bar(2, 1), bar(1, 5)]);

        let timestamps: Vec<i64> = series.bars().iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
        assert_eq!(series.bars()[0].close, Decimal::from(5));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![bar(30, 1), bar(10, 1), bar(20, 1)];
        let mut once = Series::from_bars(key(), vec![bar(5, 1), bar(10, 1)]);
        let added = once.merge(batch.clone());
        assert_eq!(added, 2);

        let mut twice = once.clone();
        let added_again = twice.merge(batch);
        assert_eq!(added_again, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deserialized_series_is_normalized() {
        let value = serde_json::json!({
            "key": { "symbol": "BTCUSDT", "interval": "60" },
            "bars": [bar(20, 1), bar(10, 1), bar(20, 7)],
        });
        let mut series: Series = serde_json::from_value(value).unwrap();

        let timestamps: Vec<i64> = series.bars().iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(timestamps, vec![10, 20]);
        assert_eq!(series.bars()[1].close, Decimal::from(7));
        assert_eq!(series.merge(vec![bar(20, 2), bar(30, 1)]), 1);
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn test_merge_keeps_strict_ordering() {
        let mut series = Series::empty(key());
        series.merge(vec![bar(100, 1), bar(40, 1)]);
        series.merge(vec![bar(70, 1), bar(40, 2), bar(10, 1)]);

        for pair in series.bars().windows(2) {
            assert!(pair[0].timestamp_ms < pair[1].timestamp_ms);
        }
        assert_eq!(series.earliest_ms(), Some(10));
        assert_eq!(series.latest_ms(), Some(100));
    }

    #[test]
    fn test_tail_and_since() {
        let series = Series::from_bars(key(), (1..=10).map(|ts| bar(ts * 10, 1)));

        let tail: Vec<i64> = series.tail(3).iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(tail, vec![80, 90, 100]);
        assert_eq!(series.tail(50).len(), 10);

        let since: Vec<i64> = series.since(75).iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(since, vec![80, 90, 100]);
        assert_eq!(series.since(10).len(), 10);
        assert!(series.since(101).is_empty());
    }

    #[test]
    fn test_iso_from_ms() {
        assert_eq!(iso_from_ms(1_700_000_000_000), "2023-11-14T22:13:20+00:00");
        assert_eq!(bar(1_700_000_000_000, 1).open_time().unwrap().timestamp(), 1_700_000_000);
    }
}
