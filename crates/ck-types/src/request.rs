use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::errors::ValidationError;
use crate::market::{Category, Series, SeriesKey};
use crate::timeframe::{self, TimeframeSpec};

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// What part of the history a request wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// The most recent N bars
    Count(usize),
    /// Every bar with `timestamp_ms >= threshold`
    Since(i64),
}

impl Selection {
    pub fn need_count(&self) -> Option<usize> {
        match self {
            Selection::Count(n) => Some(*n),
            Selection::Since(_) => None,
        }
    }

    pub fn since_ms(&self) -> Option<i64> {
        match self {
            Selection::Count(_) => None,
            Selection::Since(threshold) => Some(*threshold),
        }
    }

    /// Whether `series` already holds everything this selection asks for
    pub fn is_covered_by(&self, series: &Series) -> bool {
        match self {
            Selection::Count(n) => series.len() >= *n,
            Selection::Since(threshold) => series
                .earliest_ms()
                .is_some_and(|earliest| earliest <= *threshold),
        }
    }
}

/// User-facing selection field that was set on a [`DownloadRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    CandlesBack,
    HoursBack,
    DaysBack,
    MonthsBack,
    YearsBack,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::CandlesBack => "candles_back",
            SelectionMode::HoursBack => "hours_back",
            SelectionMode::DaysBack => "days_back",
            SelectionMode::MonthsBack => "months_back",
            SelectionMode::YearsBack => "years_back",
        }
    }

    /// Turn `value` of this mode into a concrete selection anchored at `now_ms`.
    /// Months are 30 days and years 365 days.
    pub fn selection(&self, value: u64, now_ms: i64) -> Selection {
        let span = |unit_ms: i64| now_ms.saturating_sub((value as i64).saturating_mul(unit_ms));
        match self {
            SelectionMode::CandlesBack => Selection::Count(value as usize),
            SelectionMode::HoursBack => Selection::Since(span(HOUR_MS)),
            SelectionMode::DaysBack => Selection::Since(span(DAY_MS)),
            SelectionMode::MonthsBack => Selection::Since(span(30 * DAY_MS)),
            SelectionMode::YearsBack => Selection::Since(span(365 * DAY_MS)),
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One logical acquisition ask as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub category: Category,
    pub candles_back: Option<i64>,
    pub hours_back: Option<i64>,
    pub days_back: Option<i64>,
    pub months_back: Option<i64>,
    pub years_back: Option<i64>,
    pub out_dir: Option<PathBuf>,
}

impl DownloadRequest {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            ..Default::default()
        }
    }

    /// The single selection field that is set, with its value.
    pub fn selection_mode(&self) -> Result<(SelectionMode, u64), ValidationError> {
        let provided: Vec<(SelectionMode, i64)> = [
            (SelectionMode::CandlesBack, self.candles_back),
            (SelectionMode::HoursBack, self.hours_back),
            (SelectionMode::DaysBack, self.days_back),
            (SelectionMode::MonthsBack, self.months_back),
            (SelectionMode::YearsBack, self.years_back),
        ]
        .into_iter()
        .filter_map(|(mode, value)| value.map(|v| (mode, v)))
        .collect();

        match provided.as_slice() {
            [(mode, value)] if *value > 0 => Ok((*mode, *value as u64)),
            [(mode, value)] => Err(ValidationError::NonPositiveSelection {
                mode: mode.as_str().to_string(),
                value: *value,
            }),
            _ => Err(ValidationError::SelectionCount {
                provided: provided.len(),
            }),
        }
    }

    /// Validate and resolve into an [`AcquisitionRequest`] anchored at `now_ms`.
    pub fn resolve(&self, now_ms: i64) -> Result<ResolvedRequest, ValidationError> {
        let (mode, value) = self.selection_mode()?;
        let timeframe = timeframe::resolve(&self.timeframe)?;
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        Ok(ResolvedRequest {
            acquisition: AcquisitionRequest {
                key: SeriesKey::new(&self.symbol, &timeframe.remote_token),
                category: self.category,
                selection: mode.selection(value, now_ms),
            },
            timeframe,
            mode,
            value,
        })
    }
}

/// A validated request the reconciliation engine can act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub key: SeriesKey,
    pub category: Category,
    pub selection: Selection,
}

/// Output of [`DownloadRequest::resolve`]: the engine request plus the
/// caller-facing details needed to describe the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub acquisition: AcquisitionRequest,
    pub timeframe: TimeframeSpec,
    pub mode: SelectionMode,
    pub value: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Bar;
    use rust_decimal::Decimal;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_exactly_one_mode_required() {
        let none = DownloadRequest::new("BTCUSDT", "1h");
        assert_eq!(
            none.selection_mode(),
            Err(ValidationError::SelectionCount { provided: 0 })
        );

        let two = DownloadRequest {
            hours_back: Some(3),
            days_back: Some(1),
            ..DownloadRequest::new("BTCUSDT", "1h")
        };
        assert_eq!(
            two.selection_mode(),
            Err(ValidationError::SelectionCount { provided: 2 })
        );
    }

    #[test]
    fn test_non_positive_value_rejected() {
        let request = DownloadRequest {
            candles_back: Some(0),
            ..DownloadRequest::new("BTCUSDT", "1h")
        };
        assert!(matches!(
            request.selection_mode(),
            Err(ValidationError::NonPositiveSelection { .. })
        ));
    }

    #[test]
    fn test_resolve_time_mode() {
        let request = DownloadRequest {
            hours_back: Some(6),
            category: Category::Spot,
            ..DownloadRequest::new("ethusdt", "30m")
        };
        let resolved = request.resolve(NOW).unwrap();

        assert_eq!(resolved.acquisition.key, SeriesKey::new("ETHUSDT", "30"));
        assert_eq!(resolved.acquisition.category, Category::Spot);
        assert_eq!(
            resolved.acquisition.selection,
            Selection::Since(NOW - 6 * HOUR_MS)
        );
        assert_eq!(resolved.mode, SelectionMode::HoursBack);
        assert_eq!(resolved.value, 6);
        assert_eq!(resolved.timeframe.label, "30m");
    }

    #[test]
    fn test_month_and_year_approximations() {
        assert_eq!(
            SelectionMode::MonthsBack.selection(2, NOW),
            Selection::Since(NOW - 60 * DAY_MS)
        );
        assert_eq!(
            SelectionMode::YearsBack.selection(1, NOW),
            Selection::Since(NOW - 365 * DAY_MS)
        );
        assert_eq!(SelectionMode::CandlesBack.selection(500, NOW), Selection::Count(500));
    }

    #[test]
    fn test_resolve_rejects_bad_timeframe_and_symbol() {
        let bad_tf = DownloadRequest {
            candles_back: Some(10),
            ..DownloadRequest::new("BTCUSDT", "7m")
        };
        assert!(matches!(
            bad_tf.resolve(NOW),
            Err(ValidationError::InvalidTimeframe { .. })
        ));

        let blank = DownloadRequest {
            candles_back: Some(10),
            ..DownloadRequest::new("  ", "1h")
        };
        assert_eq!(blank.resolve(NOW), Err(ValidationError::EmptySymbol));
    }

    #[test]
    fn test_coverage_check() {
        let key = SeriesKey::new("BTCUSDT", "60");
        let one = Decimal::ONE;
        let series = Series::from_bars(
            key.clone(),
            (0..5).map(|i| Bar::new(1000 + i * 10, one, one, one, one, one, one)),
        );

        assert!(Selection::Count(5).is_covered_by(&series));
        assert!(!Selection::Count(6).is_covered_by(&series));
        assert!(Selection::Since(1000).is_covered_by(&series));
        assert!(!Selection::Since(999).is_covered_by(&series));
        assert!(!Selection::Since(0).is_covered_by(&Series::empty(key)));
    }
}
