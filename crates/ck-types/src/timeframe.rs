use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ValidationError;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;
/// Months are approximated as 30 days.
const MONTH_MS: i64 = 30 * DAY_MS;

/// Kline intervals the remote API supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Minute1,
    Minute3,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour12,
    Day,
    Week,
    Month,
}

impl Interval {
    pub const ALL: [Interval; 13] = [
        Interval::Minute1,
        Interval::Minute3,
        Interval::Minute5,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Hour1,
        Interval::Hour2,
        Interval::Hour4,
        Interval::Hour6,
        Interval::Hour12,
        Interval::Day,
        Interval::Week,
        Interval::Month,
    ];

    /// Token understood by the remote API
    pub fn remote_token(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1",
            Interval::Minute3 => "3",
            Interval::Minute5 => "5",
            Interval::Minute15 => "15",
            Interval::Minute30 => "30",
            Interval::Hour1 => "60",
            Interval::Hour2 => "120",
            Interval::Hour4 => "240",
            Interval::Hour6 => "360",
            Interval::Hour12 => "720",
            Interval::Day => "D",
            Interval::Week => "W",
            Interval::Month => "M",
        }
    }

    /// Human-friendly label, used in output paths
    pub fn label(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour12 => "12h",
            Interval::Day => "1d",
            Interval::Week => "1w",
            Interval::Month => "1mo",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Interval::Minute1 => MINUTE_MS,
            Interval::Minute3 => 3 * MINUTE_MS,
            Interval::Minute5 => 5 * MINUTE_MS,
            Interval::Minute15 => 15 * MINUTE_MS,
            Interval::Minute30 => 30 * MINUTE_MS,
            Interval::Hour1 => HOUR_MS,
            Interval::Hour2 => 2 * HOUR_MS,
            Interval::Hour4 => 4 * HOUR_MS,
            Interval::Hour6 => 6 * HOUR_MS,
            Interval::Hour12 => 12 * HOUR_MS,
            Interval::Day => DAY_MS,
            Interval::Week => WEEK_MS,
            Interval::Month => MONTH_MS,
        }
    }

    pub fn from_remote_token(token: &str) -> Option<Interval> {
        Self::ALL.into_iter().find(|i| i.remote_token() == token)
    }

    fn from_minutes(n: u32) -> Option<Interval> {
        match n {
            1 => Some(Interval::Minute1),
            3 => Some(Interval::Minute3),
            5 => Some(Interval::Minute5),
            15 => Some(Interval::Minute15),
            30 => Some(Interval::Minute30),
            _ => None,
        }
    }

    fn from_hours(n: u32) -> Option<Interval> {
        match n {
            1 => Some(Interval::Hour1),
            2 => Some(Interval::Hour2),
            4 => Some(Interval::Hour4),
            6 => Some(Interval::Hour6),
            12 => Some(Interval::Hour12),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Resolved form of a user-supplied timeframe token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeSpec {
    pub interval: Interval,
    pub remote_token: String,
    pub label: String,
    pub duration_ms: i64,
}

impl From<Interval> for TimeframeSpec {
    fn from(interval: Interval) -> Self {
        Self {
            interval,
            remote_token: interval.remote_token().to_string(),
            label: interval.label().to_string(),
            duration_ms: interval.duration_ms(),
        }
    }
}

fn invalid(token: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidTimeframe {
        token: token.to_string(),
        reason: reason.into(),
    }
}

/// Parse the count in front of a unit suffix; an empty prefix means 1.
fn unit_count(token: &str, prefix: &str) -> Result<u32, ValidationError> {
    if prefix.is_empty() {
        return Ok(1);
    }
    prefix
        .parse::<u32>()
        .map_err(|_| invalid(token, "not a number followed by a unit"))
}

/// Resolve a granularity token into the remote token, label and duration.
///
/// Accepts the remote's native tokens (`1`..`720`, `D`, `W`, `M`) and the
/// friendly forms `30m`, `4h`, `1d`, `1w`, `1mo`. Only the intervals the
/// remote actually serves are accepted; nothing is rounded. An upper-case `M`
/// suffix means month (only `M` and `1M` exist), a lower-case `m` suffix means
/// minutes.
pub fn resolve(token: &str) -> Result<TimeframeSpec, ValidationError> {
    let s = token.trim();
    if s.is_empty() {
        return Err(invalid(token, "timeframe is required"));
    }

    if let Some(interval) = Interval::from_remote_token(s) {
        return Ok(interval.into());
    }
    if s == "1M" {
        return Ok(Interval::Month.into());
    }
    if let Some(prefix) = s.strip_suffix('M') {
        unit_count(token, prefix)?;
        return Err(invalid(
            token,
            "month interval supports only single months, use \"M\" or \"1mo\"",
        ));
    }

    let lower = s.to_lowercase();

    if let Some(prefix) = lower
        .strip_suffix("mon")
        .or_else(|| lower.strip_suffix("mo"))
    {
        let n = unit_count(token, prefix)?;
        if n != 1 {
            return Err(invalid(
                token,
                "month interval supports only single months, use \"M\" or \"1mo\"",
            ));
        }
        return Ok(Interval::Month.into());
    }

    if let Some(prefix) = lower.strip_suffix('m') {
        if prefix.is_empty() {
            return Ok(Interval::Month.into());
        }
        let n = unit_count(token, prefix)?;
        return Interval::from_minutes(n)
            .map(Into::into)
            .ok_or_else(|| invalid(token, "Allowed minute timeframes: 1m,3m,5m,15m,30m"));
    }

    if let Some(prefix) = lower.strip_suffix('h') {
        let n = unit_count(token, prefix)?;
        return Interval::from_hours(n)
            .map(Into::into)
            .ok_or_else(|| invalid(token, "Allowed hour timeframes: 1h,2h,4h,6h,12h"));
    }

    match lower.as_str() {
        "d" | "1d" => Ok(Interval::Day.into()),
        "w" | "1w" => Ok(Interval::Week.into()),
        _ => Err(invalid(token, "unsupported timeframe")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(t: &str) -> String {
        resolve(t).unwrap().remote_token
    }

    #[test]
    fn test_native_tokens_round_trip() {
        for interval in Interval::ALL {
            let spec = resolve(interval.remote_token()).unwrap();
            assert_eq!(spec.interval, interval);
            assert_eq!(spec.label, interval.label());
        }
    }

    #[test]
    fn test_friendly_minutes_and_hours() {
        assert_eq!(token("30m"), "30");
        assert_eq!(token("1m"), "1");
        assert_eq!(token("4h"), "240");
        assert_eq!(token("12H"), "720");
        assert_eq!(resolve("4h").unwrap().duration_ms, 4 * HOUR_MS);
        assert_eq!(resolve("60").unwrap().label, "1h");
    }

    #[test]
    fn test_days_weeks_months() {
        assert_eq!(token("D"), "D");
        assert_eq!(token("1d"), "D");
        assert_eq!(token("w"), "W");
        assert_eq!(token("1mo"), "M");
        assert_eq!(token("1mon"), "M");
        assert_eq!(token("1M"), "M");
        assert_eq!(token("m"), "M");
        assert_eq!(resolve("M").unwrap().duration_ms, 30 * DAY_MS);
        assert_eq!(resolve("M").unwrap().label, "1mo");
    }

    #[test]
    fn test_rejects_unsupported_granularities() {
        for bad in ["", "  ", "7m", "45m", "3h", "24h", "2mo", "3M", "30M", "2d", "xh", "abc", "90"] {
            let err = resolve(bad).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidTimeframe { .. }),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        assert_eq!(token(" 15m "), "15");
    }
}
