use ck_data::{ConnectorSettings, RetryPolicy};
use ck_types::{config_error, CkResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

/// Runtime settings for acquisition, read from the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub base_url: String,
    pub request_timeout_sec: u64,
    pub max_bars_per_request: usize,
    /// Default root for download artifacts
    pub data_dir: PathBuf,
    /// Root of the per-series cache files
    pub cache_dir: PathBuf,
    pub qps: f64,
    pub max_retries: u32,
    pub retry_backoff_sec: f64,
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("candlekeep");

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_sec: 10,
            max_bars_per_request: 1000,
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            qps: 5.0,
            max_retries: 3,
            retry_backoff_sec: 0.5,
            max_workers: 8,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> CkResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns per variable name
    pub fn from_lookup<F>(lookup: F) -> CkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            base_url: text("BYBIT_BASE_URL").unwrap_or(defaults.base_url),
            request_timeout_sec: parse_var(&lookup, "REQUEST_TIMEOUT_SEC", defaults.request_timeout_sec)?,
            max_bars_per_request: parse_var(&lookup, "MAX_BARS_PER_REQUEST", defaults.max_bars_per_request)?,
            data_dir: text("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            cache_dir: text("CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            qps: parse_var(&lookup, "BYBIT_QPS", defaults.qps)?,
            max_retries: parse_var(&lookup, "BYBIT_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff_sec: parse_var(&lookup, "BYBIT_RETRY_BACKOFF_SEC", defaults.retry_backoff_sec)?,
            max_workers: parse_var(&lookup, "MAX_WORKERS", defaults.max_workers)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CkResult<()> {
        if !(self.qps.is_finite() && self.qps > 0.0) {
            return Err(config_error!("BYBIT_QPS must be positive, got {}", self.qps));
        }
        if Duration::try_from_secs_f64(self.retry_backoff_sec).is_err() {
            return Err(config_error!(
                "BYBIT_RETRY_BACKOFF_SEC must be a non-negative number of seconds, got {}",
                self.retry_backoff_sec
            ));
        }
        if self.max_bars_per_request == 0 {
            return Err(config_error!("MAX_BARS_PER_REQUEST must be at least 1"));
        }
        if self.request_timeout_sec == 0 {
            return Err(config_error!("REQUEST_TIMEOUT_SEC must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(config_error!("MAX_WORKERS must be at least 1"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// Assumes [`EngineConfig::validate`] passed; an unrepresentable backoff
    /// falls back to no delay.
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = Duration::try_from_secs_f64(self.retry_backoff_sec).unwrap_or(Duration::ZERO);
        RetryPolicy::new(self.max_retries, backoff)
    }

    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            base_url: self.base_url.clone(),
            request_timeout: self.request_timeout(),
            qps: self.qps,
            retry: self.retry_policy(),
            max_page_size: self.max_bars_per_request,
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> CkResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| config_error!("Invalid {}='{}': {}", name, raw, e)),
        _ => Ok(default),
    }
}
