use chrono::{DateTime, Utc};
use ck_data::{bybit_reconciler, slice, write_bars_csv, CoverageReconciler};
use ck_types::{now_ms, Category, CkResult, DownloadRequest, SelectionMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::EngineConfig;

/// Outcome of one completed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub saved_file: PathBuf,
    pub rows: usize,
    pub symbol: String,
    /// Friendly timeframe label, e.g. `30m` or `1mo`
    pub timeframe: String,
    pub category: Category,
    pub mode: SelectionMode,
    pub value: u64,
}

/// Single-symbol acquisition: validate, reconcile the cache, slice the
/// requested window and write it out as a CSV artifact.
#[derive(Debug, Clone)]
pub struct AcquisitionService {
    reconciler: CoverageReconciler,
    data_dir: PathBuf,
}

impl AcquisitionService {
    pub fn new(reconciler: CoverageReconciler, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            reconciler,
            data_dir: data_dir.into(),
        }
    }

    /// Bybit-backed service with a CSV cache, as described by `config`
    pub fn from_config(config: &EngineConfig) -> CkResult<Self> {
        let reconciler = bybit_reconciler(&config.connector_settings(), &config.cache_dir)?;
        Ok(Self::new(reconciler, config.data_dir.clone()))
    }

    pub fn reconciler(&self) -> &CoverageReconciler {
        &self.reconciler
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub async fn download(&self, request: DownloadRequest) -> CkResult<DownloadResult> {
        let resolved = request.resolve(now_ms())?;
        let acquisition = &resolved.acquisition;

        let report = self.reconciler.reconcile(acquisition).await?;
        let bars = slice(&report.series, acquisition.selection);

        let now = now_ms();
        let start_ms = bars.first().map_or(now, |b| b.timestamp_ms);
        let end_ms = bars.last().map_or(now, |b| b.timestamp_ms);
        let out_dir = request.out_dir.as_deref().unwrap_or(&self.data_dir);
        let saved_file = artifact_path(
            out_dir,
            &acquisition.key.symbol,
            &resolved.timeframe.label,
            start_ms,
            end_ms,
        );
        write_bars_csv(&saved_file, &bars)?;

        info!(
            "Saved {} {} bars of {} ({}={}) to {}",
            bars.len(),
            resolved.timeframe.label,
            acquisition.key.symbol,
            resolved.mode,
            resolved.value,
            saved_file.display()
        );

        Ok(DownloadResult {
            saved_file,
            rows: bars.len(),
            symbol: acquisition.key.symbol.clone(),
            timeframe: resolved.timeframe.label.clone(),
            category: acquisition.category,
            mode: resolved.mode,
            value: resolved.value,
        })
    }
}

/// `{out_dir}/{SYMBOL}/{label}/candles_{YYYYMMDD}-{YYYYMMDD}.csv`, dates in UTC
pub fn artifact_path(out_dir: &Path, symbol: &str, label: &str, start_ms: i64, end_ms: i64) -> PathBuf {
    let day = |ms: i64| {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .unwrap_or_else(Utc::now)
            .format("%Y%m%d")
            .to_string()
    };
    out_dir
        .join(symbol.to_uppercase())
        .join(label)
        .join(format!("candles_{}-{}.csv", day(start_ms), day(end_ms)))
}
