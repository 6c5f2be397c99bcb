use async_trait::async_trait;
use ck_types::{iso_from_ms, now_ms, Bar, CkError, CkResult, Series, SeriesKey, StorageError};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column layout shared by cache files and download artifacts
pub const CSV_HEADER: [&str; 8] = [
    "timestamp_ms",
    "start_time_iso",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "turnover",
];

const CACHE_FILE: &str = "candles.csv";

/// Persistent home of every [`Series`], one per [`SeriesKey`].
///
/// Implementations keep each stored series ascending and free of duplicate
/// timestamps, and persist the full result of a write before returning it.
#[async_trait]
pub trait SeriesStore: Send + Sync + std::fmt::Debug {
    /// The stored series, empty if nothing was ever stored under `key`
    async fn load(&self, key: &SeriesKey) -> CkResult<Series>;

    /// Overwrite the series with `bars` (sorted and deduplicated first)
    async fn replace(&self, key: &SeriesKey, bars: Vec<Bar>) -> CkResult<Series>;

    /// Union `new_bars` into the stored series. On a timestamp collision the
    /// incoming bar wins. Empty input is a no-op.
    async fn merge_append(&self, key: &SeriesKey, new_bars: Vec<Bar>) -> CkResult<Series>;
}

/// CSV file store: `{cache_dir}/{SYMBOL}/{interval}/candles.csv`.
///
/// Writes go to a sibling `.tmp` file that is renamed into place, so a reader
/// never sees a half-written series. A file whose header is not ours is
/// renamed to `candles.csv.quarantined.{epoch_ms}` and treated as empty; single
/// bad rows are skipped with a warning. I/O failures are returned as
/// [`StorageError::ReadFailed`] and leave the file in place. Writers for the same key are serialized by a
/// per-key async lock.
#[derive(Debug)]
pub struct CsvSeriesStore {
    cache_dir: PathBuf,
    mirror: DashMap<SeriesKey, Series>,
    locks: DashMap<SeriesKey, Arc<Mutex<()>>>,
}

impl CsvSeriesStore {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> CkResult<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir).map_err(|e| StorageError::WriteFailed {
            path: cache_dir.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            cache_dir,
            mirror: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// File backing `key`
    pub fn series_path(&self, key: &SeriesKey) -> PathBuf {
        self.cache_dir
            .join(&key.symbol)
            .join(&key.interval)
            .join(CACHE_FILE)
    }

    fn key_lock(&self, key: &SeriesKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_series(&self, key: &SeriesKey) -> CkResult<Series> {
        if let Some(cached) = self.mirror.get(key) {
            return Ok(cached.clone());
        }

        let path = self.series_path(key);
        let series = if path.exists() {
            match read_bars_csv(&path) {
                Ok(bars) => Series::from_bars(key.clone(), bars),
                Err(CkError::Storage(e @ StorageError::Corruption { .. })) => {
                    let quarantine = quarantine_path_for(&path);
                    tracing::warn!(
                        "Quarantining corrupt cache file {} to {} ({}); starting {} from empty",
                        path.display(),
                        quarantine.display(),
                        e,
                        key
                    );
                    fs::rename(&path, &quarantine).map_err(|rename_err| StorageError::WriteFailed {
                        path: quarantine.display().to_string(),
                        message: format!("quarantine failed: {}", rename_err),
                    })?;
                    Series::empty(key.clone())
                }
                Err(e) => return Err(e),
            }
        } else {
            Series::empty(key.clone())
        };

        self.mirror.insert(key.clone(), series.clone());
        Ok(series)
    }

    fn persist(&self, series: Series) -> CkResult<Series> {
        let path = self.series_path(series.key());
        write_bars_csv(&path, series.bars())?;
        tracing::debug!("Persisted {} bars for {} to {}", series.len(), series.key(), path.display());
        self.mirror.insert(series.key().clone(), series.clone());
        Ok(series)
    }
}

#[async_trait]
impl SeriesStore for CsvSeriesStore {
    async fn load(&self, key: &SeriesKey) -> CkResult<Series> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.read_series(key)
    }

    async fn replace(&self, key: &SeriesKey, bars: Vec<Bar>) -> CkResult<Series> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.persist(Series::from_bars(key.clone(), bars))
    }

    async fn merge_append(&self, key: &SeriesKey, new_bars: Vec<Bar>) -> CkResult<Series> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let mut series = self.read_series(key)?;
        if new_bars.is_empty() {
            return Ok(series);
        }
        series.merge(new_bars);
        self.persist(series)
    }
}

/// Atomically write `bars` as CSV to `path`, creating parent directories.
pub fn write_bars_csv(path: &Path, bars: &[Bar]) -> CkResult<()> {
    let write_failed = |message: String| StorageError::WriteFailed {
        path: path.display().to_string(),
        message,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
    }

    let tmp_path = tmp_path_for(path);
    let result = (|| -> Result<(), String> {
        let mut writer = csv::Writer::from_path(&tmp_path).map_err(|e| e.to_string())?;
        writer.write_record(CSV_HEADER).map_err(|e| e.to_string())?;
        for bar in bars {
            writer
                .write_record([
                    bar.timestamp_ms.to_string(),
                    iso_from_ms(bar.timestamp_ms),
                    bar.open.to_string(),
                    bar.high.to_string(),
                    bar.low.to_string(),
                    bar.close.to_string(),
                    bar.volume.to_string(),
                    bar.turnover.to_string(),
                ])
                .map_err(|e| e.to_string())?;
        }
        writer.flush().map_err(|e| e.to_string())?;
        fs::rename(&tmp_path, path).map_err(|e| format!("atomic rename failed: {}", e))
    })();

    if let Err(message) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_failed(message).into());
    }
    Ok(())
}

/// Read a bar CSV written by [`write_bars_csv`]. Rows that fail to parse are
/// skipped; a missing or foreign header is corruption.
pub fn read_bars_csv(path: &Path) -> CkResult<Vec<Bar>> {
    let read_failed = |e: csv::Error| StorageError::ReadFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(read_failed)?;

    let headers = reader.headers().map_err(|e| {
        if e.is_io_error() {
            read_failed(e)
        } else {
            StorageError::Corruption {
                path: path.display().to_string(),
                message: format!("unreadable header: {}", e),
            }
        }
    })?;
    if headers.iter().next() != Some(CSV_HEADER[0]) || headers.len() < CSV_HEADER.len() {
        return Err(StorageError::Corruption {
            path: path.display().to_string(),
            message: format!("unexpected header {:?}", headers),
        }
        .into());
    }

    let mut bars = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let parsed = match result {
            Err(e) if e.is_io_error() => return Err(read_failed(e).into()),
            Err(e) => Err(e.to_string()),
            Ok(record) => parse_record(&record),
        };
        match parsed {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                tracing::warn!(
                    "Skipping invalid record at line {} of {}: {}",
                    line_num + 2,
                    path.display(),
                    e
                );
            }
        }
    }
    Ok(bars)
}

fn parse_record(record: &csv::StringRecord) -> Result<Bar, String> {
    let field = |idx: usize| record.get(idx).ok_or_else(|| format!("missing column {}", idx));
    let decimal = |idx: usize| {
        field(idx).and_then(|raw| {
            Decimal::from_str(raw.trim())
                .map_err(|e| format!("bad {} value '{}': {}", CSV_HEADER[idx], raw, e))
        })
    };

    let timestamp_ms = field(0)?
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("bad timestamp: {}", e))?;

    Ok(Bar::new(
        timestamp_ms,
        decimal(2)?,
        decimal(3)?,
        decimal(4)?,
        decimal(5)?,
        decimal(6)?,
        decimal(7)?,
    ))
}

/// Sibling name that does not clobber an earlier quarantined copy
fn quarantine_path_for(path: &Path) -> PathBuf {
    let base = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let stamp = now_ms();
    let mut suffix = 0u32;
    loop {
        let mut name = base.clone();
        match suffix {
            0 => name.push(format!(".quarantined.{}", stamp)),
            n => name.push(format!(".quarantined.{}.{}", stamp, n)),
        }
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bar(ts: i64, close: i64) -> Bar {
        let c = Decimal::from(close);
        Bar::new(ts, c, c + Decimal::ONE, c - Decimal::ONE, c, Decimal::from(3), Decimal::new(45, 1))
    }

    fn key() -> SeriesKey {
        SeriesKey::new("BTCUSDT", "60")
    }

    #[tokio::test]
    async fn test_missing_series_loads_empty() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();

        let series = store.load(&key()).await.unwrap();
        assert!(series.is_empty());
        assert!(!store.series_path(&key()).exists());
    }

    #[tokio::test]
    async fn test_merge_append_persists_sorted_union() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();

        store.merge_append(&key(), vec![bar(3_000, 1), bar(1_000, 1)]).await.unwrap();
        let merged = store
            .merge_append(&key(), vec![bar(2_000, 1), bar(3_000, 9)])
            .await
            .unwrap();

        let ts: Vec<i64> = merged.bars().iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(ts, vec![1_000, 2_000, 3_000]);
        assert_eq!(merged.bars()[2].close, Decimal::from(9));

        // a fresh store sees exactly what was persisted
        let reopened = CsvSeriesStore::new(dir.path()).unwrap();
        assert_eq!(reopened.load(&key()).await.unwrap(), merged);
        assert!(!tmp_path_for(&store.series_path(&key())).exists());
    }

    #[tokio::test]
    async fn test_merge_append_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();
        let batch = vec![bar(1_000, 1), bar(2_000, 2)];

        let once = store.merge_append(&key(), batch.clone()).await.unwrap();
        let twice = store.merge_append(&key(), batch).await.unwrap();
        assert_eq!(once, twice);

        let unchanged = store.merge_append(&key(), Vec::new()).await.unwrap();
        assert_eq!(unchanged, once);
    }

    #[tokio::test]
    async fn test_file_layout_and_columns() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();
        store
            .replace(&SeriesKey::new("ethusdt", "D"), vec![bar(1_700_000_000_000, 5)])
            .await
            .unwrap();

        let path = dir.path().join("ETHUSDT").join("D").join("candles.csv");
        let content = fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp_ms,start_time_iso,open,high,low,close,volume,turnover")
        );
        assert_eq!(
            lines.next(),
            Some("1700000000000,2023-11-14T22:13:20+00:00,5,6,4,5,3,4.5")
        );
    }

    #[tokio::test]
    async fn test_unsorted_file_is_normalized_and_bad_rows_skipped() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();
        let path = store.series_path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "timestamp_ms,start_time_iso,open,high,low,close,volume,turnover\n\
             3000,x,1,1,1,1,1,1\n\
             oops,x,1,1,1,1,1,1\n\
             1000,x,1,1,1,1,1,1\n\
             3000,x,2,2,2,2,2,2\n",
        )
        .unwrap();

        let series = store.load(&key()).await.unwrap();
        let ts: Vec<i64> = series.bars().iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(ts, vec![1000, 3000]);
    }

    fn quarantined_files(path: &Path) -> Vec<PathBuf> {
        let prefix = format!("{}.quarantined.", CACHE_FILE);
        let mut found: Vec<PathBuf> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(&prefix))
            .collect();
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();
        let path = store.series_path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not,a,candle,file\n1,2,3,4\n").unwrap();

        let series = store.load(&key()).await.unwrap();

        assert!(series.is_empty());
        assert!(!path.exists());
        assert_eq!(quarantined_files(&path).len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_quarantine_keeps_every_copy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("BTCUSDT").join("60").join(CACHE_FILE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        for garbage in ["first,garbage\n", "second,garbage\n"] {
            // fresh store so the mirror does not hide the file
            let store = CsvSeriesStore::new(dir.path()).unwrap();
            fs::write(&path, garbage).unwrap();
            assert!(store.load(&key()).await.unwrap().is_empty());
        }

        let copies = quarantined_files(&path);
        assert_eq!(copies.len(), 2);
        let contents: Vec<String> = copies.iter().map(|p| fs::read_to_string(p).unwrap()).collect();
        assert!(contents.contains(&"first,garbage\n".to_string()));
        assert!(contents.contains(&"second,garbage\n".to_string()));
    }

    #[tokio::test]
    async fn test_read_failure_is_surfaced_and_file_kept() {
        let dir = tempdir().unwrap();
        let store = CsvSeriesStore::new(dir.path()).unwrap();
        let path = store.series_path(&key());
        // a directory in place of the file: opens, but every read fails
        fs::create_dir_all(&path).unwrap();

        let err = store.merge_append(&key(), vec![bar(1_000, 1)]).await.unwrap_err();

        assert!(matches!(err, CkError::Storage(StorageError::ReadFailed { .. })), "{:?}", err);
        assert!(path.is_dir());
        assert!(quarantined_files(&path).is_empty());
    }
}
