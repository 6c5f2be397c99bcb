use async_trait::async_trait;
use ck_types::{Bar, CkResult, Series, SeriesKey};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::storage::SeriesStore;

/// In-memory [`SeriesStore`] for tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemorySeriesStore {
    series: DashMap<SeriesKey, Series>,
    stats: RwLock<CacheStats>,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `bars` under `key`
    pub fn with_series(key: SeriesKey, bars: Vec<Bar>) -> Self {
        let store = Self::new();
        store.series.insert(key.clone(), Series::from_bars(key, bars));
        store
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.series.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn clear(&self) {
        self.series.clear();
        *self.stats.write() = CacheStats::default();
    }
}

#[async_trait]
impl SeriesStore for MemorySeriesStore {
    async fn load(&self, key: &SeriesKey) -> CkResult<Series> {
        let found = self.series.get(key).map(|s| s.clone());
        let mut stats = self.stats.write();
        match found {
            Some(series) => {
                stats.hits += 1;
                Ok(series)
            }
            None => {
                stats.misses += 1;
                Ok(Series::empty(key.clone()))
            }
        }
    }

    async fn replace(&self, key: &SeriesKey, bars: Vec<Bar>) -> CkResult<Series> {
        let series = Series::from_bars(key.clone(), bars);
        self.series.insert(key.clone(), series.clone());

        let mut stats = self.stats.write();
        stats.stores += 1;
        Ok(series)
    }

    async fn merge_append(&self, key: &SeriesKey, new_bars: Vec<Bar>) -> CkResult<Series> {
        let mut entry = self
            .series
            .entry(key.clone())
            .or_insert_with(|| Series::empty(key.clone()));
        if new_bars.is_empty() {
            return Ok(entry.clone());
        }

        let added = entry.merge(new_bars);
        let merged = entry.clone();
        drop(entry);

        let mut stats = self.stats.write();
        stats.stores += 1;
        stats.bars_added += added as u64;
        Ok(merged)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub bars_added: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
