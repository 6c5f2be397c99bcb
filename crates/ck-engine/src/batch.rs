use ck_types::{internal_error, now_ms, Category, CkResult, DownloadRequest, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::service::{AcquisitionService, DownloadResult};

/// Parameters shared by every symbol of a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTemplate {
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

impl BatchTemplate {
    pub fn new(timeframe: &str) -> Self {
        Self {
            timeframe: timeframe.to_string(),
            ..Default::default()
        }
    }

    pub fn request_for(&self, symbol: &str) -> DownloadRequest {
        DownloadRequest {
            symbol: symbol.to_string(),
            timeframe: self.timeframe.clone(),
            category: self.category,
            candles_back: self.candles_back,
            hours_back: self.hours_back,
            days_back: self.days_back,
            months_back: self.months_back,
            years_back: self.years_back,
            out_dir: self.out_dir.clone(),
        }
    }
}

/// Result for one symbol of a batch
#[derive(Debug)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub result: CkResult<DownloadResult>,
}

impl SymbolOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs one download per symbol on a bounded set of tasks. Every task shares
/// the same service, and therefore the same rate limiter.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    service: AcquisitionService,
    max_workers: usize,
}

impl BatchOrchestrator {
    pub fn new(service: AcquisitionService, max_workers: usize) -> Self {
        Self {
            service,
            max_workers: max_workers.max(1),
        }
    }

    pub fn service(&self) -> &AcquisitionService {
        &self.service
    }

    /// Download every symbol with the shared `template`.
    ///
    /// Symbols are trimmed, upper-cased and deduplicated. The template is
    /// validated once up front; after that a failing symbol is reported in its
    /// own outcome and never stops the others. Outcomes arrive in completion
    /// order, one per distinct symbol.
    pub async fn run(&self, symbols: Vec<String>, template: BatchTemplate) -> CkResult<Vec<SymbolOutcome>> {
        let symbols = normalize_symbols(symbols);
        let Some(first) = symbols.first() else {
            return Err(ValidationError::EmptySymbols.into());
        };
        template.request_for(first).resolve(now_ms())?;

        let workers = self.max_workers.min(symbols.len());
        info!(
            "Batch of {} symbols at {} with {} workers",
            symbols.len(),
            template.timeframe,
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        for symbol in &symbols {
            let semaphore = semaphore.clone();
            let service = self.service.clone();
            let request = template.request_for(symbol);
            let symbol = symbol.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                // inner task so a panic is attributed to its symbol
                let download = tokio::spawn(async move { service.download(request).await });
                let result = match download.await {
                    Ok(result) => result,
                    Err(e) => Err(internal_error!("download task for {} failed: {}", symbol, e)),
                };
                SymbolOutcome { symbol, result }
            });
        }

        let mut outcomes = Vec::with_capacity(symbols.len());
        let mut pending: HashSet<String> = symbols.iter().cloned().collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Err(e) = &outcome.result {
                        error!("Failed to download {}: {}", outcome.symbol, e);
                    }
                    pending.remove(&outcome.symbol);
                    outcomes.push(outcome);
                }
                Err(e) => error!("Batch task failed: {}", e),
            }
        }
        for symbol in symbols.into_iter().filter(|s| pending.contains(s)) {
            outcomes.push(SymbolOutcome {
                result: Err(internal_error!("no outcome recorded for {}", symbol)),
                symbol,
            });
        }

        let ok = outcomes.iter().filter(|o| o.is_ok()).count();
        info!("Batch finished: {} ok, {} failed", ok, outcomes.len() - ok);
        Ok(outcomes)
    }
}

fn normalize_symbols(symbols: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
