// Candlekeep acquisition engine
// Resolves download requests against the kline cache and exports CSV slices

pub mod config;
pub mod service;
pub mod batch;

pub use config::EngineConfig;
pub use service::{artifact_path, AcquisitionService, DownloadResult};
pub use batch::{BatchOrchestrator, BatchTemplate, SymbolOutcome};
