use anyhow::Context;
use ck_engine::{AcquisitionService, BatchOrchestrator, BatchTemplate, DownloadResult, EngineConfig};
use ck_types::Category;
use clap::{Args, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Download Bybit klines into the local cache and export CSV slices
#[derive(Parser, Debug)]
#[command(name = "ck-download", version)]
struct Cli {
    /// Symbols separated by spaces, e.g. BTCUSDT ETHUSDT
    #[arg(long, short = 's', num_args = 1..)]
    symbols: Vec<String>,

    /// File with one symbol per line; `#` starts a comment line
    #[arg(long)]
    symbols_file: Option<PathBuf>,

    /// Timeframe such as 30m, 1h, 4h, D, W or M
    #[arg(long, short = 't')]
    timeframe: String,

    /// spot, linear or inverse
    #[arg(long, default_value = "linear")]
    category: Category,

    #[command(flatten)]
    selection: SelectionArgs,

    /// Root of the exported files (defaults to DATA_DIR)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Print one JSON object per symbol instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct SelectionArgs {
    #[arg(long)]
    candles_back: Option<i64>,
    #[arg(long)]
    hours_back: Option<i64>,
    #[arg(long)]
    days_back: Option<i64>,
    #[arg(long)]
    months_back: Option<i64>,
    #[arg(long)]
    years_back: Option<i64>,
}

impl Cli {
    fn template(&self) -> BatchTemplate {
        BatchTemplate {
            timeframe: self.timeframe.clone(),
            category: self.category,
            candles_back: self.selection.candles_back,
            hours_back: self.selection.hours_back,
            days_back: self.selection.days_back,
            months_back: self.selection.months_back,
            years_back: self.selection.years_back,
            out_dir: self.out_dir.clone(),
        }
    }
}

/// Non-empty, non-comment lines of a symbols file
fn read_symbols_file(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn print_result(result: &DownloadResult, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "ok": true, "result": result }));
        return;
    }
    println!(
        " - {:>10}  {:>4}  {:>6} rows  -> {}",
        result.symbol,
        result.timeframe,
        result.rows,
        result.saved_file.display()
    );
}

async fn run(cli: Cli, symbols: Vec<String>) -> anyhow::Result<()> {
    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    let service = AcquisitionService::from_config(&config)?;
    let template = cli.template();

    if let [symbol] = symbols.as_slice() {
        let result = service.download(template.request_for(symbol)).await?;
        if !cli.json {
            println!("Downloaded:");
        }
        print_result(&result, cli.json);
        return Ok(());
    }

    let orchestrator = BatchOrchestrator::new(service, config.max_workers);
    let outcomes = orchestrator.run(symbols, template).await?;
    if !cli.json {
        println!("Downloaded:");
    }
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => print_result(result, cli.json),
            Err(e) if cli.json => println!(
                "{}",
                serde_json::json!({ "ok": false, "symbol": outcome.symbol, "error": e.to_string() })
            ),
            Err(e) => println!(" - {:>10}  ERROR  {}", outcome.symbol, e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut symbols = cli.symbols.clone();
    if let Some(path) = &cli.symbols_file {
        if !path.exists() {
            eprintln!("File not found: {}", path.display());
            return ExitCode::from(2);
        }
        match read_symbols_file(path) {
            Ok(from_file) => symbols.extend(from_file),
            Err(e) => {
                eprintln!("Error: failed to read {}: {}", path.display(), e);
                return ExitCode::from(1);
            }
        }
    }

    match run(cli, symbols).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
