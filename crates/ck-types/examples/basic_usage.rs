use ck_data::*;
use ck_types::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Candlekeep basic usage example");

    // Friendly timeframe tokens resolve to the remote interval
    for token in ["15m", "4h", "D", "1mo"] {
        let spec = resolve(token)?;
        println!("{:>4} -> interval {:>3}, label {}", token, spec.remote_token, spec.label);
    }

    // A user-facing request becomes a concrete acquisition
    let request = DownloadRequest {
        hours_back: Some(12),
        ..DownloadRequest::new("btcusdt", "1h")
    };
    let resolved = request.resolve(now_ms())?;
    println!(
        "Resolved {} ({}={}) to {:?}",
        resolved.acquisition.key, resolved.mode, resolved.value, resolved.acquisition.selection
    );

    // Offline provider and in-memory store stand in for Bybit and the CSV cache
    let hour = 3_600_000;
    let now = now_ms();
    let provider = Arc::new(SampleProvider::new(hour, now - now % hour).with_page_cap(5));
    let client = KlineClient::new(
        provider.clone(),
        Arc::new(RateLimiter::per_second(5.0)),
        RetryPolicy::new(3, Duration::from_millis(500)),
        1000,
    );
    let store = Arc::new(MemorySeriesStore::new());
    let reconciler = CoverageReconciler::new(client, store.clone());

    let report = reconciler.reconcile(&resolved.acquisition).await?;
    println!(
        "Cold start: {} bars cached after {} requests, covered={}",
        report.series.len(),
        provider.calls(),
        report.covered
    );

    // A second pass only tops up the newest end
    let again = reconciler.reconcile(&resolved.acquisition).await?;
    println!("Warm pass added {} bars", again.bars_added);

    let window = slice(&again.series, resolved.acquisition.selection);
    if let (Some(first), Some(last)) = (window.first(), window.last()) {
        println!(
            "Window of {} bars from {} to {}",
            window.len(),
            iso_from_ms(first.timestamp_ms),
            iso_from_ms(last.timestamp_ms)
        );
    }

    let stats = store.get_stats();
    println!("Store: {} hits, {} misses, {} writes", stats.hits, stats.misses, stats.stores);

    println!("Example completed successfully!");
    Ok(())
}
