// =============================================================================
// candle-snapshot - Main Entry Point
// =============================================================================
//
// One shot: collect a candle snapshot for the configured symbols, print it,
// and render a chart for the first symbol that reported.
// =============================================================================

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use candle_snapshot::chart::{self, ChartInput, IndicatorSeries};
use candle_snapshot::indicators;
use candle_snapshot::market_data::BinanceKlineFeed;
use candle_snapshot::runtime_config::{CollectorConfig, CONFIG_FILE};
use candle_snapshot::{CollectError, SnapshotCollector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = CollectorConfig::load(CONFIG_FILE).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        CollectorConfig::default()
    });
    config.apply_overrides(|key| std::env::var(key).ok());

    info!(
        symbols = ?config.symbols,
        interval = %config.interval,
        timeout_secs = config.timeout_secs,
        completion = %config.completion,
        "Fetching candle snapshot"
    );

    // ── 2. Collect ───────────────────────────────────────────────────────
    let collector = SnapshotCollector::new(BinanceKlineFeed::new(config.feed_url.clone()))
        .with_policy(config.completion)
        .with_termination_grace(config.termination_grace());

    let snapshot = match collector.collect(config.request()).await {
        Ok(snapshot) => snapshot,
        Err(e @ CollectError::WorkerTerminationFailure { .. }) => {
            error!(error = %e, "Collection worker could not be stopped - aborting");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    if snapshot.is_partial() {
        warn!(missing = ?snapshot.missing_symbols(), "Partial snapshot");
    }

    for record in snapshot.records().values() {
        println!("{}", serde_json::to_string(record)?);
    }

    // ── 3. Chart ─────────────────────────────────────────────────────────
    let Some(symbol) = snapshot.symbols().into_iter().next().map(str::to_string) else {
        return Ok(());
    };

    let mut input = ChartInput::from_snapshot(&snapshot, &symbol);
    let ema = indicators::ema(&input.close, config.ema_period);
    input = input.with_indicator(format!("ema{}", config.ema_period), IndicatorSeries::line(ema));

    let path = chart::render(&input, config.chart_path.as_deref())?;
    info!(path = %path.display(), symbol = %symbol, "Chart written");

    Ok(())
}
