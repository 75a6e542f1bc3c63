// =============================================================================
// OHLC Pipeline — Main Entry Point
// =============================================================================
//
// Feeds synthetic prices through the multi-period candle pipeline and writes
// one candles_<period>.csv file per period. Ctrl+C stops the generator; the
// pipeline then drains and flushes every period before the process exits.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod error;
mod market_data;
mod pipeline;
mod runtime_config;
mod types;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::market_data::PriceGenerator;
use crate::pipeline::CandlePipeline;
use crate::runtime_config::RuntimeConfig;

const DEFAULT_CONFIG_PATH: &str = "candles_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("CANDLES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let mut config = RuntimeConfig::load_or_init(&config_path)?;
    config.apply_env()?;
    config.validate()?;

    info!(
        periods = ?config.periods,
        topology = %config.topology,
        tickers = ?config.generator.tickers,
        output_dir = %config.output_dir.display(),
        "configuration ready"
    );

    // ── 2. Build the pipeline (sinks are created before any tick) ────────
    let candle_pipeline = CandlePipeline::new(
        config.periods.clone(),
        config.topology,
        config.channel_capacity,
    )?
    .with_csv_sinks(&config.output_dir, config.write_header)
    .context("failed to create candle output files")?;

    // ── 3. Tick source ───────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    info!("start prices generator...");
    let (prices, generator_task) = PriceGenerator::new(config.generator.clone()).prices(cancel.clone());

    // ── 4. Ctrl+C cancels the source; shutdown cascades downstream ───────
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                warn!("shutdown signal received, stopping price generation");
                signal_cancel.cancel();
            }
            _ = signal_cancel.cancelled() => {}
        }
    });

    // ── 5. Run until the pipeline has drained ────────────────────────────
    let result = candle_pipeline.handle(prices).await;

    // Stops the generator if the pipeline ended on its own (e.g. a failure).
    cancel.cancel();
    match generator_task.await {
        Ok(produced) => info!(produced, "price generator joined"),
        Err(e) => warn!(error = %e, "price generator task failed"),
    }
    if let Err(e) = signal_task.await {
        warn!(error = %e, "signal task failed");
    }

    let report = result.context("candle pipeline failed")?;
    for stats in &report.stats {
        info!(
            period = %stats.period,
            candles = stats.emitted,
            buckets = stats.buckets,
            file = %config.output_dir.join(pipeline::sink::csv_file_name(stats.period)).display(),
            "period finished"
        );
    }
    info!(ticks = report.ticks, "candles for all periods are saved");
    Ok(())
}
