// =============================================================================
// Price Generator — Synthetic tick source
// =============================================================================
//
// Emits one tick per configured ticker every `delay_ms`, each ticker following
// its own bounded random walk. Stops when the cancellation token fires or when
// the consumer drops the stream, closing the stream either way.
// =============================================================================

use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::Tick;

/// Largest relative move of a single step (0.5 %).
const MAX_STEP: f64 = 0.005;
/// Prices never fall below one cent.
const MIN_PRICE: f64 = 0.01;

fn default_tickers() -> Vec<String> {
    ["AAPL", "SBER", "NVDA", "TSLA"].iter().map(|s| s.to_string()).collect()
}

fn default_factor() -> f64 {
    10.0
}

fn default_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Instruments to produce prices for.
    #[serde(default = "default_tickers")]
    pub tickers: Vec<String>,

    /// Scale of the starting prices: each ticker starts somewhere in
    /// `[factor, 100 * factor)`.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Pause between two rounds of ticks.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tickers: default_tickers(),
            factor: default_factor(),
            delay_ms: default_delay_ms(),
            seed: None,
        }
    }
}

pub struct PriceGenerator {
    config: GeneratorConfig,
}

impl PriceGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Start producing ticks on a background task.
    ///
    /// The returned stream ends once `cancel` fires. The handle resolves to
    /// the number of ticks produced once the task has stopped.
    pub fn prices(&self, cancel: CancellationToken) -> (ReceiverStream<Tick>, JoinHandle<u64>) {
        let (tx, rx) = mpsc::channel(self.config.tickers.len().max(1));
        let task = tokio::spawn(run_generator(self.config.clone(), tx, cancel));
        (ReceiverStream::new(rx), task)
    }
}

async fn run_generator(config: GeneratorConfig, tx: mpsc::Sender<Tick>, cancel: CancellationToken) -> u64 {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let factor = config.factor.abs().max(MIN_PRICE);
    let mut prices: Vec<f64> = config
        .tickers
        .iter()
        .map(|_| round_cents(factor * rng.gen_range(1.0..100.0)))
        .collect();

    info!(tickers = ?config.tickers, delay_ms = config.delay_ms, "price generator started");

    let mut interval = tokio::time::interval(Duration::from_millis(config.delay_ms.max(1)));
    let mut produced = 0u64;

    'rounds: loop {
        tokio::select! {
            _ = cancel.cancelled() => break 'rounds,
            _ = interval.tick() => {}
        }

        for (ticker, price) in config.tickers.iter().zip(prices.iter_mut()) {
            let step = rng.gen_range(-MAX_STEP..=MAX_STEP);
            *price = round_cents((*price * (1.0 + step)).max(MIN_PRICE));

            let tick = Tick::new(ticker.clone(), *price, Utc::now());
            tokio::select! {
                _ = cancel.cancelled() => break 'rounds,
                sent = tx.send(tick) => {
                    if sent.is_err() {
                        debug!("tick consumer is gone");
                        break 'rounds;
                    }
                }
            }
            produced += 1;
        }
    }

    info!(produced, "price generator stopped");
    produced
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
