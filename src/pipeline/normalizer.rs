// =============================================================================
// Tick Normalizer — Turns raw ticks into single-point candles
// =============================================================================

use futures_util::{pin_mut, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::{Candle, Tick};

/// Convert every tick of `ticks` into a degenerate candle and hand it to each
/// of `outputs` in turn.
///
/// Returns the number of ticks consumed. The outputs close when this returns.
/// A closed output means an aggregator has died; the normalizer then stops and
/// drops the tick stream, which is how the source learns to stop producing.
pub async fn run_normalizer<S>(ticks: S, outputs: Vec<mpsc::Sender<Candle>>) -> u64
where
    S: Stream<Item = Tick>,
{
    pin_mut!(ticks);
    let mut processed = 0u64;

    while let Some(tick) = ticks.next().await {
        processed += 1;
        let candle = Candle::from_tick(&tick);

        for tx in &outputs {
            if tx.send(candle.clone()).await.is_err() {
                warn!(processed, "an aggregator is gone; normalizer stopping");
                return processed;
            }
        }
    }

    info!(processed, "tick stream closed; normalizer finished");
    processed
}
