// =============================================================================
// Period Aggregator — Buckets a candle stream into one period
// =============================================================================
//
// One aggregator runs per configured period, as a single Tokio task. The open
// bucket lives in a map keyed by instrument that only that task ever touches,
// so no locking is involved.
//
// For every incoming candle:
//   1. Compute its bucket start for this period.
//   2. If the bucket differs from the current one and candles are pending,
//      flush them all (sink first, then downstream).
//   3. Merge the candle into the pending entry for its instrument.
// When the input closes the last partial bucket is flushed, never dropped.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::market_data::CandlePeriod;
use crate::pipeline::sink::CandleSink;
use crate::types::Candle;

/// Counters reported by an aggregator task once its input has drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub period: CandlePeriod,
    /// Candles consumed from upstream.
    pub received: u64,
    /// Finalized candles written to the sink.
    pub emitted: u64,
    /// Buckets closed (including the final partial one).
    pub buckets: u64,
}

impl AggregatorStats {
    fn new(period: CandlePeriod) -> Self {
        Self {
            period,
            received: 0,
            emitted: 0,
            buckets: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Bucket state
// ---------------------------------------------------------------------------

/// Pending candles of the currently open bucket.
pub struct PeriodAggregator {
    period: CandlePeriod,
    current_bucket: Option<DateTime<Utc>>,
    pending: HashMap<String, Candle>,
}

impl PeriodAggregator {
    pub fn new(period: CandlePeriod) -> Self {
        Self {
            period,
            current_bucket: None,
            pending: HashMap::new(),
        }
    }

    /// Merge `candle` into the open bucket.
    ///
    /// Returns the candles of the previous bucket when `candle` opens a new
    /// one, sorted by instrument; otherwise an empty vec.
    pub fn push(&mut self, candle: &Candle) -> Vec<Candle> {
        let bucket = self.period.bucket_start(candle.ts);

        let mut closed = Vec::new();
        if let Some(current) = self.current_bucket {
            if current != bucket && !self.pending.is_empty() {
                if bucket < current {
                    warn!(
                        period = %self.period,
                        instrument = %candle.instrument,
                        current = %current,
                        bucket = %bucket,
                        "candle arrived for an earlier bucket; closing the current one"
                    );
                }
                closed = self.drain();
            }
        }
        self.current_bucket = Some(bucket);

        match self.pending.get_mut(&candle.instrument) {
            Some(bar) => bar.merge(candle),
            None => {
                self.pending.insert(
                    candle.instrument.clone(),
                    Candle::opened(candle, self.period, bucket),
                );
            }
        }

        closed
    }

    /// Flush whatever is still pending. Used when the input has ended.
    pub fn finish(&mut self) -> Vec<Candle> {
        self.drain()
    }

    fn drain(&mut self) -> Vec<Candle> {
        let mut bars: Vec<Candle> = self.pending.drain().map(|(_, bar)| bar).collect();
        bars.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        bars
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Where a closed bucket goes: the period's sink and, unless this is the last
/// stage, the next aggregator.
struct Emitter {
    period: CandlePeriod,
    sink: Box<dyn CandleSink>,
    downstream: Option<mpsc::Sender<Candle>>,
    downstream_lost: bool,
    stats: AggregatorStats,
}

impl Emitter {
    async fn emit(&mut self, bars: Vec<Candle>) -> Result<()> {
        if bars.is_empty() {
            return Ok(());
        }
        self.stats.buckets += 1;
        let bucket = bars[0].ts;
        debug!(
            period = %self.period,
            count = bars.len(),
            from = %bucket,
            to = %(bucket + self.period.duration()),
            "bucket closed"
        );

        for bar in bars {
            self.sink.write(&bar)?;
            self.stats.emitted += 1;

            if let Some(tx) = &self.downstream {
                if tx.send(bar).await.is_err() {
                    warn!(period = %self.period, "downstream stage is gone; stopping after final flush");
                    self.downstream = None;
                    self.downstream_lost = true;
                }
            }
        }
        Ok(())
    }
}

/// Run the aggregator for `period` until `input` closes.
///
/// Dropping `downstream` on return is what ends the next stage. If the next
/// stage has died the task stops early so the failure travels upstream too;
/// what is still pending goes to the sink only.
pub async fn run_aggregator(
    period: CandlePeriod,
    mut input: mpsc::Receiver<Candle>,
    sink: Box<dyn CandleSink>,
    downstream: Option<mpsc::Sender<Candle>>,
) -> Result<AggregatorStats> {
    info!(period = %period, chained = downstream.is_some(), "aggregator started");

    let mut aggregator = PeriodAggregator::new(period);
    let mut emitter = Emitter {
        period,
        sink,
        downstream,
        downstream_lost: false,
        stats: AggregatorStats::new(period),
    };

    while let Some(candle) = input.recv().await {
        emitter.stats.received += 1;
        let closed = aggregator.push(&candle);
        emitter.emit(closed).await?;
        if emitter.downstream_lost {
            break;
        }
    }

    emitter.emit(aggregator.finish()).await?;

    info!(
        period = %period,
        received = emitter.stats.received,
        emitted = emitter.stats.emitted,
        buckets = emitter.stats.buckets,
        "aggregator drained"
    );
    Ok(emitter.stats)
}
