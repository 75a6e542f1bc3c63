// =============================================================================
// Candle Pipeline — Wires normalizer, aggregators and sinks together
// =============================================================================
//
// Chained topology (default):
//
//   ticks ─► normalizer ─► agg(P1) ─► agg(P2) ─► … ─► agg(Pn)
//                            │          │               │
//                            ▼          ▼               ▼
//                          sink(P1)   sink(P2)        sink(Pn)
//
// Fan-out topology: the normalizer feeds every aggregator directly and no
// aggregator forwards its output.
//
// Every stage is one Tokio task connected to the next by a bounded mpsc
// channel. Shutdown is driven entirely by end-of-stream: when the tick source
// closes, each stage drains, flushes and drops its sender in turn. `handle`
// joins every task it spawned before returning, on success and on failure.
// =============================================================================

pub mod aggregator;
pub mod normalizer;
pub mod sink;

use std::iter;
use std::path::Path;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::market_data::CandlePeriod;
use crate::types::{Candle, Tick};

pub use aggregator::AggregatorStats;
pub use sink::{CandleSink, CsvSink};
#[cfg(test)]
pub use sink::MemorySink;

/// How aggregators receive their input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineTopology {
    /// Each aggregator consumes the output of the previous, finer one.
    /// Requires every period to be a multiple of the one before it.
    #[default]
    Chained,
    /// Each aggregator consumes the normalized tick stream directly.
    FanOut,
}

impl std::fmt::Display for PipelineTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chained => write!(f, "chained"),
            Self::FanOut => write!(f, "fan_out"),
        }
    }
}

/// Summary returned once the whole pipeline has drained.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Ticks consumed by the normalizer.
    pub ticks: u64,
    /// One entry per period, in configuration order.
    pub stats: Vec<AggregatorStats>,
}

/// Check that `periods` can be aggregated with `topology`.
///
/// Periods must be non-empty, listed once each and strictly increasing. The
/// chained topology additionally needs every period to be an exact multiple
/// of its predecessor, otherwise buckets computed from merged candles drift
/// from buckets computed from raw ticks.
pub fn validate_periods(periods: &[CandlePeriod], topology: PipelineTopology) -> Result<()> {
    if periods.is_empty() {
        return Err(PipelineError::InvalidConfig("at least one period is required".into()));
    }

    for pair in periods.windows(2) {
        let (finer, coarser) = (pair[0], pair[1]);
        if coarser == finer {
            return Err(PipelineError::InvalidConfig(format!("period {finer} is listed twice")));
        }
        if coarser < finer {
            return Err(PipelineError::InvalidConfig(format!(
                "periods must be in increasing order, found {coarser} after {finer}"
            )));
        }
        if topology == PipelineTopology::Chained && !coarser.is_multiple_of(finer) {
            return Err(PipelineError::InvalidConfig(format!(
                "period {coarser} is not a multiple of {finer}; use the fan_out topology for unaligned periods"
            )));
        }
    }
    Ok(())
}

/// The candle aggregation pipeline for a fixed set of periods.
pub struct CandlePipeline {
    periods: Vec<CandlePeriod>,
    topology: PipelineTopology,
    channel_capacity: usize,
    sinks: Vec<Box<dyn CandleSink>>,
}

impl CandlePipeline {
    /// Validate the period list. Sinks are attached separately.
    pub fn new(
        periods: Vec<CandlePeriod>,
        topology: PipelineTopology,
        channel_capacity: usize,
    ) -> Result<Self> {
        validate_periods(&periods, topology)?;
        if channel_capacity == 0 {
            return Err(PipelineError::InvalidConfig("channel capacity must be at least 1".into()));
        }
        Ok(Self {
            periods,
            topology,
            channel_capacity,
            sinks: Vec::new(),
        })
    }

    /// Create one `candles_<period>.csv` file per period inside `dir`.
    ///
    /// Fails before any tick is processed if a file cannot be created.
    pub fn with_csv_sinks(self, dir: impl AsRef<Path>, write_header: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let sinks = self
            .periods
            .iter()
            .map(|&period| {
                CsvSink::create(dir, period, write_header).map(|s| Box::new(s) as Box<dyn CandleSink>)
            })
            .collect::<Result<Vec<_>>>()?;
        self.with_sinks(sinks)
    }

    /// Attach caller-provided sinks, one per period in configuration order.
    pub fn with_sinks(mut self, sinks: Vec<Box<dyn CandleSink>>) -> Result<Self> {
        if sinks.len() != self.periods.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "expected {} sinks, got {}",
                self.periods.len(),
                sinks.len()
            )));
        }
        self.sinks = sinks;
        Ok(self)
    }

    /// Run the pipeline over `ticks` until the stream ends and every stage has
    /// drained.
    ///
    /// Returns the first stage failure, after all stages have been joined.
    pub async fn handle<S>(self, ticks: S) -> Result<PipelineReport>
    where
        S: Stream<Item = Tick> + Send + 'static,
    {
        if self.sinks.len() != self.periods.len() {
            return Err(PipelineError::InvalidConfig("sinks must be attached before handling ticks".into()));
        }

        info!(
            periods = ?self.periods.iter().map(|p| p.name()).collect::<Vec<_>>(),
            topology = %self.topology,
            capacity = self.channel_capacity,
            "candle pipeline starting"
        );

        let (senders, receivers): (Vec<mpsc::Sender<Candle>>, Vec<mpsc::Receiver<Candle>>) =
            self.periods.iter().map(|_| mpsc::channel(self.channel_capacity)).unzip();

        // Chained: the normalizer feeds the first aggregator and aggregator i
        // feeds aggregator i + 1. Fan-out: the normalizer feeds everyone.
        let (normalizer_outputs, downstreams): (Vec<_>, Vec<Option<mpsc::Sender<Candle>>>) =
            match self.topology {
                PipelineTopology::Chained => {
                    let mut senders = senders.into_iter();
                    let first = senders.next().into_iter().collect();
                    (first, senders.map(Some).chain(iter::once(None)).collect())
                }
                PipelineTopology::FanOut => {
                    let n = senders.len();
                    (senders, iter::repeat_with(|| None).take(n).collect())
                }
            };

        let aggregators: Vec<(CandlePeriod, JoinHandle<Result<AggregatorStats>>)> = self
            .periods
            .iter()
            .copied()
            .zip(receivers)
            .zip(self.sinks)
            .zip(downstreams)
            .map(|(((period, input), sink), downstream)| {
                let task = tokio::spawn(aggregator::run_aggregator(period, input, sink, downstream));
                (period, task)
            })
            .collect();

        let normalizer = tokio::spawn(normalizer::run_normalizer(ticks, normalizer_outputs));

        let mut first_error: Option<PipelineError> = None;
        let mut note = |err: PipelineError| {
            error!(error = %err, "pipeline stage failed");
            if first_error.is_none() {
                first_error = Some(err);
            }
        };

        let ticks = match normalizer.await {
            Ok(n) => n,
            Err(e) => {
                note(PipelineError::Stage {
                    stage: "normalizer".into(),
                    reason: e.to_string(),
                });
                0
            }
        };

        let mut stats = Vec::with_capacity(aggregators.len());
        for (period, task) in aggregators {
            match task.await {
                Ok(Ok(s)) => stats.push(s),
                Ok(Err(e)) => note(e),
                Err(e) => note(PipelineError::Stage {
                    stage: format!("aggregator {period}"),
                    reason: e.to_string(),
                }),
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!(ticks, stages = stats.len(), "candle pipeline drained");
        Ok(PipelineReport { ticks, stats })
    }
}
