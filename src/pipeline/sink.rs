// =============================================================================
// Candle Sinks — Durable per-period output
// =============================================================================
//
// Each aggregator owns exactly one sink and writes to it synchronously from its
// own task. A record is flushed before the call returns, so a crash can only
// lose the record being written. Any failure is fatal for the pipeline.
//
// Row layout (no quoting needed for tickers):
//   instrument,timestamp,open,high,low,close
// =============================================================================

use std::fs::File;
use std::path::Path;
#[cfg(test)]
use std::sync::Arc;

use chrono::SecondsFormat;
#[cfg(test)]
use parking_lot::Mutex;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::market_data::CandlePeriod;
use crate::types::Candle;

/// Destination for finalized candles of one period.
pub trait CandleSink: Send {
    /// Append one candle and make it durable before returning.
    fn write(&mut self, candle: &Candle) -> Result<()>;
}

/// File name used for the output of `period`.
pub fn csv_file_name(period: CandlePeriod) -> String {
    format!("candles_{period}.csv")
}

// ---------------------------------------------------------------------------
// CSV file sink
// ---------------------------------------------------------------------------

pub struct CsvSink {
    period: CandlePeriod,
    writer: csv::Writer<File>,
}

impl CsvSink {
    /// Create (or truncate) `candles_<period>.csv` inside `dir`.
    ///
    /// The directory is created if it does not exist yet.
    pub fn create(dir: impl AsRef<Path>, period: CandlePeriod, write_header: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::sink(period, e))?;

        let path = dir.join(csv_file_name(period));
        let file = File::create(&path).map_err(|e| PipelineError::sink(period, e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if write_header {
            writer
                .write_record(["instrument", "timestamp", "open", "high", "low", "close"])
                .map_err(|e| PipelineError::sink(period, e))?;
            writer.flush().map_err(|e| PipelineError::sink(period, e))?;
        }

        info!(period = %period, path = %path.display(), "candle sink created");
        Ok(Self { period, writer })
    }
}

impl CandleSink for CsvSink {
    fn write(&mut self, candle: &Candle) -> Result<()> {
        let period = self.period;
        self.writer
            .write_record([
                candle.instrument.clone(),
                candle.ts.to_rfc3339_opts(SecondsFormat::Secs, true),
                candle.open.to_string(),
                candle.high.to_string(),
                candle.low.to_string(),
                candle.close.to_string(),
            ])
            .map_err(|e| PipelineError::sink(period, e))?;
        self.writer.flush().map_err(|e| PipelineError::sink(period, e))
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Records candles in a shared vector. Clones share the same storage, so a
/// test can keep one clone and hand the other to the pipeline.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemorySink {
    candles: Arc<Mutex<Vec<Candle>>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far, in write order.
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.candles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.lock().is_empty()
    }
}

#[cfg(test)]
impl CandleSink for MemorySink {
    fn write(&mut self, candle: &Candle) -> Result<()> {
        self.candles.lock().push(candle.clone());
        Ok(())
    }
}
