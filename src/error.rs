// =============================================================================
// Pipeline errors
// =============================================================================
//
// Every variant is fatal for the pipeline. Nothing here is retried: a partial
// retry would merge the same ticks twice.
// =============================================================================

use thiserror::Error;

use crate::market_data::CandlePeriod;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A period name that is not one of the supported granularities.
    #[error("unknown candle period: {0:?}")]
    UnknownPeriod(String),

    /// The period list cannot be turned into a valid aggregation chain.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The sink for a period could not be created or written to.
    #[error("sink for period {period} failed: {source}")]
    Sink {
        period: CandlePeriod,
        #[source]
        source: SinkFailure,
    },

    /// A stage task panicked or was aborted.
    #[error("pipeline stage {stage} did not finish: {reason}")]
    Stage { stage: String, reason: String },
}

/// Underlying cause of a sink failure.
#[derive(Error, Debug)]
pub enum SinkFailure {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn sink(period: CandlePeriod, source: impl Into<SinkFailure>) -> Self {
        Self::Sink {
            period,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
