// =============================================================================
// Candle Periods — Aggregation granularities and epoch-aligned bucketing
// =============================================================================
//
// A period is fixed when the configuration is loaded. Names that do not map to
// a variant are rejected there, so bucketing itself can never fail.
//
// Bucketing:
//   bucket_start(P, t) = floor(t_ms / P_ms) * P_ms   (Unix epoch aligned)
//
// The bucket of `t` is the half-open interval [bucket_start, bucket_start + P).
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Supported aggregation granularities, ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CandlePeriod {
    OneMinute,
    TwoMinutes,
    FiveMinutes,
    TenMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    FourHours,
    OneDay,
}

impl CandlePeriod {
    pub const ALL: [CandlePeriod; 9] = [
        Self::OneMinute,
        Self::TwoMinutes,
        Self::FiveMinutes,
        Self::TenMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// Short name used in configuration and output file names.
    pub const fn name(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::TwoMinutes => "2m",
            Self::FiveMinutes => "5m",
            Self::TenMinutes => "10m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    pub const fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::TwoMinutes => 120,
            Self::FiveMinutes => 300,
            Self::TenMinutes => 600,
            Self::FifteenMinutes => 900,
            Self::ThirtyMinutes => 1_800,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Start of the bucket containing `ts`.
    ///
    /// Uses euclidean division so instants before the epoch still floor
    /// towards negative infinity.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let period_ms = self.seconds() * 1_000;
        let start_ms = ts.timestamp_millis().div_euclid(period_ms) * period_ms;
        DateTime::<Utc>::from_timestamp_millis(start_ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// True when every bucket of `self` is an exact union of buckets of `finer`.
    pub const fn is_multiple_of(self, finer: CandlePeriod) -> bool {
        self.seconds() % finer.seconds() == 0
    }
}

impl fmt::Display for CandlePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CandlePeriod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| PipelineError::UnknownPeriod(s.to_string()))
    }
}

impl TryFrom<String> for CandlePeriod {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CandlePeriod> for String {
    fn from(period: CandlePeriod) -> Self {
        period.name().to_string()
    }
}
