// =============================================================================
// Shared types used across the candle pipeline
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::CandlePeriod;

/// One observed price for one instrument at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub value: f64,
    pub ts: DateTime<Utc>,
}

impl Tick {
    pub fn new(instrument: impl Into<String>, value: f64, ts: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.into(),
            value,
            ts,
        }
    }
}

/// OHLC bar for one instrument.
///
/// `period == None` marks a degenerate candle built from a single tick, in
/// which case `ts` is the observation instant. For aggregated candles `ts` is
/// the start of the bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub period: Option<CandlePeriod>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ts: DateTime<Utc>,
}

impl Candle {
    /// Represent a tick as a single-point candle (open = high = low = close).
    pub fn from_tick(tick: &Tick) -> Self {
        Self {
            instrument: tick.instrument.clone(),
            period: None,
            open: tick.value,
            high: tick.value,
            low: tick.value,
            close: tick.value,
            ts: tick.ts,
        }
    }

    /// First candle of a bucket: copies the OHLC values and stamps the bucket.
    pub fn opened(first: &Candle, period: CandlePeriod, bucket_start: DateTime<Utc>) -> Self {
        Self {
            instrument: first.instrument.clone(),
            period: Some(period),
            open: first.open,
            high: first.high,
            low: first.low,
            close: first.close,
            ts: bucket_start,
        }
    }

    /// Fold a later candle of the same instrument and bucket into `self`.
    ///
    /// `open` is kept, `close` is taken from `next`, and `high`/`low` track the
    /// running extremes. The operation is associative, which is what allows a
    /// coarse period to consume already-aggregated finer candles.
    pub fn merge(&mut self, next: &Candle) {
        self.high = self.high.max(next.high);
        self.low = self.low.min(next.low);
        self.close = next.close;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn tick_becomes_flat_candle() {
        let c = Candle::from_tick(&Tick::new("AAPL", 101.5, at(30)));
        assert_eq!(c.instrument, "AAPL");
        assert_eq!(c.period, None);
        assert_eq!((c.open, c.high, c.low, c.close), (101.5, 101.5, 101.5, 101.5));
        assert_eq!(c.ts, at(30));
    }

    #[test]
    fn merge_tracks_extremes_and_close() {
        let first = Candle::from_tick(&Tick::new("SBER", 100.0, at(0)));
        let mut bar = Candle::opened(&first, CandlePeriod::OneMinute, at(0));
        for v in [102.0, 99.0, 101.0] {
            bar.merge(&Candle::from_tick(&Tick::new("SBER", v, at(10))));
        }
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 102.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.period, Some(CandlePeriod::OneMinute));
        assert_eq!(bar.ts, at(0));
    }

    #[test]
    fn merging_bars_equals_merging_ticks() {
        let values = [10.0, 12.0, 9.0, 11.0, 15.0, 8.0, 13.0];
        let ticks: Vec<Candle> = values
            .iter()
            .map(|&v| Candle::from_tick(&Tick::new("NVDA", v, at(0))))
            .collect();

        let mut direct = Candle::opened(&ticks[0], CandlePeriod::TwoMinutes, at(0));
        ticks[1..].iter().for_each(|t| direct.merge(t));

        let mut left = Candle::opened(&ticks[0], CandlePeriod::OneMinute, at(0));
        ticks[1..3].iter().for_each(|t| left.merge(t));
        let mut right = Candle::opened(&ticks[3], CandlePeriod::OneMinute, at(0));
        ticks[4..].iter().for_each(|t| right.merge(t));

        let mut chained = Candle::opened(&left, CandlePeriod::TwoMinutes, at(0));
        chained.merge(&right);

        assert_eq!(chained, direct);
    }
}
