// =============================================================================
// Runtime Configuration — Pipeline settings with atomic save
// =============================================================================
//
// Every knob of the candle pipeline lives here. The file is plain JSON and all
// fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file.
//
// Environment overrides (applied after loading):
//   CANDLES_PERIODS     comma separated period names, e.g. "1m,5m,15m"
//   CANDLES_TICKERS     comma separated instruments for the generator
//   CANDLES_OUTPUT_DIR  directory receiving the candles_<period>.csv files
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::{CandlePeriod, GeneratorConfig};
use crate::pipeline::{validate_periods, PipelineTopology};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_periods() -> Vec<CandlePeriod> {
    vec![
        CandlePeriod::OneMinute,
        CandlePeriod::TwoMinutes,
        CandlePeriod::TenMinutes,
    ]
}

fn default_channel_capacity() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Aggregation -------------------------------------------------------

    /// Periods to aggregate, finest first. Unknown names fail the load.
    #[serde(default = "default_periods")]
    pub periods: Vec<CandlePeriod>,

    /// Whether each period consumes the previous one or the raw ticks.
    #[serde(default)]
    pub topology: PipelineTopology,

    /// Capacity of every hand-off channel between stages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    // --- Output ------------------------------------------------------------

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Write a column header as the first row of each CSV file.
    #[serde(default)]
    pub write_header: bool,

    // --- Tick source -------------------------------------------------------

    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            periods: default_periods(),
            topology: PipelineTopology::default(),
            channel_capacity: default_channel_capacity(),
            output_dir: default_output_dir(),
            write_header: false,
            generator: GeneratorConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Fails if the file cannot be read or parsed, including when it names an
    /// unknown period.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            periods = ?config.periods,
            topology = %config.topology,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Load `path`, or write the defaults there if it does not exist yet so
    /// the next run has a file to edit.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(path = %path.display(), "config file not found, writing defaults");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Apply `CANDLES_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("CANDLES_PERIODS") {
            self.periods = split_list(&raw)
                .map(|name| name.parse::<CandlePeriod>())
                .collect::<std::result::Result<_, _>>()
                .context("invalid CANDLES_PERIODS")?;
        }
        if let Some(raw) = lookup("CANDLES_TICKERS") {
            let tickers: Vec<String> = split_list(&raw).map(|s| s.to_uppercase()).collect();
            if !tickers.is_empty() {
                self.generator.tickers = tickers;
            }
        }
        if let Some(dir) = lookup("CANDLES_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run.
    pub fn validate(&self) -> Result<()> {
        validate_periods(&self.periods, self.topology)?;
        anyhow::ensure!(self.channel_capacity > 0, "channel_capacity must be at least 1");
        anyhow::ensure!(!self.generator.tickers.is_empty(), "generator needs at least one ticker");
        Ok(())
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(
            cfg.periods,
            vec![CandlePeriod::OneMinute, CandlePeriod::TwoMinutes, CandlePeriod::TenMinutes]
        );
        assert_eq!(cfg.topology, PipelineTopology::Chained);
        assert_eq!(cfg.channel_capacity, 1);
        assert_eq!(cfg.output_dir, PathBuf::from("."));
        assert!(!cfg.write_header);
        assert_eq!(cfg.generator.tickers.len(), 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.periods.len(), 3);
        assert_eq!(cfg.generator.delay_ms, 500);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "periods": ["5m", "15m"], "topology": "fan_out", "generator": { "tickers": ["BTC"] } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.periods, vec![CandlePeriod::FiveMinutes, CandlePeriod::FifteenMinutes]);
        assert_eq!(cfg.topology, PipelineTopology::FanOut);
        assert_eq!(cfg.generator.tickers, vec!["BTC"]);
        assert_eq!(cfg.generator.delay_ms, 500);
        assert_eq!(cfg.channel_capacity, 1);
    }

    #[test]
    fn unknown_period_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles_config.json");
        std::fs::write(&path, r#"{ "periods": ["1m", "3m"] }"#).unwrap();
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("3m"), "{err:#}");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles_config.json");
        let mut cfg = RuntimeConfig::default();
        cfg.periods = vec![CandlePeriod::OneMinute, CandlePeriod::OneHour];
        cfg.write_header = true;
        cfg.save(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let back = RuntimeConfig::load(&path).unwrap();
        assert_eq!(back.periods, cfg.periods);
        assert!(back.write_header);
    }

    #[test]
    fn load_or_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles_config.json");

        let cfg = RuntimeConfig::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.periods, default_periods());

        // An existing file is loaded, never overwritten.
        std::fs::write(&path, r#"{ "periods": ["5m"], "write_header": true }"#).unwrap();
        let cfg = RuntimeConfig::load_or_init(&path).unwrap();
        assert_eq!(cfg.periods, vec![CandlePeriod::FiveMinutes]);
        assert!(cfg.write_header);
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("5m"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RuntimeConfig::load(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CANDLES_PERIODS", "1m, 5m ,15m"),
            ("CANDLES_TICKERS", "btc,eth,"),
            ("CANDLES_OUTPUT_DIR", "/tmp/bars"),
        ]
        .into_iter()
        .collect();

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(
            cfg.periods,
            vec![CandlePeriod::OneMinute, CandlePeriod::FiveMinutes, CandlePeriod::FifteenMinutes]
        );
        assert_eq!(cfg.generator.tickers, vec!["BTC", "ETH"]);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/bars"));

        let mut cfg = RuntimeConfig::default();
        assert!(cfg.apply_overrides(|k| (k == "CANDLES_PERIODS").then(|| "1m,7m".to_string())).is_err());
    }

    #[test]
    fn validate_rejects_unaligned_chain() {
        let mut cfg = RuntimeConfig::default();
        cfg.periods = vec![CandlePeriod::TwoMinutes, CandlePeriod::FiveMinutes];
        assert!(cfg.validate().is_err());
        cfg.topology = PipelineTopology::FanOut;
        assert!(cfg.validate().is_ok());
        cfg.channel_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
