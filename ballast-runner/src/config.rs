//! Serializable bot configuration.
//!
//! One TOML file captures everything a run needs: the universe, the
//! strategy list with allocation budgets, portfolio limits, and the
//! feed/exchange/journal/snapshot sections. `run_id()` content-addresses
//! the configuration so journals and log lines from identical configs can
//! be correlated.

use ballast_core::rebalance::QuantityRounding;
use ballast_core::strategy::StrategyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unique identifier for a configuration (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("universe must not be empty")]
    EmptyUniverse,

    #[error("at least one strategy must be configured")]
    NoStrategies,

    #[error("strategy budget must be > 0 (got {0})")]
    BadBudget(f64),

    #[error("per_symbol_cap must be in (0, 1] (got {0})")]
    BadCap(f64),

    #[error("min_notional must be >= 0 (got {0})")]
    BadMinNotional(f64),

    #[error("interval_secs must be >= 1")]
    BadInterval,

    #[error("short exposure is not supported by the built-in strategies")]
    ShortsUnsupported,
}

/// One configured strategy with its allocation budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyEntry {
    /// Fraction of the portfolio this strategy's weights are scaled by.
    pub budget: f64,
    pub config: StrategyConfig,
}

/// Price feed section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub base_url: String,
    pub api_key: String,
    /// Candle interval requested from the feed.
    pub interval: String,
    /// Base assets the feed does not carry (answered locally as empty).
    pub skip_assets: Vec<String>,
    /// Backfill the opening range from the feed when the process started
    /// after the window closed.
    pub backfill_opening_range: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            interval: "15m".to_string(),
            skip_assets: Vec::new(),
            backfill_opening_range: true,
        }
    }
}

/// Exchange section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
}

/// CSV journal section. Unset paths disable that journal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub trades_path: Option<PathBuf>,
    pub equity_path: Option<PathBuf>,
}

/// Buffer snapshot section. Unset path disables persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub path: Option<PathBuf>,
    /// Rows older than this are dropped on reload.
    pub max_age_hours: i64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_age_hours: 48,
        }
    }
}

/// Full bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Trading pairs polled every cycle.
    pub universe: Vec<String>,

    /// Strategies with their allocation budgets, evaluated in order.
    pub strategies: Vec<StrategyEntry>,

    /// Seconds between cycle starts.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Log orders instead of submitting them.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Max observations retained per symbol.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Hard cap on any single symbol's |weight|.
    #[serde(default = "default_per_symbol_cap")]
    pub per_symbol_cap: f64,

    /// Orders with a smaller notional delta are skipped.
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,

    /// Short exposure switch. Must stay false — validation rejects true.
    #[serde(default)]
    pub allow_short: bool,

    /// Opening range computes only from data inside the anchored window.
    #[serde(default = "default_true")]
    pub strict_window_gating: bool,

    /// Order quantity rounding policy.
    #[serde(default)]
    pub rounding: QuantityRounding,

    /// How far back the first fetch for a cold symbol reaches.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,

    #[serde(default)]
    pub feed: FeedSettings,

    #[serde(default)]
    pub exchange: ExchangeSettings,

    #[serde(default)]
    pub journal: JournalSettings,

    #[serde(default)]
    pub snapshot: SnapshotSettings,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_buffer_capacity() -> usize {
    6000
}

fn default_per_symbol_cap() -> f64 {
    0.35
}

fn default_min_notional() -> f64 {
    5.0
}

fn default_lookback_hours() -> i64 {
    24
}

impl BotConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: BotConfig = toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.universe.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategies);
        }
        for entry in &self.strategies {
            if entry.budget <= 0.0 {
                return Err(ConfigError::BadBudget(entry.budget));
            }
        }
        if self.per_symbol_cap <= 0.0 || self.per_symbol_cap > 1.0 {
            return Err(ConfigError::BadCap(self.per_symbol_cap));
        }
        if self.min_notional < 0.0 {
            return Err(ConfigError::BadMinNotional(self.min_notional));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::BadInterval);
        }
        if self.allow_short {
            return Err(ConfigError::ShortsUnsupported);
        }
        Ok(())
    }

    /// Deterministic content hash of this configuration.
    ///
    /// Two runs with identical configs share a RunId, which ties their
    /// journals and log lines together.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).expect("BotConfig serialization failed");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }

    /// Strategies as `(config, budget)` pairs for the combiner.
    pub fn strategy_pairs(&self) -> Vec<(&StrategyConfig, f64)> {
        self.strategies
            .iter()
            .map(|e| (&e.config, e.budget))
            .collect()
    }

    /// Total allocation budget across strategies (useful in logs; the
    /// combiner renormalizes gross exposure regardless).
    pub fn total_budget(&self) -> f64 {
        self.strategies.iter().map(|e| e.budget).sum()
    }

    /// Symbol → budget-weighted strategy count, for the startup banner.
    pub fn summary(&self) -> HashMap<&'static str, usize> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for entry in &self.strategies {
            *counts.entry(entry.config.name()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::strategy::XsecMomentumParams;

    const SAMPLE: &str = r#"
        universe = ["BTC/USD", "ETH/USD"]
        per_symbol_cap = 0.35
        min_notional = 5.0
        interval_secs = 60

        [[strategies]]
        budget = 0.6
        [strategies.config]
        type = "range_breakout"
        allocation = 0.5
        max_r_pct = 0.01

        [[strategies]]
        budget = 0.4
        [strategies.config]
        type = "xsec_momentum"
        top_k = 2

        [feed]
        base_url = "https://feed.example.com/market/price"
        api_key = "test-key"

        [journal]
        equity_path = "logs/equity.csv"
    "#;

    fn sample() -> BotConfig {
        let config: BotConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn parses_sample_toml() {
        let config = sample();
        assert_eq!(config.universe.len(), 2);
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[0].budget, 0.6);
        assert_eq!(config.strategies[0].config.name(), "range_breakout");
        assert!(config.dry_run); // defaulted
        assert_eq!(config.buffer_capacity, 6000); // defaulted
        assert_eq!(config.rounding, QuantityRounding::Fractional);
        assert_eq!(
            config.journal.equity_path.as_deref(),
            Some(Path::new("logs/equity.csv"))
        );
        assert!(config.journal.trades_path.is_none());
    }

    #[test]
    fn run_id_is_deterministic_and_config_sensitive() {
        let a = sample();
        let b = sample();
        assert_eq!(a.run_id(), b.run_id());

        let mut c = sample();
        c.min_notional = 10.0;
        assert_ne!(a.run_id(), c.run_id());
    }

    #[test]
    fn rejects_empty_universe() {
        let mut config = sample();
        config.universe.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyUniverse));
    }

    #[test]
    fn rejects_zero_budget() {
        let mut config = sample();
        config.strategies[0].budget = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::BadBudget(0.0)));
    }

    #[test]
    fn rejects_out_of_range_cap() {
        let mut config = sample();
        config.per_symbol_cap = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::BadCap(1.5)));
    }

    #[test]
    fn rejects_shorting() {
        let mut config = sample();
        config.allow_short = true;
        assert_eq!(config.validate(), Err(ConfigError::ShortsUnsupported));
    }

    #[test]
    fn strategy_params_take_defaults() {
        let config = sample();
        match &config.strategies[1].config {
            StrategyConfig::XsecMomentum(p) => {
                assert_eq!(p.top_k, 2);
                assert_eq!(p.lookback_obs, XsecMomentumParams::default().lookback_obs);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
