//! Strategy trait, the tagged config registry, and shared weight helpers.
//!
//! A strategy is a per-symbol state machine (or a stateless ranker) that
//! turns the market buffer into desired weights. Each instance exclusively
//! owns its position/cooldown state; nothing is shared across instances, so
//! two configured copies of the same variant never interfere.
//!
//! Strategies never error: missing data means a symbol is simply absent
//! from the returned map, and absence is the universal "no exposure".

pub mod breakout_scalping;
pub mod momentum;
pub mod range_breakout;

pub use breakout_scalping::{BreakoutScalping, BreakoutScalpingParams};
pub use momentum::{XsecMomentum, XsecMomentumParams};
pub use range_breakout::{RangeBreakout, RangeBreakoutParams};

use crate::buffer::MarketBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A weight producer over the shared market buffer.
///
/// `target_weights` takes `&mut self` because entries, exits, and cooldowns
/// mutate the strategy's own state; it takes `&mut MarketBuffer` only for
/// the memoized opening-range cache — strategies never write observations.
pub trait Strategy {
    /// Short name used in log lines (e.g. "range_breakout").
    fn name(&self) -> &str;

    /// Desired signed weight per symbol for this cycle. Symbols absent from
    /// the map carry zero desired exposure.
    fn target_weights(
        &mut self,
        market: &mut MarketBuffer,
        prices: &HashMap<String, f64>,
        liquidity: &HashMap<String, f64>,
    ) -> HashMap<String, f64>;
}

/// Serializable strategy selector — one variant per strategy kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Opening-range breakdown/reclaim state machine.
    RangeBreakout(RangeBreakoutParams),

    /// Consolidation-breakout scalper with ATR stops and cooldowns.
    BreakoutScalping(BreakoutScalpingParams),

    /// Cross-sectional momentum top-K ranker.
    XsecMomentum(XsecMomentumParams),
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::RangeBreakout(_) => "range_breakout",
            StrategyConfig::BreakoutScalping(_) => "breakout_scalping",
            StrategyConfig::XsecMomentum(_) => "xsec_momentum",
        }
    }
}

/// Build a strategy instance from its config.
///
/// `per_symbol_cap` is the global cap every emitted weight is clamped to;
/// strategies also use it to bound their own entry allocations.
pub fn build(config: &StrategyConfig, per_symbol_cap: f64) -> Box<dyn Strategy> {
    match config {
        StrategyConfig::RangeBreakout(params) => {
            Box::new(RangeBreakout::new(params.clone(), per_symbol_cap))
        }
        StrategyConfig::BreakoutScalping(params) => {
            Box::new(BreakoutScalping::new(params.clone(), per_symbol_cap))
        }
        StrategyConfig::XsecMomentum(params) => {
            Box::new(XsecMomentum::new(params.clone(), per_symbol_cap))
        }
    }
}

/// Clamp every weight to `[-cap, cap]`; an all-but-zero map collapses to
/// empty. No renormalization here — gross de-leveraging is the combiner's
/// job.
pub fn cap_weights(mut weights: HashMap<String, f64>, cap: f64) -> HashMap<String, f64> {
    if weights.is_empty() {
        return weights;
    }
    for w in weights.values_mut() {
        *w = w.clamp(-cap, cap);
    }
    let gross: f64 = weights.values().map(|w| w.abs()).sum();
    if gross <= 1e-9 {
        return HashMap::new();
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_weights_clamps_both_sides() {
        let mut w = HashMap::new();
        w.insert("BTC/USD".to_string(), 0.9);
        w.insert("ETH/USD".to_string(), -0.7);
        let capped = cap_weights(w, 0.35);
        assert_eq!(capped["BTC/USD"], 0.35);
        assert_eq!(capped["ETH/USD"], -0.35);
    }

    #[test]
    fn cap_weights_zero_gross_collapses_to_empty() {
        let mut w = HashMap::new();
        w.insert("BTC/USD".to_string(), 1e-12);
        assert!(cap_weights(w, 0.35).is_empty());
        assert!(cap_weights(HashMap::new(), 0.35).is_empty());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let text = r#"
            type = "xsec_momentum"
            top_k = 3
        "#;
        let cfg: StrategyConfig = toml::from_str(text).unwrap();
        match &cfg {
            StrategyConfig::XsecMomentum(p) => {
                assert_eq!(p.top_k, 3);
                // Unspecified fields take their defaults.
                assert_eq!(p.lookback_obs, XsecMomentumParams::default().lookback_obs);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(cfg.name(), "xsec_momentum");
    }

    #[test]
    fn build_selects_the_right_variant() {
        let cfg = StrategyConfig::RangeBreakout(RangeBreakoutParams::default());
        assert_eq!(build(&cfg, 0.35).name(), "range_breakout");
        let cfg = StrategyConfig::BreakoutScalping(BreakoutScalpingParams::default());
        assert_eq!(build(&cfg, 0.35).name(), "breakout_scalping");
    }
}
