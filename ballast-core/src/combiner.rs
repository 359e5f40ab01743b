//! Strategy combiner — blends per-strategy weights under an allocation
//! budget and a per-symbol exposure cap.
//!
//! Each configured strategy gets a budget fraction; its weights are scaled
//! by that budget and summed per symbol (a symbol picked twice gets the
//! sum). The blended map is then clamped to `[-cap, cap]` per symbol and,
//! if gross exposure exceeds 1, divided through by the gross (proportional
//! de-leveraging). The combination is a commutative sum, so strategy order
//! only affects log output.

use crate::buffer::MarketBuffer;
use crate::strategy::Strategy;
use std::collections::HashMap;
use tracing::debug;

/// Gross exposure below this is treated as all-flat.
const GROSS_FLOOR: f64 = 1e-12;

/// How many picks per strategy the debug breakdown logs.
const BREAKDOWN_TOP_N: usize = 5;

pub struct StrategyCombiner {
    entries: Vec<(Box<dyn Strategy>, f64)>,
    per_symbol_cap: f64,
}

impl StrategyCombiner {
    pub fn new(per_symbol_cap: f64) -> Self {
        assert!(
            per_symbol_cap > 0.0 && per_symbol_cap <= 1.0,
            "per-symbol cap must be in (0, 1]"
        );
        Self {
            entries: Vec::new(),
            per_symbol_cap,
        }
    }

    /// Register a strategy with its allocation budget (fraction of equity
    /// this strategy's weights are scaled by).
    pub fn push(&mut self, strategy: Box<dyn Strategy>, budget: f64) {
        assert!(budget > 0.0, "strategy budget must be > 0");
        self.entries.push((strategy, budget));
    }

    pub fn per_symbol_cap(&self) -> f64 {
        self.per_symbol_cap
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Blend all strategies into one target weight map.
    pub fn combine(
        &mut self,
        market: &mut MarketBuffer,
        prices: &HashMap<String, f64>,
        liquidity: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        let mut total: HashMap<String, f64> = HashMap::new();

        for (strategy, budget) in &mut self.entries {
            let weights = strategy.target_weights(market, prices, liquidity);
            log_breakdown(strategy.name(), &weights);
            for (symbol, w) in weights {
                *total.entry(symbol).or_insert(0.0) += *budget * w;
            }
        }

        for w in total.values_mut() {
            *w = w.clamp(-self.per_symbol_cap, self.per_symbol_cap);
        }
        let gross: f64 = total.values().map(|w| w.abs()).sum();
        if gross <= GROSS_FLOOR {
            return HashMap::new();
        }
        if gross > 1.0 {
            for w in total.values_mut() {
                *w /= gross;
            }
        }
        log_breakdown("combined", &total);
        total
    }
}

fn log_breakdown(name: &str, weights: &HashMap<String, f64>) {
    if weights.is_empty() {
        debug!(strategy = name, "no picks");
        return;
    }
    let mut picks: Vec<(&String, f64)> = weights.iter().map(|(s, w)| (s, *w)).collect();
    picks.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    picks.truncate(BREAKDOWN_TOP_N);
    let rendered: Vec<String> = picks
        .iter()
        .map(|(s, w)| format!("{s}:{w:+.3}"))
        .collect();
    debug!(strategy = name, picks = %rendered.join(", "), "top picks");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test stub: always wants the same weights.
    struct FixedWeights(HashMap<String, f64>);

    impl FixedWeights {
        fn of(pairs: &[(&str, f64)]) -> Box<dyn Strategy> {
            Box::new(Self(
                pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect(),
            ))
        }
    }

    impl Strategy for FixedWeights {
        fn name(&self) -> &str {
            "fixed"
        }

        fn target_weights(
            &mut self,
            _market: &mut MarketBuffer,
            _prices: &HashMap<String, f64>,
            _liquidity: &HashMap<String, f64>,
        ) -> HashMap<String, f64> {
            self.0.clone()
        }
    }

    fn combine(combiner: &mut StrategyCombiner) -> HashMap<String, f64> {
        let mut market = MarketBuffer::new(10);
        combiner.combine(&mut market, &HashMap::new(), &HashMap::new())
    }

    #[test]
    fn budgets_scale_and_overlaps_sum() {
        let mut combiner = StrategyCombiner::new(0.35);
        combiner.push(FixedWeights::of(&[("BTC/USD", 0.5), ("ETH/USD", 0.2)]), 0.6);
        combiner.push(FixedWeights::of(&[("BTC/USD", 0.1)]), 0.4);
        let w = combine(&mut combiner);
        // BTC: 0.6*0.5 + 0.4*0.1 = 0.34; ETH: 0.6*0.2 = 0.12.
        assert!((w["BTC/USD"] - 0.34).abs() < 1e-12);
        assert!((w["ETH/USD"] - 0.12).abs() < 1e-12);
    }

    #[test]
    fn per_symbol_cap_clamps() {
        let mut combiner = StrategyCombiner::new(0.35);
        combiner.push(FixedWeights::of(&[("BTC/USD", 1.0)]), 1.0);
        let w = combine(&mut combiner);
        assert_eq!(w["BTC/USD"], 0.35);
    }

    #[test]
    fn gross_above_one_deleverages_proportionally() {
        let mut combiner = StrategyCombiner::new(0.5);
        combiner.push(
            FixedWeights::of(&[("BTC/USD", 0.5), ("ETH/USD", 0.5), ("SOL/USD", 0.5)]),
            1.0,
        );
        let w = combine(&mut combiner);
        let gross: f64 = w.values().map(|x| x.abs()).sum();
        assert!((gross - 1.0).abs() < 1e-12);
        for v in w.values() {
            assert!((v - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn gross_at_or_below_one_is_untouched() {
        let mut combiner = StrategyCombiner::new(0.5);
        combiner.push(FixedWeights::of(&[("BTC/USD", 0.4), ("ETH/USD", 0.3)]), 1.0);
        let w = combine(&mut combiner);
        assert_eq!(w["BTC/USD"], 0.4);
        assert_eq!(w["ETH/USD"], 0.3);
    }

    #[test]
    fn all_flat_collapses_to_empty() {
        let mut combiner = StrategyCombiner::new(0.35);
        combiner.push(FixedWeights::of(&[]), 0.6);
        combiner.push(FixedWeights::of(&[("BTC/USD", 1e-14)]), 0.4);
        assert!(combine(&mut combiner).is_empty());
    }

    #[test]
    fn strategy_order_does_not_change_result() {
        let mut forward = StrategyCombiner::new(0.35);
        forward.push(FixedWeights::of(&[("BTC/USD", 0.5), ("ETH/USD", 0.2)]), 0.6);
        forward.push(FixedWeights::of(&[("BTC/USD", 0.3), ("SOL/USD", 0.4)]), 0.4);

        let mut reversed = StrategyCombiner::new(0.35);
        reversed.push(FixedWeights::of(&[("BTC/USD", 0.3), ("SOL/USD", 0.4)]), 0.4);
        reversed.push(FixedWeights::of(&[("BTC/USD", 0.5), ("ETH/USD", 0.2)]), 0.6);

        let a = combine(&mut forward);
        let b = combine(&mut reversed);
        assert_eq!(a.len(), b.len());
        for (sym, w) in &a {
            assert!((w - b[sym]).abs() < 1e-12);
        }
    }

    #[test]
    #[should_panic(expected = "per-symbol cap must be in (0, 1]")]
    fn rejects_zero_cap() {
        StrategyCombiner::new(0.0);
    }

    #[test]
    #[should_panic(expected = "strategy budget must be > 0")]
    fn rejects_zero_budget() {
        let mut combiner = StrategyCombiner::new(0.35);
        combiner.push(FixedWeights::of(&[]), 0.0);
    }
}
