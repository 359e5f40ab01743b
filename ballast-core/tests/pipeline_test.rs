//! End-to-end pipeline test over the core: buffer → strategies → combiner
//! → rebalancer, using a synthetic two-symbol tape.

use std::collections::HashMap;

use ballast_core::buffer::MarketBuffer;
use ballast_core::combiner::StrategyCombiner;
use ballast_core::domain::{Observation, OrderSide};
use ballast_core::rebalance::{apply_fills, rebalance_orders, QuantityRounding};
use ballast_core::strategy::{
    self, RangeBreakoutParams, StrategyConfig, XsecMomentumParams,
};
use chrono::{DateTime, TimeZone, Utc};

const CAP: f64 = 0.35;

// January dates: EST, opening window = 05:00–09:00 UTC.
fn utc(h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, h, mi, 0).unwrap()
}

fn build_combiner() -> StrategyCombiner {
    let range = StrategyConfig::RangeBreakout(RangeBreakoutParams::default());
    let momentum = StrategyConfig::XsecMomentum(XsecMomentumParams {
        top_k: 1,
        ..XsecMomentumParams::default()
    });
    let mut combiner = StrategyCombiner::new(CAP);
    combiner.push(strategy::build(&range, CAP), 0.6);
    combiner.push(strategy::build(&momentum, CAP), 0.4);
    combiner
}

/// Feed one tick for both symbols and run the combiner, like one live cycle.
fn cycle(
    market: &mut MarketBuffer,
    combiner: &mut StrategyCombiner,
    ts: DateTime<Utc>,
    btc: f64,
    eth: f64,
) -> HashMap<String, f64> {
    market.append("BTC/USD", Observation::new(ts, btc, 100.0));
    market.append("ETH/USD", Observation::new(ts, eth, 100.0));
    let prices = market.latest_prices();
    let liquidity = market.latest_liquidity();
    combiner.combine(market, &prices, &liquidity)
}

#[test]
fn pipeline_produces_bounded_weights_and_idempotent_orders() {
    let mut market = MarketBuffer::new(1000);
    let mut combiner = build_combiner();

    // Opening window: BTC ranges 100..102, ETH drifts around 2000.
    for (i, minutes) in [0u32, 30, 60, 90].iter().enumerate() {
        let ts = utc(6, 0) + chrono::Duration::minutes(*minutes as i64);
        cycle(&mut market, &mut combiner, ts, 100.0 + i as f64 % 3.0, 2000.0);
    }

    // Post-window tape: BTC breaks below 100, then reclaims; ETH trends up.
    let mut weights = HashMap::new();
    let script = [
        (utc(9, 30), 95.0, 2005.0),
        (utc(9, 35), 101.0, 2010.0),
        (utc(9, 40), 101.5, 2015.0),
    ];
    for (ts, btc, eth) in script {
        weights = cycle(&mut market, &mut combiner, ts, btc, eth);
    }

    // Range breakout holds BTC at 0.6 * 0.5 = 0.30; momentum adds
    // 0.4 * min(1.0, cap)…  capped per symbol either way.
    assert!(!weights.is_empty());
    let gross: f64 = weights.values().map(|w| w.abs()).sum();
    assert!(gross <= 1.0 + 1e-9);
    for w in weights.values() {
        assert!(w.abs() <= CAP + 1e-9);
    }
    assert!(weights.contains_key("BTC/USD"));

    // Rebalance an empty book into the targets, fill, and verify the second
    // pass is a no-op.
    let prices = market.latest_prices();
    let mut positions: HashMap<String, f64> = HashMap::new();
    let equity = 50_000.0;
    let orders = rebalance_orders(
        &positions,
        &prices,
        &weights,
        equity,
        5.0,
        QuantityRounding::Fractional,
    );
    assert!(!orders.is_empty());
    for order in &orders {
        assert_eq!(order.side, OrderSide::Buy);
        assert!(order.quantity > 0.0);
    }
    apply_fills(&mut positions, &orders);

    let again = rebalance_orders(
        &positions,
        &prices,
        &weights,
        equity,
        5.0,
        QuantityRounding::Fractional,
    );
    assert!(again.is_empty(), "second rebalance should be a no-op: {again:?}");
}

#[test]
fn dropped_symbols_are_liquidated_next_cycle() {
    let mut market = MarketBuffer::new(1000);
    let mut combiner = build_combiner();

    // Warm up enough for momentum (six observations per symbol).
    for i in 0..6u32 {
        cycle(
            &mut market,
            &mut combiner,
            utc(12, i * 5),
            100.0 + i as f64,
            2000.0,
        );
    }
    let weights = cycle(&mut market, &mut combiner, utc(12, 30), 107.0, 2000.0);
    assert!(weights.contains_key("BTC/USD"));

    // Suppose we hold a symbol the combiner no longer wants.
    let positions = HashMap::from([("DOGE/USD".to_string(), 500.0)]);
    let prices = market.latest_prices();
    let orders = rebalance_orders(
        &positions,
        &prices,
        &weights,
        10_000.0,
        5.0,
        QuantityRounding::Fractional,
    );
    let doge = orders
        .iter()
        .find(|o| o.symbol == "DOGE/USD")
        .expect("dropped symbol must be closed");
    assert_eq!(doge.side, OrderSide::Sell);
    assert_eq!(doge.quantity, 500.0);
}

#[test]
fn opening_range_cache_survives_extra_ticks() {
    let mut market = MarketBuffer::new(1000);
    market.append("BTC/USD", Observation::new(utc(6, 0), 100.0, 1.0));
    market.append("BTC/USD", Observation::new(utc(7, 0), 104.0, 1.0));
    market.append("BTC/USD", Observation::new(utc(9, 30), 103.0, 1.0));
    let first = market.opening_range("BTC/USD").unwrap();
    assert_eq!(first.low, 100.0);
    assert_eq!(first.high, 104.0);

    // A straggler printed inside the window arrives late: the cached range
    // must not move.
    market.append("BTC/USD", Observation::new(utc(8, 0), 90.0, 1.0));
    market.append("BTC/USD", Observation::new(utc(9, 45), 103.5, 1.0));
    assert_eq!(market.opening_range("BTC/USD").unwrap(), first);
}
