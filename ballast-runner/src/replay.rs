//! Backtest replay — a thin consumer of the live pipeline.
//!
//! Reads recorded `timestamp,symbol,price,volume` rows, groups consecutive
//! rows sharing a timestamp into one tick batch, and drives the exact same
//! buffer → combiner → rebalancer path as the live loop. Fills are
//! simulated frictionlessly at the last price. There are no separate
//! backtest semantics to drift out of sync.

use anyhow::{bail, Context, Result};
use ballast_core::buffer::MarketBuffer;
use ballast_core::combiner::StrategyCombiner;
use ballast_core::data::normalize_timestamp;
use ballast_core::domain::{Observation, OrderSide};
use ballast_core::rebalance::{apply_fills, rebalance_orders};
use ballast_core::strategy;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::config::BotConfig;

#[derive(Debug, Deserialize)]
struct TickRow {
    timestamp: String,
    symbol: String,
    price: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug)]
pub struct ReplayOutcome {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub cycles: usize,
    pub orders_filled: usize,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl ReplayOutcome {
    pub fn total_return(&self) -> f64 {
        self.final_equity / self.initial_capital - 1.0
    }
}

struct ReplayState {
    market: MarketBuffer,
    combiner: StrategyCombiner,
    cash: f64,
    positions: HashMap<String, f64>,
}

/// Replay a recorded tick file through the pipeline.
pub fn replay_csv(
    config: &BotConfig,
    data_path: &Path,
    initial_capital: f64,
) -> Result<ReplayOutcome> {
    if initial_capital <= 0.0 {
        bail!("initial capital must be > 0");
    }

    let mut reader = csv::Reader::from_path(data_path)
        .with_context(|| format!("failed to open tick file {}", data_path.display()))?;

    let mut combiner = StrategyCombiner::new(config.per_symbol_cap);
    for (strategy_config, budget) in config.strategy_pairs() {
        combiner.push(
            strategy::build(strategy_config, config.per_symbol_cap),
            budget,
        );
    }
    let mut state = ReplayState {
        market: MarketBuffer::new(config.buffer_capacity)
            .with_window_gating(config.strict_window_gating),
        combiner,
        cash: initial_capital,
        positions: HashMap::new(),
    };

    let mut outcome = ReplayOutcome {
        initial_capital,
        final_equity: initial_capital,
        cycles: 0,
        orders_filled: 0,
        equity_curve: Vec::new(),
    };

    let mut batch: Vec<(DateTime<Utc>, TickRow)> = Vec::new();
    let mut batch_key: Option<String> = None;

    for record in reader.deserialize() {
        let row: TickRow = record.context("malformed tick row")?;
        let Some(ts) = normalize_timestamp(&serde_json::Value::String(row.timestamp.clone()))
        else {
            debug!(timestamp = %row.timestamp, "unparseable timestamp, row dropped");
            continue;
        };
        if batch_key.as_deref() != Some(row.timestamp.as_str()) {
            if !batch.is_empty() {
                step(config, &mut state, &mut outcome, std::mem::take(&mut batch));
            }
            batch_key = Some(row.timestamp.clone());
        }
        batch.push((ts, row));
    }
    if !batch.is_empty() {
        step(config, &mut state, &mut outcome, batch);
    }

    info!(
        cycles = outcome.cycles,
        orders = outcome.orders_filled,
        final_equity = outcome.final_equity,
        "replay finished"
    );
    Ok(outcome)
}

/// One simulated cycle over a same-timestamp batch of ticks.
fn step(
    config: &BotConfig,
    state: &mut ReplayState,
    outcome: &mut ReplayOutcome,
    batch: Vec<(DateTime<Utc>, TickRow)>,
) {
    let cycle_ts = batch[0].0;
    for (ts, row) in batch {
        state
            .market
            .append(&row.symbol, Observation::new(ts, row.price, row.volume));
    }

    let prices = state.market.latest_prices();
    let liquidity = state.market.latest_liquidity();
    let weights = state
        .combiner
        .combine(&mut state.market, &prices, &liquidity);

    let equity = mark_to_market(state, &prices);
    if !weights.is_empty() {
        let orders = rebalance_orders(
            &state.positions,
            &prices,
            &weights,
            equity,
            config.min_notional,
            config.rounding,
        );
        for order in &orders {
            // Prices for every order are known here: liquidations only
            // exist for symbols the buffer has seen.
            let price = prices.get(&order.symbol).copied().unwrap_or(0.0);
            match order.side {
                OrderSide::Buy => state.cash -= order.quantity * price,
                OrderSide::Sell => state.cash += order.quantity * price,
            }
        }
        apply_fills(&mut state.positions, &orders);
        outcome.orders_filled += orders.len();
    }

    let equity = mark_to_market(state, &prices);
    outcome.cycles += 1;
    outcome.final_equity = equity;
    outcome.equity_curve.push((cycle_ts, equity));
}

fn mark_to_market(state: &ReplayState, prices: &HashMap<String, f64>) -> f64 {
    let held: f64 = state
        .positions
        .iter()
        .map(|(sym, qty)| qty * prices.get(sym).copied().unwrap_or(0.0))
        .sum();
    state.cash + held
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn momentum_config() -> BotConfig {
        let text = r#"
            universe = ["BTC/USD", "ETH/USD"]

            [[strategies]]
            budget = 1.0
            [strategies.config]
            type = "xsec_momentum"
            top_k = 1
        "#;
        let config: BotConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        config
    }

    fn write_ticks(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("ticks.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,symbol,price,volume").unwrap();
        // Ten minutes of data: BTC trends up, ETH stays flat.
        for i in 0..10 {
            let ts = format!("2024-01-10T12:{i:02}:00Z");
            let btc = 100.0 + i as f64;
            writeln!(file, "{ts},BTC/USD,{btc},50").unwrap();
            writeln!(file, "{ts},ETH/USD,100.0,50").unwrap();
        }
        path
    }

    #[test]
    fn replay_runs_every_tick_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ticks(dir.path());
        let outcome = replay_csv(&momentum_config(), &path, 10_000.0).unwrap();
        assert_eq!(outcome.cycles, 10);
        assert_eq!(outcome.equity_curve.len(), 10);
    }

    #[test]
    fn replay_profits_from_a_clean_trend() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ticks(dir.path());
        let outcome = replay_csv(&momentum_config(), &path, 10_000.0).unwrap();
        // Momentum buys BTC once six observations exist, then the trend
        // keeps paying.
        assert!(outcome.orders_filled >= 1);
        assert!(outcome.final_equity > outcome.initial_capital);
        assert!(outcome.total_return() > 0.0);
    }

    #[test]
    fn replay_rejects_nonpositive_capital() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ticks(dir.path());
        assert!(replay_csv(&momentum_config(), &path, 0.0).is_err());
    }

    #[test]
    fn replay_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.csv");
        assert!(replay_csv(&momentum_config(), &missing, 1_000.0).is_err());
    }
}
