//! Rebalancer — diff target weights against holdings into a minimal,
//! notional-filtered order list.
//!
//! Two passes:
//! 1. Liquidation: symbols held but absent from the target map are fully
//!    closed. Absence means "no desired exposure", never "leave as is".
//! 2. Adjustment: per target symbol, the notional delta versus the current
//!    position sizes a buy or sell; deltas under the minimum notional are
//!    skipped to avoid churning on tiny drifts.
//!
//! Quantity rounding is a configuration choice applied at exactly one
//! point; an order whose quantity rounds to zero or below is dropped.

use crate::domain::{OrderSide, RebalanceOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// How order quantities are rounded before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityRounding {
    /// Fractional quantities pass through untouched.
    #[default]
    Fractional,
    /// Quantities are floored to whole units.
    WholeUnits,
}

impl QuantityRounding {
    fn apply(&self, quantity: f64) -> f64 {
        match self {
            QuantityRounding::Fractional => quantity,
            QuantityRounding::WholeUnits => quantity.floor(),
        }
    }
}

/// Compute the order list that moves the portfolio toward the target.
///
/// Symbols with no known price are skipped entirely — an order cannot be
/// sized safely without one. Output is sorted by symbol (liquidations
/// first) so logs and tests are deterministic.
pub fn rebalance_orders(
    current_positions: &HashMap<String, f64>,
    prices: &HashMap<String, f64>,
    target_weights: &HashMap<String, f64>,
    total_equity: f64,
    min_notional: f64,
    rounding: QuantityRounding,
) -> Vec<RebalanceOrder> {
    let mut orders = Vec::new();

    // Pass 1: close everything the target no longer wants.
    let mut to_close: Vec<&String> = current_positions
        .keys()
        .filter(|sym| !target_weights.contains_key(*sym))
        .collect();
    to_close.sort();
    for symbol in to_close {
        let qty = current_positions[symbol];
        if qty > 0.0 {
            orders.push(RebalanceOrder::new(symbol.clone(), OrderSide::Sell, qty));
        }
    }

    // Pass 2: adjust toward each target weight.
    let mut targets: Vec<(&String, f64)> = target_weights.iter().map(|(s, w)| (s, *w)).collect();
    targets.sort_by(|a, b| a.0.cmp(b.0));
    for (symbol, weight) in targets {
        let Some(price) = prices.get(symbol).copied().filter(|p| *p > 0.0) else {
            debug!(%symbol, "no known price, order skipped");
            continue;
        };
        let target_notional = weight * total_equity;
        let current_notional = current_positions.get(symbol).copied().unwrap_or(0.0) * price;
        let delta = target_notional - current_notional;
        if delta.abs() < min_notional {
            continue;
        }
        let side = if delta > 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let quantity = rounding.apply(delta.abs() / price);
        if quantity <= 0.0 {
            continue;
        }
        orders.push(RebalanceOrder::new(symbol.clone(), side, quantity));
    }

    orders
}

/// Apply a fill list to a position map, as a frictionless market would.
/// Used by the replay harness and the idempotence tests.
pub fn apply_fills(
    positions: &mut HashMap<String, f64>,
    orders: &[RebalanceOrder],
) {
    for order in orders {
        let qty = positions.entry(order.symbol.clone()).or_insert(0.0);
        match order.side {
            OrderSide::Buy => *qty += order.quantity,
            OrderSide::Sell => *qty -= order.quantity,
        }
        if qty.abs() < 1e-12 {
            positions.remove(&order.symbol);
        }
    }
}
