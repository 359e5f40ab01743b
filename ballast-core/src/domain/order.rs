//! Rebalance orders — the output of one pipeline cycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a rebalance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A market order produced by the rebalancer.
///
/// Ephemeral: produced once per cycle, handed to the execution boundary,
/// never retained. Quantity is always strictly positive — the rebalancer
/// drops anything that rounds to zero or below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
}

impl RebalanceOrder {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
        }
    }

    /// Dollar value of this order at the given price.
    pub fn notional(&self, price: f64) -> f64 {
        self.quantity * price
    }
}

impl fmt::Display for RebalanceOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:.8}", self.side, self.symbol, self.quantity)
    }
}
