//! Exchange boundary: account snapshot + order submission.
//!
//! The core consumes the exchange as two calls: "what do I hold and what
//! is it worth" and "place a market order". Fill semantics are opaque —
//! an ack means the exchange accepted the order, nothing more.

mod rest;

pub use rest::RestExchange;

use crate::domain::OrderSide;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Positions and valuation parsed from the exchange balance endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Free quantity per pair (e.g. "BTC/USD" → 0.5).
    pub positions: HashMap<String, f64>,
    /// Cash plus positions marked at the supplied prices.
    pub total_equity: f64,
    /// Free quote-currency balance.
    pub free_cash: f64,
}

/// Structured errors for the exchange boundary.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange rejected request: {0}")]
    Rejected(String),

    #[error("response format changed: {0}")]
    ResponseFormat(String),
}

/// Trait for exchange implementations.
pub trait Exchange {
    /// Current positions, total equity, and free cash. Positions with no
    /// known price are carried at zero value (they still rebalance by
    /// quantity).
    fn get_positions_and_equity(
        &self,
        prices: &HashMap<String, f64>,
    ) -> Result<AccountSnapshot, ExchangeError>;

    /// Place a market order. Returns the raw acknowledgment payload for
    /// journaling; a rejection surfaces as `ExchangeError::Rejected`.
    fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<serde_json::Value, ExchangeError>;
}
