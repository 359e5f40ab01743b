//! Observation — the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single (timestamp, price, volume) sample for one symbol.
///
/// Timestamps are UTC instants. Within one symbol's buffer they are
/// non-decreasing in the common case, but the buffer appends out-of-order
/// samples anyway; window queries tolerate the resulting staleness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

impl Observation {
    pub fn new(ts: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self { ts, price, volume }
    }

    /// Basic sanity check: price strictly positive, volume non-negative,
    /// both finite.
    pub fn is_sane(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.volume.is_finite() && self.volume >= 0.0
    }
}
