//! Opening-range breakdown/reclaim strategy.
//!
//! Per-symbol state machine: `idle → broken-down → in-position`. A close
//! below the opening-range low arms the symbol; a close back at or above
//! the low enters long with the stop at the deeper of the breaking price
//! and the range low (clamped into a risk band) and the target at a fixed
//! 2:1 reward:risk. The whole machine is inactive until the opening window
//! has closed and its range is cached, and it only advances on bar-close
//! edges.

use super::{cap_weights, Strategy};
use crate::buffer::{session, BarClock, MarketBuffer};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeBreakoutParams {
    /// Weight carried while a position is open (long-only).
    pub allocation: f64,
    /// Upper bound on stop distance as a fraction of entry price.
    pub max_r_pct: f64,
    /// Lower bound on stop distance as a fraction of entry price.
    pub min_r_pct: f64,
    /// Liquidity floor applied to the emitted map (0 disables).
    pub min_liquidity: f64,
    /// Bar width driving the state machine.
    pub bar_minutes: u32,
}

impl Default for RangeBreakoutParams {
    fn default() -> Self {
        Self {
            allocation: 0.5,
            max_r_pct: 0.01,
            min_r_pct: 0.002,
            min_liquidity: 0.0,
            bar_minutes: 5,
        }
    }
}

/// An open reclaim trade. Exits on stop, target, or trading-day rollover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenTrade {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, Copy)]
struct BreakState {
    day: NaiveDate,
    below_at: Option<f64>,
}

pub struct RangeBreakout {
    params: RangeBreakoutParams,
    cap: f64,
    clock: BarClock,
    broken: HashMap<String, BreakState>,
    open: HashMap<String, OpenTrade>,
}

impl RangeBreakout {
    pub fn new(params: RangeBreakoutParams, per_symbol_cap: f64) -> Self {
        let bar_minutes = params.bar_minutes;
        Self {
            params,
            cap: per_symbol_cap,
            clock: BarClock::new(bar_minutes),
            broken: HashMap::new(),
            open: HashMap::new(),
        }
    }

    pub fn open_trade(&self, symbol: &str) -> Option<&OpenTrade> {
        self.open.get(symbol)
    }
}

/// Clamp the stop so the stop-to-entry distance lands in
/// `[min_r_pct, max_r_pct]` of the entry price (upper bound applied first),
/// then derive the 2:1 target. `None` when the range degenerates to zero.
fn clamp_risk(entry: f64, stop: f64, max_r_pct: f64, min_r_pct: f64) -> Option<(f64, f64)> {
    let mut stop = stop;
    let mut risk = (entry - stop).abs();
    let denom = entry.max(1e-12);
    if max_r_pct > 0.0 && risk / denom > max_r_pct {
        stop = entry * (1.0 - max_r_pct);
        risk = (entry - stop).abs();
    }
    if min_r_pct > 0.0 && risk / denom < min_r_pct {
        stop = entry * (1.0 - min_r_pct);
        risk = (entry - stop).abs();
    }
    if risk <= 0.0 {
        return None;
    }
    Some((stop, entry + 2.0 * risk))
}

impl Strategy for RangeBreakout {
    fn name(&self) -> &str {
        "range_breakout"
    }

    fn target_weights(
        &mut self,
        market: &mut MarketBuffer,
        prices: &HashMap<String, f64>,
        liquidity: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        let mut desired: HashMap<String, f64> = HashMap::new();
        let weight = self.params.allocation.abs();

        let mut symbols: Vec<&String> = prices.keys().collect();
        symbols.sort();

        for symbol in symbols {
            let Some(latest_ts) = market.latest(symbol).map(|o| o.ts) else {
                continue;
            };
            let today = session::trading_day(latest_ts);

            if !self.clock.observe(symbol, latest_ts) {
                // Between bar closes: keep holding open positions.
                if self.open.contains_key(symbol) {
                    desired.insert(symbol.clone(), weight);
                }
                continue;
            }

            let Some(close) = market.latest_price(symbol) else {
                continue;
            };

            // Exits are evaluated before the entry gate so a position can
            // always be closed even when today's range is not ready yet.
            if let Some(trade) = self.open.get(symbol).copied() {
                if close <= trade.stop || close >= trade.target || trade.day != today {
                    info!(
                        strategy = self.name(),
                        %symbol,
                        close,
                        stop = trade.stop,
                        target = trade.target,
                        "exit"
                    );
                    self.open.remove(symbol);
                } else {
                    desired.insert(symbol.clone(), weight);
                }
            }

            // Inactive until the opening window closed and its range cached.
            let Some(range) = market.opening_range(symbol) else {
                debug!(strategy = self.name(), %symbol, "range not ready, skip");
                continue;
            };

            let mut state = self
                .broken
                .get(symbol)
                .copied()
                .filter(|s| s.day == today)
                .unwrap_or(BreakState {
                    day: today,
                    below_at: None,
                });

            if !self.open.contains_key(symbol) {
                match state.below_at {
                    None => {
                        if close < range.low {
                            state.below_at = Some(close);
                        }
                    }
                    Some(break_price) => {
                        if close >= range.low {
                            let initial_stop = break_price.min(range.low);
                            if let Some((stop, target)) = clamp_risk(
                                close,
                                initial_stop,
                                self.params.max_r_pct,
                                self.params.min_r_pct,
                            ) {
                                self.open.insert(
                                    symbol.clone(),
                                    OpenTrade {
                                        entry: close,
                                        stop,
                                        target,
                                        day: today,
                                    },
                                );
                                desired.insert(symbol.clone(), weight);
                                info!(
                                    strategy = self.name(),
                                    %symbol,
                                    entry = close,
                                    stop,
                                    target,
                                    weight,
                                    "entry"
                                );
                            }
                            // One attempt per reclaim, successful or not.
                            state.below_at = None;
                        }
                    }
                }
            }
            self.broken.insert(symbol.clone(), state);
        }

        if self.params.min_liquidity > 0.0 {
            let floor = self.params.min_liquidity;
            desired.retain(|symbol, _| liquidity.get(symbol).copied().unwrap_or(0.0) >= floor);
        }
        cap_weights(desired, self.cap)
    }
}
