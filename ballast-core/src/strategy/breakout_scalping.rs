//! Consolidation-breakout scalper.
//!
//! Builds fixed-width bars from the raw buffer, measures volatility with a
//! close-to-close Wilder ATR, and looks for a tight consolidation whose
//! high gets taken out on expanding volume. Entries only happen on
//! bar-close edges; exit conditions (stop, target, expiry) are checked on
//! every cycle so a position is never held past its bracket because polling
//! was slow. Every exit starts a cooldown that blocks re-entry.

use super::{cap_weights, Strategy};
use crate::buffer::{BarClock, MarketBuffer};
use crate::indicators::atr::wilder_atr;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutScalpingParams {
    /// Weight carried while a position is open (long-only).
    pub allocation: f64,
    /// Consolidation window, in bars, excluding the current bar.
    pub lookback_bars: usize,
    /// Maximum `(max - min) / midpoint` for the window to count as tight.
    pub range_eps: f64,
    /// Breakout buffer above the window high.
    pub trig_eps: f64,
    /// Volume expansion multiple versus the window average.
    pub vol_mult: f64,
    /// ATR period (Wilder smoothing over close-to-close true ranges).
    pub atr_period: usize,
    /// Stop distance in ATR multiples.
    pub sl_mult: f64,
    /// Target distance in ATR multiples.
    pub tp_mult: f64,
    /// Force exit this long after entry.
    pub timeout_minutes: i64,
    /// Re-entry lockout after any exit.
    pub cooldown_minutes: i64,
    /// Liquidity floor (0 disables).
    pub min_liquidity: f64,
    /// Bar width for aggregation and edge detection.
    pub bar_minutes: u32,
}

impl Default for BreakoutScalpingParams {
    fn default() -> Self {
        Self {
            allocation: 0.25,
            lookback_bars: 12,
            range_eps: 0.004,
            trig_eps: 0.0005,
            vol_mult: 1.5,
            atr_period: 14,
            sl_mult: 1.0,
            tp_mult: 2.0,
            timeout_minutes: 30,
            cooldown_minutes: 60,
            min_liquidity: 0.0,
            bar_minutes: 5,
        }
    }
}

/// An open scalp with its bracket and hard expiry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalpTrade {
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub opened_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct BreakoutScalping {
    params: BreakoutScalpingParams,
    cap: f64,
    clock: BarClock,
    open: HashMap<String, ScalpTrade>,
    cooldown_until: HashMap<String, DateTime<Utc>>,
}

impl BreakoutScalping {
    pub fn new(params: BreakoutScalpingParams, per_symbol_cap: f64) -> Self {
        let bar_minutes = params.bar_minutes;
        Self {
            params,
            cap: per_symbol_cap,
            clock: BarClock::new(bar_minutes),
            open: HashMap::new(),
            cooldown_until: HashMap::new(),
        }
    }

    pub fn open_trade(&self, symbol: &str) -> Option<&ScalpTrade> {
        self.open.get(symbol)
    }

    pub fn cooldown_until(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.cooldown_until.get(symbol).copied()
    }

    fn min_bars(&self) -> usize {
        (self.params.atr_period + self.params.lookback_bars + 1).max(20)
    }
}

impl Strategy for BreakoutScalping {
    fn name(&self) -> &str {
        "breakout_scalping"
    }

    fn target_weights(
        &mut self,
        market: &mut MarketBuffer,
        _prices: &HashMap<String, f64>,
        liquidity: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        let p = self.params.clone();
        let weight = p.allocation.abs().min(self.cap);
        let mut desired: HashMap<String, f64> = HashMap::new();

        for symbol in market.symbols() {
            let Some(latest) = market.latest(&symbol).copied() else {
                continue;
            };
            let now = latest.ts;

            if p.min_liquidity > 0.0
                && liquidity.get(&symbol).copied().unwrap_or(0.0) < p.min_liquidity
            {
                continue;
            }

            // Exit checks run on the raw cycle price, every cycle.
            if let Some(trade) = self.open.get(&symbol).copied() {
                let px = latest.price;
                if px <= trade.stop || px >= trade.target || now >= trade.expires_at {
                    let reason = if px <= trade.stop {
                        "stop"
                    } else if px >= trade.target {
                        "target"
                    } else {
                        "timeout"
                    };
                    info!(
                        strategy = self.name(),
                        %symbol,
                        px,
                        entry = trade.entry,
                        stop = trade.stop,
                        target = trade.target,
                        reason,
                        "exit"
                    );
                    self.open.remove(&symbol);
                    self.cooldown_until
                        .insert(symbol.clone(), now + Duration::minutes(p.cooldown_minutes));
                    continue;
                }
                desired.insert(symbol.clone(), weight);
                continue;
            }

            // Entry evaluation only at a bar-close edge.
            let max_bars = (p.atr_period + p.lookback_bars + 10).max(300);
            let bars = market.downsample_to_bars(&symbol, p.bar_minutes, max_bars);
            if bars.len() < self.min_bars() {
                continue;
            }
            if !self.clock.observe(&symbol, now) {
                continue;
            }
            if self
                .cooldown_until
                .get(&symbol)
                .is_some_and(|until| now < *until)
            {
                continue;
            }

            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
            let last_close = closes[closes.len() - 1];
            let last_volume = volumes[volumes.len() - 1];

            let Some(atr) = wilder_atr(&closes, p.atr_period) else {
                continue;
            };
            if atr <= 0.0 {
                continue;
            }

            // Consolidation check over the window that excludes the current bar.
            let window = &closes[closes.len() - 1 - p.lookback_bars..closes.len() - 1];
            let high = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let low = window.iter().cloned().fold(f64::INFINITY, f64::min);
            let midpoint = (high + low) / 2.0;
            if midpoint <= 0.0 {
                continue;
            }
            let range_pct = (high - low) / midpoint;

            // No volume data at all means the volume filter passes.
            let vol_window = &volumes[volumes.len() - 1 - p.lookback_bars..volumes.len() - 1];
            let avg_volume = vol_window.iter().sum::<f64>() / vol_window.len().max(1) as f64;
            let volume_ok = avg_volume <= 0.0 || last_volume > p.vol_mult * avg_volume;

            if range_pct <= p.range_eps && last_close > high * (1.0 + p.trig_eps) && volume_ok {
                let stop = last_close - p.sl_mult * atr;
                let target = last_close + p.tp_mult * atr;
                if stop >= last_close || target <= last_close {
                    continue;
                }
                self.open.insert(
                    symbol.clone(),
                    ScalpTrade {
                        entry: last_close,
                        stop,
                        target,
                        opened_at: now,
                        expires_at: now + Duration::minutes(p.timeout_minutes),
                    },
                );
                desired.insert(symbol.clone(), weight);
                info!(
                    strategy = self.name(),
                    %symbol,
                    entry = last_close,
                    atr,
                    stop,
                    target,
                    weight,
                    "entry"
                );
            }
        }

        cap_weights(desired, self.cap)
    }
}
