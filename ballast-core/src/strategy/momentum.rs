//! Cross-sectional momentum — stateless top-K ranker.
//!
//! Return is measured oldest-vs-newest over the last `lookback_obs` raw
//! observations. No position bookkeeping: the weight map is recomputed from
//! scratch every cycle and symbols outside the top K simply drop out.

use super::{cap_weights, Strategy};
use crate::buffer::MarketBuffer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XsecMomentumParams {
    /// Number of symbols to hold, equally weighted.
    pub top_k: usize,
    /// Raw observations in the return lookback.
    pub lookback_obs: usize,
    /// Liquidity floor applied before ranking (0 disables).
    pub min_liquidity: f64,
}

impl Default for XsecMomentumParams {
    fn default() -> Self {
        Self {
            top_k: 2,
            lookback_obs: 6,
            min_liquidity: 0.0,
        }
    }
}

pub struct XsecMomentum {
    params: XsecMomentumParams,
    cap: f64,
}

impl XsecMomentum {
    pub fn new(params: XsecMomentumParams, per_symbol_cap: f64) -> Self {
        Self {
            params,
            cap: per_symbol_cap,
        }
    }
}

impl Strategy for XsecMomentum {
    fn name(&self) -> &str {
        "xsec_momentum"
    }

    fn target_weights(
        &mut self,
        market: &mut MarketBuffer,
        _prices: &HashMap<String, f64>,
        liquidity: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        let lookback = self.params.lookback_obs.max(2);
        let mut momentum: Vec<(String, f64)> = Vec::new();

        for symbol in market.symbols() {
            let tail = market.recent(&symbol, lookback);
            if tail.len() < lookback {
                continue;
            }
            if liquidity.get(&symbol).copied().unwrap_or(0.0) < self.params.min_liquidity {
                continue;
            }
            let oldest = tail[0].price;
            let newest = tail[tail.len() - 1].price;
            if oldest > 0.0 {
                momentum.push((symbol, (newest - oldest) / oldest));
            }
        }

        if momentum.is_empty() || self.params.top_k == 0 {
            return HashMap::new();
        }

        // Descending by return; symbol name breaks ties deterministically.
        momentum.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        momentum.truncate(self.params.top_k);

        let each = 1.0 / momentum.len() as f64;
        debug!(
            strategy = self.name(),
            picks = ?momentum.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
            each,
            "ranked"
        );
        let desired: HashMap<String, f64> =
            momentum.into_iter().map(|(sym, _)| (sym, each)).collect();
        cap_weights(desired, self.cap)
    }
}
