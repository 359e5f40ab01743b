//! Average True Range over a close-only series.
//!
//! The raw feed carries last-trade prices, not OHLC, so the true range
//! degrades to `|close[i] - close[i-1]|`. Smoothing is Wilder's: seed with
//! the simple average of the first `period` true ranges, then
//! `atr = (atr * (period - 1) + tr) / period`.

/// True-range series from consecutive closes: `|close[i] - close[i-1]|`.
/// One element shorter than the input.
pub fn true_ranges(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
}

/// Wilder-smoothed ATR over the full series.
///
/// Needs at least `period + 1` closes (for `period` true ranges); returns
/// `None` otherwise. The caller treats `None` and non-positive values as
/// "skip this symbol this cycle".
pub fn wilder_atr(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let trs = true_ranges(closes);
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    for tr in &trs[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
    }
    Some(atr)
}
