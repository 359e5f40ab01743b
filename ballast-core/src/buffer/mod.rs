//! Bounded, time-indexed market buffer with session-aware window queries.
//!
//! One `MarketBuffer` owns every symbol's observation ring plus the
//! opening-range cache and bar clocks. All mutation happens from the single
//! cycle thread; snapshot save/load are explicit startup/shutdown
//! operations.

mod bars;
pub mod session;
mod snapshot;

pub use bars::{Bar, BarClock};
pub use snapshot::SnapshotError;

use crate::domain::Observation;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};

/// Minimum number of in-window observations before the opening range is
/// considered representative.
const MIN_RANGE_OBSERVATIONS: usize = 2;

/// Minimum observations for the best-effort trailing-window fallback.
const MIN_FALLBACK_OBSERVATIONS: usize = 5;

/// High/low of the opening window, cached per `(symbol, trading day)`.
///
/// Snapshot-once: once cached for a day the value never changes, even if
/// later in-window observations would widen it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpeningRange {
    pub high: f64,
    pub low: f64,
    pub trading_day: NaiveDate,
}

/// Per-symbol bounded ring of observations with derived session queries.
#[derive(Debug)]
pub struct MarketBuffer {
    capacity: usize,
    strict_window_gating: bool,
    series: HashMap<String, VecDeque<Observation>>,
    ranges: HashMap<(String, NaiveDate), OpeningRange>,
    clocks: HashMap<u32, BarClock>,
}

impl MarketBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "buffer capacity must be >= 1");
        Self {
            capacity,
            strict_window_gating: true,
            series: HashMap::new(),
            ranges: HashMap::new(),
            clocks: HashMap::new(),
        }
    }

    /// Relax the opening-range gate: past the window end, a trailing window
    /// may seed the cache when no anchored observations exist.
    pub fn with_window_gating(mut self, strict: bool) -> Self {
        self.strict_window_gating = strict;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one observation. FIFO eviction at capacity; out-of-order
    /// timestamps are appended as-is.
    pub fn append(&mut self, symbol: &str, obs: Observation) {
        let ring = self
            .series
            .entry(symbol.to_string())
            .or_insert_with(|| VecDeque::with_capacity(16));
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(obs);
    }

    /// All symbols with at least one observation, sorted for deterministic
    /// iteration.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .series
            .iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(sym, _)| sym.clone())
            .collect();
        out.sort();
        out
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(VecDeque::is_empty)
    }

    pub fn latest(&self, symbol: &str) -> Option<&Observation> {
        self.series.get(symbol).and_then(VecDeque::back)
    }

    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.latest(symbol).map(|o| o.price)
    }

    pub fn latest_volume(&self, symbol: &str) -> Option<f64> {
        self.latest(symbol).map(|o| o.volume)
    }

    /// Latest price per symbol (skips empty rings).
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        self.series
            .iter()
            .filter_map(|(sym, ring)| ring.back().map(|o| (sym.clone(), o.price)))
            .collect()
    }

    /// Latest volume per symbol, used as the liquidity proxy.
    pub fn latest_liquidity(&self) -> HashMap<String, f64> {
        self.series
            .iter()
            .filter_map(|(sym, ring)| ring.back().map(|o| (sym.clone(), o.volume)))
            .collect()
    }

    /// Observations with `ts >= latest_ts - minutes`, boundary inclusive.
    ///
    /// Anchored on the buffer's own latest timestamp, never wall clock, so
    /// the query is deterministic under replay.
    pub fn window(&self, symbol: &str, minutes: i64) -> Vec<Observation> {
        let Some(ring) = self.series.get(symbol) else {
            return Vec::new();
        };
        let Some(last) = ring.back() else {
            return Vec::new();
        };
        let cutoff = last.ts - Duration::minutes(minutes);
        ring.iter().filter(|o| o.ts >= cutoff).copied().collect()
    }

    /// The last `n` observations in time order.
    pub fn recent(&self, symbol: &str, n: usize) -> Vec<Observation> {
        let Some(ring) = self.series.get(symbol) else {
            return Vec::new();
        };
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).copied().collect()
    }

    /// Fixed-width bars over the whole ring, most recent `max_bars`.
    pub fn downsample_to_bars(&self, symbol: &str, bar_minutes: u32, max_bars: usize) -> Vec<Bar> {
        match self.series.get(symbol) {
            Some(ring) => bars::downsample(ring.iter(), bar_minutes, max_bars),
            None => Vec::new(),
        }
    }

    /// Shared bar-close edge detector, keyed by bar width.
    ///
    /// True exactly once per bar-index transition per symbol. Consumers that
    /// must not steal each other's edges (i.e. two strategies on the same
    /// width) own a private [`BarClock`] instead.
    pub fn bar_close(&mut self, symbol: &str, bar_minutes: u32) -> bool {
        let Some(ts) = self.latest(symbol).map(|o| o.ts) else {
            return false;
        };
        self.clocks
            .entry(bar_minutes)
            .or_insert_with(|| BarClock::new(bar_minutes))
            .observe(symbol, ts)
    }

    /// Whether the buffer clock for `symbol` is past the end of today's
    /// opening window.
    pub fn opening_window_elapsed(&self, symbol: &str) -> bool {
        match self.latest(symbol) {
            Some(obs) => {
                let (_, end, _) = session::opening_window_utc(obs.ts);
                obs.ts >= end
            }
            None => false,
        }
    }

    /// Cached high/low of today's opening window, or `None` until ready.
    ///
    /// Computed at most once per `(symbol, trading day)`:
    /// - never before the buffer clock passes the window end (no partial
    ///   ranges), and
    /// - only with at least two observations strictly inside the window.
    ///
    /// With relaxed gating, a trailing four-hour window with at least five
    /// observations may seed the cache when the anchored window stayed
    /// empty. Either way the cached value is immutable for the rest of the
    /// day. Sparse symbols can stay "not ready" all day; callers skip them.
    pub fn opening_range(&mut self, symbol: &str) -> Option<OpeningRange> {
        let latest = *self.latest(symbol)?;
        let (start, end, day) = session::opening_window_utc(latest.ts);
        let key = (symbol.to_string(), day);
        if let Some(cached) = self.ranges.get(&key) {
            return Some(*cached);
        }
        if latest.ts < end {
            return None;
        }

        let ring = self.series.get(symbol)?;
        let mut high = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut in_window = 0usize;
        for obs in ring.iter().filter(|o| o.ts >= start && o.ts < end) {
            high = high.max(obs.price);
            low = low.min(obs.price);
            in_window += 1;
        }
        if in_window >= MIN_RANGE_OBSERVATIONS {
            let range = OpeningRange {
                high,
                low,
                trading_day: day,
            };
            self.ranges.insert(key, range);
            return Some(range);
        }

        if !self.strict_window_gating {
            let cutoff = latest.ts - Duration::hours(session::OPENING_WINDOW_HOURS);
            let trailing: Vec<f64> = ring
                .iter()
                .filter(|o| o.ts >= cutoff)
                .map(|o| o.price)
                .collect();
            if trailing.len() >= MIN_FALLBACK_OBSERVATIONS {
                let range = OpeningRange {
                    high: trailing.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    low: trailing.iter().cloned().fold(f64::INFINITY, f64::min),
                    trading_day: day,
                };
                self.ranges.insert(key, range);
                return Some(range);
            }
        }
        None
    }

    /// Seed the opening-range cache from externally backfilled rows.
    ///
    /// Used when the process started after the window closed and the ring
    /// never saw in-window data. Same snapshot-once contract: a no-op when
    /// the range is already cached or the window has not ended yet.
    pub fn seed_opening_range(
        &mut self,
        symbol: &str,
        rows: &[(DateTime<Utc>, f64)],
    ) -> Option<OpeningRange> {
        let latest = *self.latest(symbol)?;
        let (start, end, day) = session::opening_window_utc(latest.ts);
        let key = (symbol.to_string(), day);
        if let Some(cached) = self.ranges.get(&key) {
            return Some(*cached);
        }
        if latest.ts < end {
            return None;
        }

        let mut high = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut seen = 0usize;
        for (_, price) in rows.iter().filter(|(ts, _)| *ts >= start && *ts < end) {
            high = high.max(*price);
            low = low.min(*price);
            seen += 1;
        }
        if seen == 0 {
            return None;
        }
        let range = OpeningRange {
            high,
            low,
            trading_day: day,
        };
        self.ranges.insert(key, range);
        Some(range)
    }

    /// Write the full buffer contents as JSON-lines. Best-effort persistence
    /// only — failures leave in-memory state untouched.
    pub fn save_snapshot(&self, path: &std::path::Path) -> Result<usize, SnapshotError> {
        snapshot::save(path, &self.series)
    }

    /// Reload a snapshot, dropping rows older than `max_age_hours`, sorting
    /// per symbol, and truncating to capacity. Malformed lines are skipped.
    pub fn load_snapshot(
        &mut self,
        path: &std::path::Path,
        max_age_hours: i64,
    ) -> Result<usize, SnapshotError> {
        snapshot::load(path, max_age_hours, self.capacity, &mut self.series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, mi, 0).unwrap()
    }

    fn obs(ts: DateTime<Utc>, price: f64) -> Observation {
        Observation::new(ts, price, 1.0)
    }

    #[test]
    fn append_evicts_oldest_first() {
        let mut buf = MarketBuffer::new(3);
        for i in 0..5 {
            buf.append("BTC/USD", obs(utc(10, 12, i), 100.0 + i as f64));
        }
        assert_eq!(buf.len("BTC/USD"), 3);
        let window = buf.window("BTC/USD", 60);
        assert_eq!(window[0].price, 102.0);
        assert_eq!(buf.latest_price("BTC/USD"), Some(104.0));
    }

    #[test]
    fn latest_of_missing_symbol_is_none() {
        let buf = MarketBuffer::new(10);
        assert_eq!(buf.latest_price("ETH/USD"), None);
        assert_eq!(buf.latest_volume("ETH/USD"), None);
        assert!(buf.window("ETH/USD", 5).is_empty());
    }

    #[test]
    fn window_is_anchored_on_buffer_clock() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 12, 0), 100.0));
        buf.append("BTC/USD", obs(utc(10, 12, 5), 101.0));
        buf.append("BTC/USD", obs(utc(10, 12, 10), 102.0));
        // 5-minute window from the latest observation (12:10) includes 12:05
        // (boundary inclusive) but not 12:00.
        let window = buf.window("BTC/USD", 5);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].price, 101.0);
    }

    #[test]
    fn symbols_are_sorted() {
        let mut buf = MarketBuffer::new(10);
        buf.append("ETH/USD", obs(utc(10, 12, 0), 1.0));
        buf.append("BTC/USD", obs(utc(10, 12, 0), 2.0));
        buf.append("ADA/USD", obs(utc(10, 12, 0), 3.0));
        assert_eq!(buf.symbols(), vec!["ADA/USD", "BTC/USD", "ETH/USD"]);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut buf = MarketBuffer::new(10);
        for i in 0..6 {
            buf.append("BTC/USD", obs(utc(10, 12, i), 100.0 + i as f64));
        }
        let tail = buf.recent("BTC/USD", 3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].price, 103.0);
        assert_eq!(tail[2].price, 105.0);
        // Asking for more than exists returns everything.
        assert_eq!(buf.recent("BTC/USD", 50).len(), 6);
    }

    // Opening-range tests use January dates: EST, window = 05:00–09:00 UTC.

    #[test]
    fn opening_range_not_ready_before_window_end() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 6, 0), 100.0));
        buf.append("BTC/USD", obs(utc(10, 7, 0), 105.0));
        assert_eq!(buf.opening_range("BTC/USD"), None);
    }

    #[test]
    fn opening_range_computes_after_window_end() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 6, 0), 100.0));
        buf.append("BTC/USD", obs(utc(10, 7, 0), 105.0));
        buf.append("BTC/USD", obs(utc(10, 9, 30), 103.0));
        let range = buf.opening_range("BTC/USD").unwrap();
        assert_eq!(range.high, 105.0);
        assert_eq!(range.low, 100.0);
        assert_eq!(range.trading_day, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn opening_range_requires_two_in_window_observations() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 6, 0), 100.0));
        buf.append("BTC/USD", obs(utc(10, 9, 30), 103.0));
        assert_eq!(buf.opening_range("BTC/USD"), None);
    }

    #[test]
    fn opening_range_is_immutable_once_cached() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 6, 0), 100.0));
        buf.append("BTC/USD", obs(utc(10, 7, 0), 105.0));
        buf.append("BTC/USD", obs(utc(10, 9, 30), 103.0));
        let first = buf.opening_range("BTC/USD").unwrap();
        // A late out-of-order in-window print must not widen the cache.
        buf.append("BTC/USD", obs(utc(10, 8, 0), 150.0));
        let second = buf.opening_range("BTC/USD").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn opening_range_resets_on_new_trading_day() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 6, 0), 100.0));
        buf.append("BTC/USD", obs(utc(10, 7, 0), 105.0));
        buf.append("BTC/USD", obs(utc(10, 9, 30), 103.0));
        assert!(buf.opening_range("BTC/USD").is_some());
        // Next day, before the new window ends: not ready again.
        buf.append("BTC/USD", obs(utc(11, 6, 0), 110.0));
        assert_eq!(buf.opening_range("BTC/USD"), None);
    }

    #[test]
    fn strict_gating_ignores_out_of_window_data() {
        let mut buf = MarketBuffer::new(100);
        // Only post-window observations: strict mode never becomes ready.
        for i in 0..10 {
            buf.append("BTC/USD", obs(utc(10, 10, i * 5), 100.0 + i as f64));
        }
        assert_eq!(buf.opening_range("BTC/USD"), None);
    }

    #[test]
    fn relaxed_gating_uses_trailing_window() {
        let mut buf = MarketBuffer::new(100).with_window_gating(false);
        for i in 0..10 {
            buf.append("BTC/USD", obs(utc(10, 10, i * 5), 100.0 + i as f64));
        }
        let range = buf.opening_range("BTC/USD").unwrap();
        assert_eq!(range.high, 109.0);
        assert_eq!(range.low, 100.0);
    }

    #[test]
    fn seed_opening_range_respects_cache_and_window() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 10, 0), 104.0));
        let rows = vec![
            (utc(10, 5, 30), 101.0),
            (utc(10, 8, 0), 107.0),
            (utc(10, 12, 0), 999.0), // outside the window, ignored
        ];
        let range = buf.seed_opening_range("BTC/USD", &rows).unwrap();
        assert_eq!(range.high, 107.0);
        assert_eq!(range.low, 101.0);
        // Already cached: identical result, later rows ignored.
        let again = buf
            .seed_opening_range("BTC/USD", &[(utc(10, 6, 0), 50.0)])
            .unwrap();
        assert_eq!(again, range);
        assert_eq!(buf.opening_range("BTC/USD"), Some(range));
    }

    #[test]
    fn bar_close_fires_once_per_transition() {
        let mut buf = MarketBuffer::new(100);
        buf.append("BTC/USD", obs(utc(10, 12, 0), 100.0));
        assert!(buf.bar_close("BTC/USD", 5));
        buf.append("BTC/USD", obs(utc(10, 12, 3), 100.5));
        assert!(!buf.bar_close("BTC/USD", 5));
        buf.append("BTC/USD", obs(utc(10, 12, 5), 101.0));
        assert!(buf.bar_close("BTC/USD", 5));
        assert!(!buf.bar_close("BTC/USD", 5));
    }

    #[test]
    fn bar_close_empty_symbol_is_false() {
        let mut buf = MarketBuffer::new(100);
        assert!(!buf.bar_close("BTC/USD", 5));
    }
}
