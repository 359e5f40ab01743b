//! Fixed-width bar aggregation and the bar-close edge detector.

use super::session;
use crate::domain::Observation;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};

/// A fixed-width aggregation of raw observations, keyed by its end boundary.
///
/// Close is the last observation's price inside the bucket; volume is the
/// bucket sum. There is no OHLC — the raw feed carries last-trade prices
/// only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub end: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
}

/// Aggregate observations into fixed-width bars.
///
/// Buckets are keyed by bar-end boundary (session-clock floor + width).
/// Returns bars sorted by time, truncated to the most recent `max_bars`.
pub fn downsample<'a>(
    observations: impl Iterator<Item = &'a Observation>,
    bar_minutes: u32,
    max_bars: usize,
) -> Vec<Bar> {
    let mut buckets: BTreeMap<DateTime<Utc>, (f64, f64)> = BTreeMap::new();
    for obs in observations {
        let end = session::bar_end(obs.ts, bar_minutes);
        let entry = buckets.entry(end).or_insert((obs.price, 0.0));
        entry.0 = obs.price;
        entry.1 += obs.volume;
    }

    let mut bars: Vec<Bar> = buckets
        .into_iter()
        .map(|(end, (close, volume))| Bar { end, close, volume })
        .collect();
    if bars.len() > max_bars {
        bars.drain(..bars.len() - max_bars);
    }
    bars
}

/// Stateful bar-close edge detector.
///
/// `observe` returns true exactly once per distinct `(trading day, bar
/// index)` transition and false otherwise; the first observation for a
/// symbol counts as a transition. Every consumer must own its own clock —
/// a shared clock hands the edge to whichever caller asks first and starves
/// the rest.
#[derive(Debug, Clone)]
pub struct BarClock {
    bar_minutes: u32,
    last: HashMap<String, (NaiveDate, u32)>,
}

impl BarClock {
    pub fn new(bar_minutes: u32) -> Self {
        assert!(bar_minutes >= 1, "bar width must be >= 1 minute");
        Self {
            bar_minutes,
            last: HashMap::new(),
        }
    }

    pub fn bar_minutes(&self) -> u32 {
        self.bar_minutes
    }

    /// Feed the latest observed timestamp for `symbol`; true on a new bar.
    pub fn observe(&mut self, symbol: &str, ts: DateTime<Utc>) -> bool {
        let current = (session::trading_day(ts), session::bar_index(ts, self.bar_minutes));
        match self.last.get(symbol) {
            Some(prev) if *prev == current => false,
            _ => {
                self.last.insert(symbol.to_string(), current);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, h, mi, s).unwrap()
    }

    fn obs(ts: DateTime<Utc>, price: f64, volume: f64) -> Observation {
        Observation::new(ts, price, volume)
    }

    #[test]
    fn downsample_close_is_last_volume_is_sum() {
        let rows = vec![
            obs(utc(12, 0, 10), 100.0, 5.0),
            obs(utc(12, 1, 0), 101.0, 2.0),
            obs(utc(12, 4, 59), 99.5, 3.0),
            obs(utc(12, 5, 1), 102.0, 1.0),
        ];
        let bars = downsample(rows.iter(), 5, 100);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].end, utc(12, 5, 0));
        assert_eq!(bars[0].close, 99.5);
        assert_eq!(bars[0].volume, 10.0);
        assert_eq!(bars[1].end, utc(12, 10, 0));
        assert_eq!(bars[1].close, 102.0);
        assert_eq!(bars[1].volume, 1.0);
    }

    #[test]
    fn downsample_truncates_to_most_recent() {
        let rows: Vec<Observation> = (0..10)
            .map(|i| obs(utc(12, i * 5, 0), 100.0 + i as f64, 1.0))
            .collect();
        let bars = downsample(rows.iter(), 5, 3);
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[2].close, 109.0);
        assert_eq!(bars[0].close, 107.0);
    }

    #[test]
    fn downsample_empty() {
        let rows: Vec<Observation> = Vec::new();
        assert!(downsample(rows.iter(), 5, 10).is_empty());
    }

    #[test]
    fn clock_fires_once_per_bar() {
        let mut clock = BarClock::new(5);
        assert!(clock.observe("BTC/USD", utc(12, 0, 0)));
        assert!(!clock.observe("BTC/USD", utc(12, 1, 0)));
        assert!(!clock.observe("BTC/USD", utc(12, 4, 59)));
        assert!(clock.observe("BTC/USD", utc(12, 5, 0)));
        assert!(!clock.observe("BTC/USD", utc(12, 6, 0)));
    }

    #[test]
    fn clock_tracks_symbols_independently() {
        let mut clock = BarClock::new(5);
        assert!(clock.observe("BTC/USD", utc(12, 0, 0)));
        assert!(clock.observe("ETH/USD", utc(12, 1, 0)));
        assert!(!clock.observe("BTC/USD", utc(12, 2, 0)));
    }

    #[test]
    fn clock_fires_on_same_index_next_day() {
        let mut clock = BarClock::new(5);
        let day1 = Utc.with_ymd_and_hms(2024, 1, 10, 12, 2, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 1, 11, 12, 2, 0).unwrap();
        assert!(clock.observe("BTC/USD", day1));
        assert!(clock.observe("BTC/USD", day2));
    }

    #[test]
    #[should_panic(expected = "bar width must be >= 1 minute")]
    fn clock_rejects_zero_width() {
        BarClock::new(0);
    }
}
