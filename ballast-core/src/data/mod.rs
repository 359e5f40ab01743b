//! Price-source boundary: trait, structured errors, and ingestion
//! normalization.
//!
//! The `PriceSource` trait abstracts over backfill/polling feeds so the
//! runner can swap the HTTP implementation for fixtures in tests. Feeds in
//! the wild disagree about timestamp encodings (integer seconds, integer
//! milliseconds, ISO-8601 strings with and without zone), so everything is
//! normalized to `DateTime<Utc>` at ingestion and nowhere else.

mod http;

pub use http::HttpPriceFeed;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A normalized (timestamp, price) row from a price source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: DateTime<Utc>,
    pub price: f64,
}

/// Structured errors for the data boundary.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from price feed")]
    Status { status: u16 },

    #[error("response format changed: {0}")]
    ResponseFormat(String),
}

/// Trait for price sources.
///
/// An empty row list is a valid "no data" answer, not an error — sparse
/// symbols are skipped by the caller, never retried in a loop.
pub trait PriceSource {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch rows for a symbol over a UTC range, ordered by timestamp.
    fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, FeedError>;
}

/// Quote suffixes recognized when mapping a pair to its base asset,
/// longest first so "USDT" wins over "USD".
const QUOTE_SUFFIXES: [&str; 3] = ["USDT", "USDC", "USD"];

/// Base asset of a trading pair: `BTC/USD` → `BTC`, `eth-usdt` → `ETH`,
/// `SOLUSDC` → `SOL`. Unrecognized shapes pass through upper-cased.
pub fn base_asset(pair: &str) -> String {
    let p = pair.to_uppercase().replace('-', "/");
    if let Some((base, _)) = p.split_once('/') {
        return base.to_string();
    }
    for quote in QUOTE_SUFFIXES {
        if let Some(base) = p.strip_suffix(quote) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    p
}

/// Normalize a raw feed timestamp to UTC.
///
/// Accepts integer/float epoch seconds, epoch milliseconds (anything above
/// 1e12), and ISO-8601 strings ("Z" suffix, explicit offset, or naive —
/// naive is taken as UTC). Returns `None` for anything unparseable; the
/// caller drops the row.
pub fn normalize_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let mut secs = n.as_f64()?;
            if secs > 1e12 {
                secs /= 1000.0;
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round() as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }
        serde_json::Value::String(s) => parse_iso8601(s),
        _ => None,
    }
}

fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive timestamps are taken as UTC; both "T" and space separators show
    // up in the wild.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}
