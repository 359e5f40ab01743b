//! Best-effort JSON-lines snapshot of the buffer contents.
//!
//! One row per observation: `{"symbol":…,"ts":…,"price":…,"volume":…}`.
//! Loading drops rows older than the cutoff, sorts each symbol's rows by
//! timestamp, and truncates to the ring capacity. Malformed lines are
//! skipped — a half-written snapshot costs history, never a crash.

use crate::domain::Observation;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    symbol: String,
    ts: DateTime<Utc>,
    price: f64,
    volume: f64,
}

/// Write every observation as one JSON line. Returns the row count.
pub(super) fn save(
    path: &Path,
    series: &HashMap<String, VecDeque<Observation>>,
) -> Result<usize, SnapshotError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let mut out = BufWriter::new(File::create(path)?);
    let mut written = 0usize;
    let mut symbols: Vec<&String> = series.keys().collect();
    symbols.sort();
    for symbol in symbols {
        for obs in &series[symbol] {
            let row = SnapshotRow {
                symbol: symbol.clone(),
                ts: obs.ts,
                price: obs.price,
                volume: obs.volume,
            };
            serde_json::to_writer(&mut out, &row)?;
            out.write_all(b"\n")?;
            written += 1;
        }
    }
    out.flush()?;
    Ok(written)
}

/// Read rows back into `series`. Returns the number of rows kept.
pub(super) fn load(
    path: &Path,
    max_age_hours: i64,
    capacity: usize,
    series: &mut HashMap<String, VecDeque<Observation>>,
) -> Result<usize, SnapshotError> {
    if !path.exists() {
        return Ok(0);
    }
    let cutoff = Utc::now() - Duration::hours(max_age_hours);
    let reader = BufReader::new(File::open(path)?);

    let mut staged: HashMap<String, Vec<Observation>> = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let Ok(row) = serde_json::from_str::<SnapshotRow>(&line) else {
            continue;
        };
        if row.ts < cutoff {
            continue;
        }
        staged
            .entry(row.symbol)
            .or_default()
            .push(Observation::new(row.ts, row.price, row.volume));
    }

    let mut kept = 0usize;
    for (symbol, mut rows) in staged {
        rows.sort_by_key(|o| o.ts);
        let skip = rows.len().saturating_sub(capacity);
        let ring = series.entry(symbol).or_default();
        for obs in rows.into_iter().skip(skip) {
            if ring.len() == capacity {
                ring.pop_front();
            }
            ring.push_back(obs);
            kept += 1;
        }
    }
    Ok(kept)
}
