//! CSV trade and equity journaling.
//!
//! Append-only files with a header written on creation. Journaling is
//! best-effort: the live loop logs a failed append and moves on — a full
//! disk must not stop trading.

use anyhow::{Context, Result};
use ballast_core::domain::RebalanceOrder;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::config::JournalSettings;

#[derive(Debug, Clone, Default)]
pub struct Journal {
    trades_path: Option<PathBuf>,
    equity_path: Option<PathBuf>,
}

impl Journal {
    pub fn from_settings(settings: &JournalSettings) -> Self {
        Self {
            trades_path: settings.trades_path.clone(),
            equity_path: settings.equity_path.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Append one equity curve point. No-op when the equity journal is off.
    pub fn record_equity(&self, ts: DateTime<Utc>, equity: f64, cash: f64) -> Result<()> {
        let Some(path) = &self.equity_path else {
            return Ok(());
        };
        append_row(
            path,
            &["ts", "equity", "cash"],
            &[
                ts.to_rfc3339(),
                format!("{equity:.8}"),
                format!("{cash:.8}"),
            ],
        )
    }

    /// Append one executed (or attempted) order. No-op when the trade
    /// journal is off.
    pub fn record_trade(
        &self,
        ts: DateTime<Utc>,
        order: &RebalanceOrder,
        price: Option<f64>,
        status: &str,
    ) -> Result<()> {
        let Some(path) = &self.trades_path else {
            return Ok(());
        };
        append_row(
            path,
            &["ts", "symbol", "side", "qty", "price", "status"],
            &[
                ts.to_rfc3339(),
                order.symbol.clone(),
                order.side.to_string(),
                format!("{:.8}", order.quantity),
                price.map_or_else(String::new, |p| format!("{p:.8}")),
                status.to_string(),
            ],
        )
    }
}

fn append_row(path: &Path, header: &[&str], row: &[String]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create journal dir {}", dir.display()))?;
        }
    }
    let fresh = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open journal {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if fresh {
        writer.write_record(header)?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::domain::OrderSide;

    fn read(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn equity_journal_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/equity.csv");
        let journal = Journal::from_settings(&JournalSettings {
            equity_path: Some(path.clone()),
            trades_path: None,
        });
        let ts = Utc::now();
        journal.record_equity(ts, 10_000.0, 2_500.0).unwrap();
        journal.record_equity(ts, 10_050.0, 2_400.0).unwrap();

        let lines = read(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ts,equity,cash");
        assert!(lines[1].contains("10000.00000000"));
        assert!(lines[2].contains("10050.00000000"));
    }

    #[test]
    fn trade_journal_records_orders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        let journal = Journal::from_settings(&JournalSettings {
            trades_path: Some(path.clone()),
            equity_path: None,
        });
        let order = RebalanceOrder::new("BTC/USD", OrderSide::Buy, 0.25);
        journal
            .record_trade(Utc::now(), &order, Some(40_000.0), "submitted")
            .unwrap();
        journal.record_trade(Utc::now(), &order, None, "failed").unwrap();

        let lines = read(&path);
        assert_eq!(lines[0], "ts,symbol,side,qty,price,status");
        assert!(lines[1].contains("BTC/USD,buy,0.25000000,40000.00000000,submitted"));
        assert!(lines[2].ends_with(",failed"));
    }

    #[test]
    fn disabled_journal_is_a_noop() {
        let journal = Journal::disabled();
        journal.record_equity(Utc::now(), 1.0, 1.0).unwrap();
        let order = RebalanceOrder::new("BTC/USD", OrderSide::Sell, 1.0);
        journal.record_trade(Utc::now(), &order, None, "dry_run").unwrap();
    }
}
