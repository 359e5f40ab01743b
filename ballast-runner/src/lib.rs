//! Ballast Runner — configuration, the live polling loop, CSV journaling,
//! and backtest replay over the same core pipeline.

pub mod config;
pub mod journal;
pub mod live;
pub mod replay;

pub use config::{BotConfig, StrategyEntry};
pub use journal::Journal;
pub use live::{execute_orders, CycleReport, LiveRunner};
pub use replay::{replay_csv, ReplayOutcome};
