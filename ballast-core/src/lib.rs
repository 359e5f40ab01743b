//! Ballast Core — market buffer, strategy state machines, combiner, rebalancer.
//!
//! This crate contains the heart of the live rebalancing pipeline:
//! - Domain types (observations, orders, account snapshots)
//! - Bounded, time-indexed market buffer with session-aware window queries
//! - Strategy trait plus the three built-in strategy state machines
//! - Strategy combiner (budget scaling, per-symbol cap, gross renormalization)
//! - Rebalancer (target weights + holdings → minimal order list)
//! - Data-feed and exchange boundary traits with REST implementations
//!
//! Everything here is single-threaded by design: one pipeline cycle mutates
//! the buffer and strategy state to completion before the next begins.

pub mod buffer;
pub mod combiner;
pub mod data;
pub mod domain;
pub mod exchange;
pub mod indicators;
pub mod rebalance;
pub mod strategy;
