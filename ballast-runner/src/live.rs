//! Live polling loop.
//!
//! One cycle runs the whole pipeline to completion: fetch rows per universe
//! symbol → append to the buffer → (optional) opening-range backfill →
//! combine strategies → snapshot the account → rebalance → execute. A
//! failed cycle is logged and the loop sleeps into the next one; nothing
//! short of process death stops the loop. The sleep is
//! `max(1s, interval − elapsed)` so a slow cycle eats into its own sleep,
//! never into buffer state.

use anyhow::{bail, Context, Result};
use ballast_core::buffer::{session, MarketBuffer};
use ballast_core::combiner::StrategyCombiner;
use ballast_core::data::{HttpPriceFeed, PriceSource};
use ballast_core::domain::{Observation, RebalanceOrder};
use ballast_core::exchange::{Exchange, RestExchange};
use ballast_core::rebalance::rebalance_orders;
use ballast_core::strategy;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::journal::Journal;

/// What one cycle did, for logs and tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub rows_ingested: usize,
    pub target_weights: HashMap<String, f64>,
    pub orders: Vec<RebalanceOrder>,
    pub submitted: usize,
}

pub struct LiveRunner {
    config: BotConfig,
    market: MarketBuffer,
    combiner: StrategyCombiner,
    feed: Box<dyn PriceSource>,
    exchange: Box<dyn Exchange>,
    journal: Journal,
    backfill_attempted: HashSet<(String, NaiveDate)>,
}

impl LiveRunner {
    /// Wire up REST boundaries from the config.
    pub fn from_config(config: BotConfig) -> Self {
        let feed = HttpPriceFeed::new(config.feed.base_url.clone(), config.feed.api_key.clone())
            .with_interval(config.feed.interval.clone())
            .with_skip_assets(config.feed.skip_assets.iter().cloned());
        let exchange = RestExchange::new(
            config.exchange.base_url.clone(),
            config.exchange.api_key.clone(),
            config.exchange.secret_key.clone(),
        );
        Self::with_boundaries(config, Box::new(feed), Box::new(exchange))
    }

    /// Inject boundaries directly (tests, fixtures).
    pub fn with_boundaries(
        config: BotConfig,
        feed: Box<dyn PriceSource>,
        exchange: Box<dyn Exchange>,
    ) -> Self {
        let market = MarketBuffer::new(config.buffer_capacity)
            .with_window_gating(config.strict_window_gating);
        let mut combiner = StrategyCombiner::new(config.per_symbol_cap);
        for (strategy_config, budget) in config.strategy_pairs() {
            combiner.push(strategy::build(strategy_config, config.per_symbol_cap), budget);
        }
        let journal = Journal::from_settings(&config.journal);
        Self {
            config,
            market,
            combiner,
            feed,
            exchange,
            journal,
            backfill_attempted: HashSet::new(),
        }
    }

    pub fn market(&self) -> &MarketBuffer {
        &self.market
    }

    /// Reload the buffer snapshot, if configured. Startup-only.
    pub fn startup(&mut self) {
        let Some(path) = self.config.snapshot.path.clone() else {
            return;
        };
        match self
            .market
            .load_snapshot(&path, self.config.snapshot.max_age_hours)
        {
            Ok(rows) => info!(rows, path = %path.display(), "buffer snapshot reloaded"),
            Err(e) => warn!(error = %e, "buffer snapshot reload failed, starting cold"),
        }
    }

    /// Persist the buffer snapshot, if configured. Shutdown-only.
    pub fn shutdown(&mut self) {
        let Some(path) = self.config.snapshot.path.clone() else {
            return;
        };
        match self.market.save_snapshot(&path) {
            Ok(rows) => info!(rows, path = %path.display(), "buffer snapshot saved"),
            Err(e) => warn!(error = %e, "buffer snapshot save failed"),
        }
    }

    /// One full pipeline pass.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        let cycle_start = Utc::now();
        let universe = self.config.universe.clone();
        let mut report = CycleReport::default();

        // 1. Ingest. A cold symbol reaches back `lookback_hours`; a warm one
        // fetches only what the buffer has not seen.
        let mut reachable = 0usize;
        for symbol in &universe {
            let since = self.market.latest(symbol).map(|o| o.ts);
            let start =
                since.unwrap_or(cycle_start - ChronoDuration::hours(self.config.lookback_hours));
            match self.feed.fetch(symbol, start, cycle_start) {
                Ok(rows) => {
                    reachable += 1;
                    for row in rows {
                        if since.is_some_and(|s| row.ts <= s) {
                            continue;
                        }
                        self.market
                            .append(symbol, Observation::new(row.ts, row.price, 0.0));
                        report.rows_ingested += 1;
                    }
                }
                Err(e) => warn!(%symbol, error = %e, "fetch failed, symbol skipped this cycle"),
            }
        }
        if reachable == 0 {
            bail!("price feed unreachable for every universe symbol");
        }

        // 2. Opening-range backfill for symbols that started cold.
        if self.config.feed.backfill_opening_range {
            self.backfill_opening_ranges(&universe);
        }

        // 3. Strategies → combined target weights.
        let prices = self.market.latest_prices();
        let liquidity = self.market.latest_liquidity();
        let weights = self.combiner.combine(&mut self.market, &prices, &liquidity);
        if weights.is_empty() {
            info!("no target weights, skipping rebalance this cycle");
            return Ok(report);
        }
        report.target_weights = weights.clone();

        // 4. Account snapshot + equity journal.
        let account = self
            .exchange
            .get_positions_and_equity(&prices)
            .context("failed to fetch positions and equity")?;
        info!(
            equity = account.total_equity,
            cash = account.free_cash,
            positions = account.positions.len(),
            "account snapshot"
        );
        if let Err(e) = self
            .journal
            .record_equity(cycle_start, account.total_equity, account.free_cash)
        {
            warn!(error = %e, "equity journal append failed");
        }

        // 5. Rebalance.
        let orders = rebalance_orders(
            &account.positions,
            &prices,
            &weights,
            account.total_equity,
            self.config.min_notional,
            self.config.rounding,
        );
        if orders.is_empty() {
            info!("portfolio already aligned with target");
            return Ok(report);
        }
        for order in &orders {
            info!(%order, "proposed");
        }

        // 6. Execute (or log, in dry-run).
        if self.config.dry_run {
            for order in &orders {
                info!(%order, "dry run, order not submitted");
                self.journal_trade(cycle_start, order, &prices, "dry_run");
            }
        } else {
            let outcomes = execute_orders(self.exchange.as_ref(), &orders, 1);
            for (order, ok) in orders.iter().zip(&outcomes) {
                let status = if *ok { "submitted" } else { "failed" };
                self.journal_trade(cycle_start, order, &prices, status);
            }
            report.submitted = outcomes.iter().filter(|ok| **ok).count();
        }
        report.orders = orders;
        Ok(report)
    }

    /// Run forever: cycle, log any abort, sleep the remainder.
    pub fn run_loop(&mut self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            interval_secs = self.config.interval_secs,
            dry_run = self.config.dry_run,
            run_id = %self.config.run_id(),
            "starting main loop"
        );
        loop {
            let started = Instant::now();
            match self.run_cycle() {
                Ok(report) => info!(
                    rows = report.rows_ingested,
                    targets = report.target_weights.len(),
                    orders = report.orders.len(),
                    submitted = report.submitted,
                    "cycle complete"
                ),
                Err(e) => error!(error = %format!("{e:#}"), "cycle aborted"),
            }
            let sleep_for = interval
                .saturating_sub(started.elapsed())
                .max(Duration::from_secs(1));
            std::thread::sleep(sleep_for);
        }
    }

    fn journal_trade(
        &self,
        ts: DateTime<Utc>,
        order: &RebalanceOrder,
        prices: &HashMap<String, f64>,
        status: &str,
    ) {
        let price = prices.get(&order.symbol).copied();
        if let Err(e) = self.journal.record_trade(ts, order, price, status) {
            warn!(error = %e, "trade journal append failed");
        }
    }

    /// Seed missing opening ranges from the feed, once per symbol-day.
    fn backfill_opening_ranges(&mut self, universe: &[String]) {
        for symbol in universe {
            let Some(latest) = self.market.latest(symbol).map(|o| o.ts) else {
                continue;
            };
            if !self.market.opening_window_elapsed(symbol) {
                continue;
            }
            if self.market.opening_range(symbol).is_some() {
                continue;
            }
            let (start, end, day) = session::opening_window_utc(latest);
            let key = (symbol.clone(), day);
            if !self.backfill_attempted.insert(key) {
                continue;
            }
            match self
                .feed
                .fetch(symbol, start, end + ChronoDuration::minutes(1))
            {
                Ok(rows) if !rows.is_empty() => {
                    let pairs: Vec<(DateTime<Utc>, f64)> =
                        rows.iter().map(|r| (r.ts, r.price)).collect();
                    if let Some(range) = self.market.seed_opening_range(symbol, &pairs) {
                        info!(
                            %symbol,
                            high = range.high,
                            low = range.low,
                            "opening range backfilled"
                        );
                    }
                }
                Ok(_) => info!(%symbol, "no backfill rows for opening window"),
                Err(e) => warn!(%symbol, error = %e, "opening-range backfill failed"),
            }
        }
    }
}

/// Submit orders with a bounded per-order retry. Returns one success flag
/// per order, in order. The core never retries beyond this.
pub fn execute_orders(
    exchange: &dyn Exchange,
    orders: &[RebalanceOrder],
    max_retries: u32,
) -> Vec<bool> {
    orders
        .iter()
        .map(|order| {
            for attempt in 0..=max_retries {
                match exchange.submit_order(&order.symbol, order.side, order.quantity) {
                    Ok(ack) => {
                        info!(%order, %ack, "order submitted");
                        return true;
                    }
                    Err(e) => {
                        error!(
                            %order,
                            attempt = attempt + 1,
                            error = %e,
                            "order submission failed"
                        );
                        if attempt < max_retries {
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            }
            false
        })
        .collect()
}
