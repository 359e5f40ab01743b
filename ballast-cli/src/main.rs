//! Ballast CLI — live run and replay commands.
//!
//! Commands:
//! - `run` — poll the feed and rebalance on an interval (or once)
//! - `replay` — drive the same pipeline over a recorded tick CSV

use anyhow::Result;
use ballast_runner::{replay_csv, BotConfig, LiveRunner};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ballast",
    about = "Ballast — multi-strategy portfolio rebalancer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live polling loop.
    Run {
        /// Path to the TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Run a single cycle and exit (snapshot saved on the way out).
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Force dry-run regardless of the config file.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Replay a recorded tick CSV through the pipeline.
    Replay {
        /// Path to the TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Tick file with timestamp,symbol,price,volume columns.
        #[arg(long)]
        data: PathBuf,

        /// Starting cash.
        #[arg(long, default_value_t = 10_000.0)]
        capital: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            once,
            dry_run,
        } => run_live(&config, once, dry_run),
        Commands::Replay {
            config,
            data,
            capital,
        } => run_replay(&config, &data, capital),
    }
}

fn run_live(config_path: &std::path::Path, once: bool, force_dry_run: bool) -> Result<()> {
    let mut config = BotConfig::load(config_path)?;
    if force_dry_run {
        config.dry_run = true;
    }
    tracing::info!(
        run_id = %config.run_id(),
        universe = config.universe.len(),
        strategies = ?config.summary(),
        "ballast starting"
    );

    let mut runner = LiveRunner::from_config(config);
    runner.startup();
    if once {
        let report = runner.run_cycle()?;
        runner.shutdown();
        println!(
            "cycle complete: {} rows, {} targets, {} orders ({} submitted)",
            report.rows_ingested,
            report.target_weights.len(),
            report.orders.len(),
            report.submitted
        );
        return Ok(());
    }
    runner.run_loop();
    Ok(())
}

fn run_replay(config_path: &std::path::Path, data: &std::path::Path, capital: f64) -> Result<()> {
    let config = BotConfig::load(config_path)?;
    let outcome = replay_csv(&config, data, capital)?;

    println!("Replay: {} cycles, {} orders filled", outcome.cycles, outcome.orders_filled);
    println!(
        "Equity: {:.2} -> {:.2} ({:+.2}%)",
        outcome.initial_capital,
        outcome.final_equity,
        outcome.total_return() * 100.0
    );
    if let Some((ts, _)) = outcome.equity_curve.first() {
        let (last_ts, _) = outcome.equity_curve[outcome.equity_curve.len() - 1];
        println!("Span:   {ts} -> {last_ts}");
    }
    Ok(())
}
