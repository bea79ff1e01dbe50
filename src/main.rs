//! BetterBot CLI — the thin driver around the `betterbot_core` trading
//! control plane. Venue adapters (market data, execution, chain RPCs) are
//! out of scope here and are supplied by an embedder linking the library
//! directly; this binary's own job is historical replay and trade-ledger
//! inspection, which are fully self-contained.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use betterbot_core::backtest::{monte_carlo, BacktestConfig, BacktestEngine, Tick};
use betterbot_core::config::{self, Config};
use betterbot_core::models::{RiskLimits, StrategyConfig, Venue};
use betterbot_core::strategies::MeanReversionStrategy;
use betterbot_core::trade_logger::TradeLogger;
use betterbot_core::trade_store::{TradeFilter, TradeStore};

#[derive(Parser)]
#[command(name = "betterbot", about = "Prediction-market trading control plane")]
struct Args {
    #[command(flatten)]
    global: config::Cli,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replays a historical tick file against a strategy and prints metrics.
    Backtest {
        /// JSON array of `{time, venue, marketId, outcome, price}` ticks.
        #[arg(long)]
        ticks: PathBuf,
        #[arg(long, default_value_t = 10_000.0)]
        initial_capital: f64,
        #[arg(long, default_value_t = 0.0)]
        commission_pct: f64,
        #[arg(long, default_value_t = 0.0)]
        slippage_pct: f64,
        #[arg(long, default_value_t = 0)]
        monte_carlo_sims: usize,
        #[arg(long, default_value_t = 42)]
        monte_carlo_seed: u64,
    },
    /// Prints trade statistics from the configured trade store.
    Stats {
        #[arg(long)]
        strategy_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TickRecord {
    time: DateTime<Utc>,
    venue: String,
    #[serde(rename = "marketId")]
    market_id: String,
    outcome: String,
    price: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_cli(args.global).context("loading configuration")?;
    init_tracing(&config.log_filter);

    match args.command {
        Commands::Backtest {
            ticks,
            initial_capital,
            commission_pct,
            slippage_pct,
            monte_carlo_sims,
            monte_carlo_seed,
        } => {
            run_backtest(
                &ticks,
                initial_capital,
                commission_pct,
                slippage_pct,
                monte_carlo_sims,
                monte_carlo_seed,
            )
            .await
        }
        Commands::Stats { strategy_id } => run_stats(&config, strategy_id).await,
    }
}

async fn run_backtest(
    ticks_path: &PathBuf,
    initial_capital: f64,
    commission_pct: f64,
    slippage_pct: f64,
    monte_carlo_sims: usize,
    monte_carlo_seed: u64,
) -> Result<()> {
    let raw = std::fs::read_to_string(ticks_path)
        .with_context(|| format!("reading tick file {}", ticks_path.display()))?;
    let records: Vec<TickRecord> = serde_json::from_str(&raw).context("parsing tick file")?;
    info!(count = records.len(), "loaded ticks");

    let ticks: Vec<Tick> = records
        .into_iter()
        .map(|r| Tick {
            time: r.time,
            venue: Venue::from(r.venue),
            market_id: r.market_id,
            outcome: r.outcome,
            price: r.price,
        })
        .collect();

    let strategy_config = StrategyConfig {
        id: "mean-reversion".to_string(),
        name: "mean reversion".to_string(),
        description: "moving-average mean reversion".to_string(),
        venues: vec![],
        market_filter: None,
        interval_ms: 1,
        limits: RiskLimits::default(),
        enabled: true,
        dry_run: true,
        params: serde_json::json!({}),
    };

    let backtest_config = BacktestConfig {
        initial_capital,
        commission_pct,
        slippage_pct,
        ..Default::default()
    };

    let mut engine = BacktestEngine::new(backtest_config, strategy_config.clone())
        .context("constructing backtest engine")?;
    let mut strategy = MeanReversionStrategy::new(&strategy_config.params);

    let metrics = engine.run(&mut strategy, &ticks, &[]).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    if monte_carlo_sims > 0 {
        let mc = monte_carlo(&metrics, monte_carlo_sims, monte_carlo_seed);
        println!("{}", serde_json::to_string_pretty(&mc)?);
    }

    Ok(())
}

async fn run_stats(config: &Config, strategy_id: Option<String>) -> Result<()> {
    let store = TradeStore::new(&config.database_path).context("opening trade store")?;
    let logger = Arc::new(TradeLogger::new(Arc::new(store)));

    let filter = TradeFilter {
        strategy_id,
        ..Default::default()
    };
    let stats = logger.get_stats(&filter).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn init_tracing(log_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
