//! AI-Directed Perpetual Futures Bot
//!
//! Trades USDT-margined perpetual swaps one position at a time: a chat
//! model (or a momentum fallback) picks the direction, exchange-side TP/SL
//! triggers close the position, and a file ledger records every round trip.

mod bot;
mod config;
mod exchange;
mod ledger;
mod oracle;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bot::Bot;
use crate::config::AppConfig;
use crate::exchange::{Exchange, OkxClient, SimExchange};
use crate::oracle::{DirectionOracle, MomentumOracle, OpenAiOracle};

/// Perpetual futures trading bot CLI.
#[derive(Parser)]
#[command(name = "perpbot")]
#[command(about = "AI-directed perpetual futures trading bot", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Send real orders to the exchange
        #[arg(long)]
        live: bool,

        /// Simulate order placement (wins over --live)
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the effective configuration with secrets redacted
    Config,

    /// Ask the direction oracle for a one-off decision
    Decide {
        /// Instrument id, e.g. BTC-USDT-SWAP
        inst_id: String,
    },

    /// Close the instrument's position and cancel its pending orders
    Flatten {
        /// Instrument id, e.g. BTC-USDT-SWAP
        inst_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }

    let filter = EnvFilter::try_new(&config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { live, dry_run } => {
            if live {
                config.trading.dry_run = false;
            }
            if dry_run {
                config.trading.dry_run = true;
            }

            println!("\n=== Perpetual Futures Bot ===");
            println!("Environment: {}", config.environment.as_str());
            println!(
                "Mode: {}",
                if config.trading.dry_run {
                    "DRY RUN (no orders sent)"
                } else {
                    "LIVE TRADING"
                }
            );
            println!("Instruments: {}", config.instruments.len());
            println!("\nPress Ctrl+C to stop.\n");

            let exchange = build_exchange(&config)?;
            let oracle = build_oracle(&config)?;
            let mut bot = Bot::new(config, exchange, oracle)?;
            bot.run().await?;
        }

        Commands::Config => {
            println!("\n=== Effective Configuration ===\n");
            print!("{}", config.describe());
        }

        Commands::Decide { inst_id } => {
            let exchange = build_exchange(&config)?;
            let oracle = build_oracle(&config)?;

            let candles = exchange.candles(&inst_id, "1m", 60).await?;
            let direction = oracle.decide(&inst_id, &candles).await;
            println!("{inst_id}: {direction} ({} candles)", candles.len());
        }

        Commands::Flatten { inst_id } => {
            let exchange = build_exchange(&config)?;

            let positions = exchange.positions(Some(&inst_id)).await?;
            let open: Vec<_> = positions.iter().filter(|p| p.is_open()).collect();
            if open.is_empty() {
                println!("No open position on {inst_id}.");
            }
            for position in open {
                exchange
                    .close_position_market(
                        &inst_id,
                        position.pos_side,
                        None,
                        config.trading.margin_mode,
                    )
                    .await?;
                println!(
                    "Closed {} position of {} contracts.",
                    position.pos_side.as_str(),
                    position.size
                );
            }

            let orders = exchange.cancel_open_orders(&inst_id).await?;
            let triggers = exchange.cancel_trigger_orders(&inst_id).await?;
            println!("Cancelled {orders} open orders and {triggers} trigger orders.");
        }
    }

    Ok(())
}

/// Live client when full credentials are configured, simulator otherwise.
fn build_exchange(config: &AppConfig) -> Result<Arc<dyn Exchange>> {
    match config.okx.credentials() {
        Some(credentials) => {
            info!(
                demo = config.environment.is_demo(),
                "Using live exchange client"
            );
            Ok(Arc::new(OkxClient::new(
                credentials,
                config.environment.is_demo(),
            )?))
        }
        None => {
            info!("No exchange credentials configured; using simulator");
            Ok(Arc::new(SimExchange::new()))
        }
    }
}

/// Chat oracle when an API key is configured, momentum fallback otherwise.
fn build_oracle(config: &AppConfig) -> Result<Box<dyn DirectionOracle>> {
    match &config.ai.api_key {
        Some(api_key) => {
            info!(model = %config.ai.model, "Using chat direction oracle");
            Ok(Box::new(OpenAiOracle::new(
                api_key,
                &config.ai.base_url,
                &config.ai.model,
            )?))
        }
        None => {
            info!("No chat API key configured; using momentum oracle");
            Ok(Box::new(MomentumOracle::new()))
        }
    }
}
