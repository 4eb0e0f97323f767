//! Bot runner: the main trade loop.
//!
//! Each cycle:
//! - Skips the cycle while any position is open (one position at a time)
//! - Picks the next instrument round-robin
//! - Asks the direction oracle for long/short from recent candles
//! - Sizes and submits a market entry with attached TP/SL triggers
//! - Waits for the exchange triggers to close the position
//! - Records the outcome in the file ledger

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, InstrumentConfig};
use crate::exchange::{any_open_position, Exchange, PosSide, PositionMode};
use crate::ledger::{CloseRecord, Ledger};
use crate::oracle::{Direction, DirectionOracle};
use crate::trading::{apply_caps, plan_size, CapCache, EntryOrder, OrderSubmitter, SizeCaps};

const CANDLE_BAR: &str = "1m";
const CANDLE_LIMIT: u32 = 60;

/// Order id recorded for simulated fills.
const DRY_RUN_ORDER_ID: &str = "dry-run-order-id";

/// How a completed wait-for-close ended.
enum WaitOutcome {
    /// Position is flat; carries the last PnL ratio seen while it was open.
    Closed { last_ratio: Option<Decimal> },
    Shutdown,
}

/// Main bot runner.
pub struct Bot {
    config: AppConfig,
    exchange: Arc<dyn Exchange>,
    oracle: Box<dyn DirectionOracle>,
    submitter: OrderSubmitter,
    caps: Arc<CapCache>,
    ledger: Ledger,
    /// Round-robin instrument cursor; advances on every attempt.
    cursor: usize,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: AppConfig,
        exchange: Arc<dyn Exchange>,
        oracle: Box<dyn DirectionOracle>,
    ) -> Result<Self> {
        let ledger = Ledger::new(&config.log.dir).with_context(|| {
            format!("could not create log directory {}", config.log.dir.display())
        })?;
        let caps = Arc::new(CapCache::new());
        let submitter = OrderSubmitter::new(exchange.clone(), caps.clone());

        Ok(Self {
            config,
            exchange,
            oracle,
            submitter,
            caps,
            ledger,
            cursor: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Main run loop. Returns after a shutdown signal; any open position is
    /// left to its exchange-side triggers.
    pub async fn run(&mut self) -> Result<()> {
        if self.config.instruments.is_empty() {
            bail!("no instruments configured; nothing to trade");
        }

        info!(
            environment = self.config.environment.as_str(),
            dry_run = self.config.trading.dry_run,
            instruments = self.config.instruments.len(),
            poll_interval = self.config.trading.poll_interval_secs,
            "Starting trade loop"
        );
        self.record(&format!(
            "bot started ({}, dry_run={})",
            self.config.environment.as_str(),
            self.config.trading.dry_run
        ));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.cycle().await {
                warn!(error = %e, "Trade cycle failed");
                self.record(&format!("cycle error: {e}"));
                self.wait().await;
            }
        }

        self.record("bot stopped");
        info!("Trade loop stopped");
        Ok(())
    }

    /// One pass of the trade loop: at most one entry attempt, then wait for
    /// the position to close. Every early return leaves the loop ready for
    /// the next cycle.
    async fn cycle(&mut self) -> Result<()> {
        let open = self.exchange.positions(None).await?;
        if any_open_position(&open) {
            debug!(positions = open.len(), "Position already open; waiting");
            self.wait().await;
            return Ok(());
        }

        let index = self.cursor % self.config.instruments.len();
        self.cursor += 1;
        let inst = self.config.instruments[index].clone();

        let candles = self
            .exchange
            .candles(&inst.inst_id, CANDLE_BAR, CANDLE_LIMIT)
            .await?;
        let direction = self.oracle.decide(&inst.inst_id, &candles).await;
        info!(
            inst_id = %inst.inst_id,
            direction = direction.as_str(),
            candles = candles.len(),
            "Direction decided"
        );
        self.record(&format!(
            "{}: direction {}",
            inst.inst_id,
            direction.as_str()
        ));

        let balance = self.exchange.usdt_balance().await?;
        if balance <= Decimal::ZERO {
            warn!(balance = %balance, "No available USDT; skipping cycle");
            self.wait().await;
            return Ok(());
        }

        let entry = match self.build_entry(&inst, direction, balance).await? {
            Some(entry) => entry,
            None => {
                self.wait().await;
                return Ok(());
            }
        };

        let order_id = if self.config.trading.dry_run {
            info!(
                inst_id = %entry.inst_id,
                direction = direction.as_str(),
                contracts = entry.contracts,
                last = %entry.last,
                "[DRY RUN] Would submit entry order"
            );
            Some(DRY_RUN_ORDER_ID.to_string())
        } else {
            self.submitter.submit(&entry).await
        };

        let order_id = match order_id {
            Some(id) => id,
            None => {
                self.record(&format!("{}: order not placed", inst.inst_id));
                self.wait().await;
                return Ok(());
            }
        };
        self.record(&format!(
            "{}: opened {} x{} contracts at ~{} (order {})",
            inst.inst_id,
            direction.as_str(),
            entry.contracts,
            entry.last,
            order_id
        ));

        let ratio = if self.config.trading.dry_run {
            // Simulated fills close instantly; one wait keeps the cadence.
            self.wait().await;
            None
        } else {
            match self.await_flat(&inst.inst_id).await? {
                WaitOutcome::Closed { last_ratio } => {
                    self.close_ratio(&inst.inst_id, last_ratio).await
                }
                WaitOutcome::Shutdown => {
                    info!(
                        inst_id = %inst.inst_id,
                        "Shutdown requested; leaving position to exchange triggers"
                    );
                    return Ok(());
                }
            }
        };

        let close_balance = self.exchange.usdt_balance().await?;
        info!(
            inst_id = %inst.inst_id,
            open_balance = %balance,
            close_balance = %close_balance,
            "Position closed"
        );
        let record = CloseRecord {
            inst_id: &inst.inst_id,
            open_balance: balance,
            close_balance,
            realized_pnl_ratio: ratio,
            order_id: &order_id,
        };
        if let Err(e) = self.ledger.close(&record) {
            warn!(error = %e, "Could not write close ledger row");
        }
        self.record(&format!(
            "{}: closed, balance {} -> {}",
            inst.inst_id, balance, close_balance
        ));
        Ok(())
    }

    /// Resolve per-instrument settings and size the entry. `None` means the
    /// cycle should be skipped without an order.
    async fn build_entry(
        &self,
        inst: &InstrumentConfig,
        direction: Direction,
        balance: Decimal,
    ) -> Result<Option<EntryOrder>> {
        let defaults = &self.config.trading;
        let leverage = inst.effective_leverage(defaults);
        let notional = inst.effective_notional(defaults).min(balance);
        let last = self.exchange.last_price(&inst.inst_id).await?;

        let plan = match plan_size(last, notional, leverage) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(inst_id = %inst.inst_id, error = %e, "Sizing failed; skipping cycle");
                return Ok(None);
            }
        };
        let caps = SizeCaps {
            fixed: inst.fixed_contracts,
            instrument_max: inst.max_contracts,
            global_max: defaults.max_contracts,
            discovered: self.caps.get(&inst.inst_id, leverage).await,
        };
        let plan = apply_caps(plan, &caps);

        // Explicit position side only matters on long/short accounts.
        let pos_side = match self.exchange.position_mode().await {
            PositionMode::Net => PosSide::Net,
            PositionMode::LongShort => direction.pos_side(),
        };

        Ok(Some(EntryOrder {
            inst_id: inst.inst_id.clone(),
            direction,
            pos_side,
            margin_mode: defaults.margin_mode,
            contracts: plan.contracts,
            leverage,
            last,
            tp_ratio: inst.effective_tp(defaults),
            sl_ratio: inst.effective_sl(defaults),
            tp_trigger_type: defaults.tp_trigger_type,
            sl_trigger_type: defaults.sl_trigger_type,
        }))
    }

    /// Poll until the whole account reports flat, not just the traded
    /// instrument; a position opened manually elsewhere also holds the
    /// next entry back. Remembers the last PnL ratio reported while the
    /// traded position was still open.
    async fn await_flat(&self, inst_id: &str) -> Result<WaitOutcome> {
        let mut last_ratio = None;
        loop {
            if !self.wait().await {
                return Ok(WaitOutcome::Shutdown);
            }
            let positions = self.exchange.positions(None).await?;
            if !any_open_position(&positions) {
                return Ok(WaitOutcome::Closed { last_ratio });
            }
            match positions.iter().find(|p| p.inst_id == inst_id && p.is_open()) {
                Some(position) => {
                    last_ratio = position.realized_pnl_ratio.or(last_ratio);
                    debug!(
                        inst_id = %inst_id,
                        size = %position.size,
                        "Position still open"
                    );
                }
                None => debug!(inst_id = %inst_id, "Waiting on another instrument's position"),
            }
        }
    }

    /// Realized PnL ratio for the close row. Once flat, the exchange keeps
    /// a zero-size summary row whose ratio covers the whole position; the
    /// last ratio sampled while it was open is the fallback.
    async fn close_ratio(&self, inst_id: &str, last_ratio: Option<Decimal>) -> Option<Decimal> {
        match self.exchange.position_summary(inst_id).await {
            Ok(Some(summary)) => summary.realized_pnl_ratio.or(last_ratio),
            Ok(None) => last_ratio,
            Err(e) => {
                warn!(inst_id = %inst_id, error = %e, "Could not read post-close position summary");
                last_ratio
            }
        }
    }

    /// Sleep one poll interval, ending early on Ctrl-C. Returns false when
    /// shutdown was requested.
    async fn wait(&self) -> bool {
        let poll = Duration::from_secs(self.config.trading.poll_interval_secs);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                self.shutdown.store(true, Ordering::SeqCst);
                false
            }
            _ = sleep(poll) => !self.shutdown.load(Ordering::SeqCst),
        }
    }

    /// Append to the operations ledger; file trouble must not stop trading.
    fn record(&self, message: &str) {
        if let Err(e) = self.ledger.operation(message) {
            warn!(error = %e, "Could not write operations log");
        }
    }
}
