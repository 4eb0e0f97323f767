//! Offline exchange simulator.
//!
//! Stands in for the live client when no API credentials are configured.
//! Market data is a synthetic random walk, the account is always flat and
//! orders are acknowledged without being tracked, which is exactly what
//! the dry-run trading loop needs.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use super::{
    Candle, Exchange, ExchangeError, MarginMode, OrderRequest, PlaceOutcome, PosSide,
    PositionMode, PositionRecord,
};

/// Synthetic bar spacing in epoch milliseconds.
const BAR_MS: i64 = 60_000;

/// Exchange stub backed by synthetic data.
pub struct SimExchange {
    balance: Decimal,
}

impl SimExchange {
    pub fn new() -> Self {
        Self {
            balance: dec!(1000),
        }
    }

    fn start_price(inst_id: &str) -> Decimal {
        if inst_id.starts_with("BTC") {
            dec!(30000)
        } else {
            dec!(2000)
        }
    }
}

impl Default for SimExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exchange for SimExchange {
    async fn usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        Ok(self.balance)
    }

    /// Random walk drifting up to 0.1% per bar, newest bar first.
    async fn candles(
        &self,
        inst_id: &str,
        _bar: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut rng = rand::thread_rng();
        let mut price = Self::start_price(inst_id);
        let base_ts = 1_700_000_000_000;

        let mut candles = Vec::with_capacity(limit as usize);
        for i in 0..limit {
            // Uniform drift in [-0.001, 0.001] at five decimal places
            let drift = Decimal::new(rng.gen_range(-100i64..=100), 5);
            price = (price * (Decimal::ONE + drift)).max(Decimal::ONE);
            candles.push(Candle {
                ts: base_ts + i64::from(i) * BAR_MS,
                open: (price * dec!(0.9995)).round_dp(2),
                high: (price * dec!(1.001)).round_dp(2),
                low: (price * dec!(0.999)).round_dp(2),
                close: price.round_dp(2),
                volume: Decimal::ZERO,
            });
        }
        candles.reverse();
        Ok(candles)
    }

    async fn last_price(&self, inst_id: &str) -> Result<Decimal, ExchangeError> {
        Ok(Self::start_price(inst_id))
    }

    async fn positions(&self, _inst_id: Option<&str>) -> Result<Vec<PositionRecord>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn position_mode(&self) -> PositionMode {
        PositionMode::Net
    }

    async fn set_leverage(
        &self,
        _inst_id: &str,
        _leverage: u32,
        _margin_mode: MarginMode,
        _pos_side: PosSide,
    ) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn place_order(&self, _order: &OrderRequest) -> Result<PlaceOutcome, ExchangeError> {
        Ok(PlaceOutcome::Accepted {
            order_id: format!("sim-{}", Uuid::new_v4()),
        })
    }

    async fn cancel_open_orders(&self, _inst_id: &str) -> Result<usize, ExchangeError> {
        Ok(0)
    }

    async fn cancel_trigger_orders(&self, _inst_id: &str) -> Result<usize, ExchangeError> {
        Ok(0)
    }

    async fn close_position_market(
        &self,
        _inst_id: &str,
        _pos_side: PosSide,
        _size: Option<u64>,
        _margin_mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        Ok(())
    }

    async fn position_summary(
        &self,
        _inst_id: &str,
    ) -> Result<Option<PositionRecord>, ExchangeError> {
        Ok(None)
    }
}
