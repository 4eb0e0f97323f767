//! Exchange access: a common trait over the live OKX-compatible REST client
//! and the offline simulator, plus the shared order/position types.

mod okx;
mod sim;
mod types;

pub use okx::{OkxClient, OkxCredentials};
pub use sim::SimExchange;
pub use types::{
    Candle, MarginMode, OrderRejection, OrderRequest, OrderSide, PlaceOutcome, PosSide,
    PositionMode, PositionRecord, RejectionKind, TriggerPriceType, TriggerSpec,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by exchange calls.
///
/// `Network` and `Decode` are transient faults: the trading loop logs them
/// and skips the cycle. `Api` means the exchange answered with an error
/// envelope outside of order placement; placement rejections are returned
/// as structured [`PlaceOutcome::Rejected`] values instead.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("exchange api error {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed exchange response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication failure: {0}")]
    Auth(String),
}

/// The capabilities the trading loop needs from an exchange.
///
/// Implemented by the live [`OkxClient`] and the offline [`SimExchange`].
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Available USDT balance in the trading account.
    async fn usdt_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Recent OHLCV history for an instrument, newest bar first.
    async fn candles(
        &self,
        inst_id: &str,
        bar: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Last traded price.
    async fn last_price(&self, inst_id: &str) -> Result<Decimal, ExchangeError>;

    /// Open positions, optionally filtered to one instrument.
    async fn positions(&self, inst_id: Option<&str>) -> Result<Vec<PositionRecord>, ExchangeError>;

    /// Account position mode. Degrades to [`PositionMode::Net`] when the
    /// account configuration cannot be read.
    async fn position_mode(&self) -> PositionMode;

    /// Apply leverage for an instrument.
    async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: u32,
        margin_mode: MarginMode,
        pos_side: PosSide,
    ) -> Result<(), ExchangeError>;

    /// Submit an order. `Err` means the request never produced an exchange
    /// verdict; rejections come back as `Ok(PlaceOutcome::Rejected)`.
    async fn place_order(&self, order: &OrderRequest) -> Result<PlaceOutcome, ExchangeError>;

    /// Cancel live and partially filled regular orders on the instrument.
    /// Returns how many cancellations were issued.
    async fn cancel_open_orders(&self, inst_id: &str) -> Result<usize, ExchangeError>;

    /// Cancel pending TP/SL trigger orders on the instrument. Returns how
    /// many cancellations were issued.
    async fn cancel_trigger_orders(&self, inst_id: &str) -> Result<usize, ExchangeError>;

    /// Close an open position with a market order in the opposite
    /// direction, then drop any leftover trigger orders.
    async fn close_position_market(
        &self,
        inst_id: &str,
        pos_side: PosSide,
        size: Option<u64>,
        margin_mode: MarginMode,
    ) -> Result<(), ExchangeError>;

    /// Snapshot of the instrument's position, if one exists.
    async fn position_summary(
        &self,
        inst_id: &str,
    ) -> Result<Option<PositionRecord>, ExchangeError>;
}

/// Whether any reported position is open. The trading loop uses this as its
/// account-wide single-position guard.
pub fn any_open_position(positions: &[PositionRecord]) -> bool {
    positions.iter().any(PositionRecord::is_open)
}
