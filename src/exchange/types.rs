//! Shared exchange data types for the live and simulated clients.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Margin mode for perpetual swap orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl MarginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Cross => "cross",
            MarginMode::Isolated => "isolated",
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Position side. `Long`/`Short` apply in dual-direction account mode;
/// net-mode accounts track a single signed position instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosSide {
    Long,
    Short,
    Net,
}

impl PosSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PosSide::Long => "long",
            PosSide::Short => "short",
            PosSide::Net => "net",
        }
    }
}

/// Account-level position mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    /// One signed net position per instrument.
    Net,
    /// Separate long and short positions per instrument.
    LongShort,
}

/// Price reference used to evaluate TP/SL triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPriceType {
    Last,
    Index,
    Mark,
}

impl TriggerPriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPriceType::Last => "last",
            TriggerPriceType::Index => "index",
            TriggerPriceType::Mark => "mark",
        }
    }
}

/// One OHLCV bar. Candle sequences are ordered newest-first, matching the
/// exchange's history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    /// Bar open time in epoch milliseconds.
    pub ts: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// A TP or SL trigger attached to an entry order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSpec {
    pub trigger_px: Decimal,
    pub trigger_px_type: TriggerPriceType,
}

/// A market entry order, optionally carrying attached TP/SL triggers.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub inst_id: String,
    pub side: OrderSide,
    /// `Net` on net-mode accounts. The live client omits the wire field
    /// then; the exchange rejects an explicit long/short side in net mode.
    pub pos_side: PosSide,
    pub margin_mode: MarginMode,
    /// Size in contracts.
    pub size: u64,
    pub take_profit: Option<TriggerSpec>,
    pub stop_loss: Option<TriggerSpec>,
}

/// Classified reason for an order rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// TP trigger price is on the wrong side of the current price.
    TpSideInvalid,
    /// Requested size exceeds the allowed position amount.
    SizeCapExceeded,
    /// Not enough margin for the requested size.
    InsufficientMargin,
    Other,
}

/// A structured order rejection decoded from the exchange response.
#[derive(Debug, Clone)]
pub struct OrderRejection {
    pub kind: RejectionKind,
    /// Maximum tradable size parsed out of the rejection message, when the
    /// exchange includes one.
    pub max_size: Option<u64>,
    pub code: String,
    pub message: String,
}

/// Outcome of an order placement that reached the exchange.
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    Accepted { order_id: String },
    Rejected(OrderRejection),
}

impl PlaceOutcome {
    /// The order id, when the placement was accepted with a non-empty id.
    /// An acceptance without an id counts as a failed placement.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            PlaceOutcome::Accepted { order_id } if !order_id.is_empty() => Some(order_id),
            _ => None,
        }
    }
}

/// An open position as reported by the exchange.
#[derive(Debug, Clone)]
pub struct PositionRecord {
    pub inst_id: String,
    pub pos_side: PosSide,
    /// Position size in contracts; zero means flat.
    pub size: Decimal,
    /// Exchange-reported realized PnL ratio, when available.
    pub realized_pnl_ratio: Option<Decimal>,
}

impl PositionRecord {
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}
