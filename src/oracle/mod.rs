//! Direction decisions: the chat-model oracle and the momentum fallback.

mod momentum;
mod openai;

pub use momentum::{momentum_direction, MomentumOracle};
pub use openai::OpenAiOracle;

use async_trait::async_trait;

use crate::exchange::{Candle, OrderSide, PosSide};

/// A binary trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The order side that opens a position in this direction.
    pub fn order_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// The explicit position side for dual-direction accounts.
    pub fn pos_side(&self) -> PosSide {
        match self {
            Direction::Long => PosSide::Long,
            Direction::Short => PosSide::Short,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that turns recent market history into a direction.
///
/// Implementations always resolve to a decision; internal failures degrade
/// to a deterministic heuristic rather than surfacing to the caller.
#[async_trait]
pub trait DirectionOracle: Send + Sync {
    /// Decide a direction from the instrument's recent candles, newest
    /// bar first.
    async fn decide(&self, inst_id: &str, candles: &[Candle]) -> Direction;
}
