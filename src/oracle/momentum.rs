//! Momentum heuristic: the zero-dependency fallback oracle.

use async_trait::async_trait;

use super::{Direction, DirectionOracle};
use crate::exchange::Candle;

/// Default lookback window, in bars.
const DEFAULT_LOOKBACK: usize = 30;

/// Compare closes over a window of recent bars.
///
/// Candles arrive newest-first, so the decision is long when the close at
/// the far (oldest) end of the window exceeds the newest close, short
/// otherwise. Fewer than two bars in the window defaults to short.
pub fn momentum_direction(candles: &[Candle], lookback: usize) -> Direction {
    let window = &candles[..candles.len().min(lookback)];
    if window.len() < 2 {
        return Direction::Short;
    }
    let newest = window[0].close;
    let oldest = window[window.len() - 1].close;
    if oldest > newest {
        Direction::Long
    } else {
        Direction::Short
    }
}

/// Deterministic close-price momentum oracle. Used standalone when no chat
/// API key is configured, and by the chat oracle as its failure fallback.
pub struct MomentumOracle {
    lookback: usize,
}

impl MomentumOracle {
    pub fn new() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK,
        }
    }

    #[cfg(test)]
    fn with_lookback(lookback: usize) -> Self {
        Self { lookback }
    }
}

impl Default for MomentumOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectionOracle for MomentumOracle {
    async fn decide(&self, _inst_id: &str, candles: &[Candle]) -> Direction {
        momentum_direction(candles, self.lookback)
    }
}
