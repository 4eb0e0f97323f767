//! Order sizing: notional capital and leverage to an integer contract count.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// A planned order size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizePlan {
    /// Contracts to order, always at least 1.
    pub contracts: u64,
    /// Notional capital committed, before leverage.
    pub notional: Decimal,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("insufficient balance to open a position ({0} USDT)")]
    InsufficientBalance(Decimal),
}

/// Size limits applied after planning, most restrictive first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeCaps {
    /// Fixed contract count override; bypasses all other caps.
    pub fixed: Option<u64>,
    /// Per-instrument maximum from configuration.
    pub instrument_max: Option<u64>,
    /// Global maximum from configuration.
    pub global_max: Option<u64>,
    /// Cap discovered from a prior exchange rejection.
    pub discovered: Option<u64>,
}

/// Estimate the contract count for a notional stake at the given leverage.
///
/// Effective buying power is `notional * leverage`; the raw quantity
/// `buying_power / last` is floored so the plan never exceeds the stake,
/// then bumped back up by one contract when that still fits the notional
/// (recovering truncation error). The result is never below 1.
///
/// Contract units differ per instrument; this deliberately treats one
/// contract as one unit of the base quantity, the same simplification the
/// rest of the sizing pipeline assumes.
pub fn plan_size(last: Decimal, notional: Decimal, leverage: u32) -> Result<SizePlan, PlanError> {
    if notional <= Decimal::ZERO {
        return Err(PlanError::InsufficientBalance(notional));
    }
    let last = if last > Decimal::ZERO { last } else { Decimal::ONE };
    let lever = Decimal::from(leverage.max(1));

    let buying_power = notional * lever;
    let qty = buying_power / last;
    let mut contracts = qty.trunc().to_u64().unwrap_or(0).max(1);

    // One more contract is allowed when its margin still fits the stake.
    let next_margin = Decimal::from(contracts + 1) * last / lever;
    if next_margin <= notional {
        contracts += 1;
    }

    Ok(SizePlan {
        contracts,
        notional,
    })
}

/// Clamp a plan to the configured and discovered limits.
///
/// A fixed contract override wins outright and skips cap logic entirely.
/// Otherwise the tightest of the instrument, global, and discovered caps
/// applies; zero-valued caps are treated as unset.
pub fn apply_caps(mut plan: SizePlan, caps: &SizeCaps) -> SizePlan {
    if let Some(fixed) = caps.fixed.filter(|&c| c > 0) {
        plan.contracts = fixed;
        return plan;
    }

    let hard_cap = [caps.instrument_max, caps.global_max, caps.discovered]
        .into_iter()
        .flatten()
        .filter(|&c| c > 0)
        .min();

    if let Some(cap) = hard_cap {
        if plan.contracts > cap {
            plan.contracts = cap;
        }
    }
    plan
}
