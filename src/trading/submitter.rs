//! Order submission: TP/SL trigger computation and single-shot
//! self-healing retries for known rejection classes.
//!
//! Three rejections are healed, each with exactly one resubmission whose
//! verdict is terminal:
//! - a TP trigger on the wrong side of the price is flipped across it;
//! - a position-cap rejection clamps to the parsed cap (recording it in
//!   the [`CapCache`]) or halves when the cap is unparseable;
//! - an insufficient-margin rejection halves the size.
//!
//! A submission can therefore reach the exchange at most twice.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::caps::CapCache;
use crate::exchange::{
    Exchange, MarginMode, OrderRequest, OrderSide, PlaceOutcome, PosSide, RejectionKind,
    TriggerPriceType, TriggerSpec,
};
use crate::oracle::Direction;

/// Decimal places kept on computed trigger prices.
const TRIGGER_PRICE_DP: u32 = 6;
/// Minimum margin between price and trigger when flipping a rejected TP.
const MIN_FLIP_RATIO: Decimal = dec!(0.001);
/// Flip margin when the configured TP ratio is degenerate (zero).
const DEFAULT_FLIP_RATIO: Decimal = dec!(0.01);

/// Everything needed to submit one entry order.
#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub inst_id: String,
    pub direction: Direction,
    /// `Net` on net-mode accounts, explicit long/short otherwise.
    pub pos_side: PosSide,
    pub margin_mode: MarginMode,
    pub contracts: u64,
    pub leverage: u32,
    /// Last traded price; the reference for both triggers.
    pub last: Decimal,
    pub tp_ratio: Decimal,
    pub sl_ratio: Decimal,
    pub tp_trigger_type: TriggerPriceType,
    pub sl_trigger_type: TriggerPriceType,
}

/// Submits entry orders against an exchange, healing known rejections.
pub struct OrderSubmitter {
    exchange: Arc<dyn Exchange>,
    caps: Arc<CapCache>,
}

impl OrderSubmitter {
    pub fn new(exchange: Arc<dyn Exchange>, caps: Arc<CapCache>) -> Self {
        Self { exchange, caps }
    }

    /// Submit an entry order. Returns the exchange order id on success and
    /// `None` on any failed open; the trading loop treats `None` as
    /// "retry next cycle", never as fatal.
    pub async fn submit(&self, entry: &EntryOrder) -> Option<String> {
        // Leverage is best-effort: a failure here surfaces later as an
        // order rejection if it actually matters.
        if let Err(e) = self
            .exchange
            .set_leverage(&entry.inst_id, entry.leverage, entry.margin_mode, entry.pos_side)
            .await
        {
            warn!(
                inst_id = %entry.inst_id,
                leverage = entry.leverage,
                error = %e,
                "Leverage update failed, submitting anyway"
            );
        }

        let order = build_entry_request(entry);
        let outcome = match self.exchange.place_order(&order).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(inst_id = %entry.inst_id, error = %e, "Order submission failed in transit");
                return None;
            }
        };

        match outcome {
            PlaceOutcome::Accepted { order_id } if !order_id.is_empty() => Some(order_id),
            PlaceOutcome::Accepted { .. } => {
                warn!(inst_id = %entry.inst_id, "Exchange accepted the order without an order id");
                None
            }
            PlaceOutcome::Rejected(rejection) => {
                warn!(
                    inst_id = %entry.inst_id,
                    code = %rejection.code,
                    message = %rejection.message,
                    "Order rejected"
                );
                match rejection.kind {
                    RejectionKind::TpSideInvalid => self.retry_flipped_tp(entry, &order).await,
                    RejectionKind::SizeCapExceeded => {
                        self.retry_below_cap(entry, &order, rejection.max_size).await
                    }
                    RejectionKind::InsufficientMargin => self.retry_halved(entry, &order).await,
                    RejectionKind::Other => None,
                }
            }
        }
    }

    /// Heal a wrong-side TP trigger by flipping it across the last price.
    async fn retry_flipped_tp(&self, entry: &EntryOrder, order: &OrderRequest) -> Option<String> {
        let tp = order.take_profit?;
        let flipped = flipped_take_profit(entry.last, tp.trigger_px, entry.tp_ratio);
        info!(
            inst_id = %entry.inst_id,
            rejected_tp = %tp.trigger_px,
            flipped_tp = %flipped,
            "Retrying with flipped TP trigger"
        );

        let mut retry = order.clone();
        retry.take_profit = Some(TriggerSpec {
            trigger_px: flipped,
            trigger_px_type: tp.trigger_px_type,
        });
        self.place_terminal(&retry).await
    }

    /// Heal a position-cap rejection. The parsed cap is recorded before the
    /// size comparison so future planning benefits even when no retry fires.
    async fn retry_below_cap(
        &self,
        entry: &EntryOrder,
        order: &OrderRequest,
        parsed_max: Option<u64>,
    ) -> Option<String> {
        let new_size = match parsed_max {
            Some(cap) => {
                self.caps.update(&entry.inst_id, entry.leverage, cap).await;
                order.size.min(cap).max(1)
            }
            // Cap not stated in the rejection: back off by half
            None => (order.size / 2).max(1),
        };
        if new_size == order.size {
            return None;
        }

        info!(
            inst_id = %entry.inst_id,
            from = order.size,
            to = new_size,
            "Retrying below the position cap"
        );
        let mut retry = order.clone();
        retry.size = new_size;
        self.place_terminal(&retry).await
    }

    /// Heal an insufficient-margin rejection by halving, when halving is
    /// possible.
    async fn retry_halved(&self, entry: &EntryOrder, order: &OrderRequest) -> Option<String> {
        if order.size <= 1 {
            return None;
        }
        let new_size = (order.size / 2).max(1);
        info!(
            inst_id = %entry.inst_id,
            from = order.size,
            to = new_size,
            "Retrying at half size after margin rejection"
        );
        let mut retry = order.clone();
        retry.size = new_size;
        self.place_terminal(&retry).await
    }

    /// The single resubmission. Whatever comes back is the final verdict.
    async fn place_terminal(&self, order: &OrderRequest) -> Option<String> {
        match self.exchange.place_order(order).await {
            Ok(outcome) => {
                if let PlaceOutcome::Rejected(rej) = &outcome {
                    warn!(
                        inst_id = %order.inst_id,
                        code = %rej.code,
                        message = %rej.message,
                        "Retry rejected"
                    );
                }
                outcome.order_id().map(str::to_string)
            }
            Err(e) => {
                warn!(inst_id = %order.inst_id, error = %e, "Retry failed in transit");
                None
            }
        }
    }
}

/// Build the wire request for an entry, with both triggers computed from
/// the last price.
fn build_entry_request(entry: &EntryOrder) -> OrderRequest {
    let side = entry.direction.order_side();
    let is_long = is_long_entry(entry.pos_side, side);

    OrderRequest {
        inst_id: entry.inst_id.clone(),
        side,
        pos_side: entry.pos_side,
        margin_mode: entry.margin_mode,
        size: entry.contracts,
        take_profit: Some(TriggerSpec {
            trigger_px: take_profit_trigger(entry.last, entry.tp_ratio, is_long),
            trigger_px_type: entry.tp_trigger_type,
        }),
        stop_loss: Some(TriggerSpec {
            trigger_px: stop_loss_trigger(entry.last, entry.sl_ratio, is_long),
            trigger_px_type: entry.sl_trigger_type,
        }),
    }
}

/// Trigger direction: an explicit position side wins; net mode infers long
/// from a buy entry.
fn is_long_entry(pos_side: PosSide, side: OrderSide) -> bool {
    match pos_side {
        PosSide::Long => true,
        PosSide::Short => false,
        PosSide::Net => side == OrderSide::Buy,
    }
}

/// TP trigger price relative to `last`.
///
/// Long targets `last * (1 + ratio)`; if a degenerate ratio lands the
/// trigger at or below `last`, it is pushed to `last * 1.002` so the
/// trigger always sits strictly above. Short mirrors downward with a
/// `0.998` guard.
fn take_profit_trigger(last: Decimal, ratio: Decimal, is_long: bool) -> Decimal {
    let ratio = ratio.abs();
    let px = if is_long {
        let px = last * (Decimal::ONE + ratio);
        if px <= last {
            last * dec!(1.002)
        } else {
            px
        }
    } else {
        let px = last * (Decimal::ONE - ratio);
        if px >= last {
            last * dec!(0.998)
        } else {
            px
        }
    };
    px.round_dp(TRIGGER_PRICE_DP)
}

/// SL trigger price relative to `last`; the mirror of the TP logic.
fn stop_loss_trigger(last: Decimal, ratio: Decimal, is_long: bool) -> Decimal {
    let ratio = ratio.abs();
    let px = if is_long {
        let px = last * (Decimal::ONE - ratio);
        if px >= last {
            last * dec!(0.998)
        } else {
            px
        }
    } else {
        let px = last * (Decimal::ONE + ratio);
        if px <= last {
            last * dec!(1.002)
        } else {
            px
        }
    };
    px.round_dp(TRIGGER_PRICE_DP)
}

/// Move a rejected TP trigger to the other side of `last`, keeping at
/// least [`MIN_FLIP_RATIO`] of distance.
fn flipped_take_profit(last: Decimal, rejected_tp: Decimal, ratio: Decimal) -> Decimal {
    let base = ratio.abs();
    let base = if base.is_zero() {
        DEFAULT_FLIP_RATIO
    } else {
        base
    };
    let margin = base.max(MIN_FLIP_RATIO);

    let px = if rejected_tp >= last {
        last * (Decimal::ONE - margin)
    } else {
        last * (Decimal::ONE + margin)
    };
    px.round_dp(TRIGGER_PRICE_DP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{
        Candle, ExchangeError, OrderRejection, PositionMode, PositionRecord,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted exchange: pops one pre-programmed outcome per placement and
    /// records every request it saw.
    struct ScriptedExchange {
        outcomes: Mutex<VecDeque<Result<PlaceOutcome, ExchangeError>>>,
        placed: Mutex<Vec<OrderRequest>>,
    }

    impl ScriptedExchange {
        fn new(outcomes: Vec<Result<PlaceOutcome, ExchangeError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                placed: Mutex::new(Vec::new()),
            }
        }

        fn placed(&self) -> Vec<OrderRequest> {
            self.placed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn usdt_balance(&self) -> Result<Decimal, ExchangeError> {
            Ok(dec!(1000))
        }

        async fn candles(
            &self,
            _inst_id: &str,
            _bar: &str,
            _limit: u32,
        ) -> Result<Vec<Candle>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn last_price(&self, _inst_id: &str) -> Result<Decimal, ExchangeError> {
            Ok(dec!(30000))
        }

        async fn positions(
            &self,
            _inst_id: Option<&str>,
        ) -> Result<Vec<PositionRecord>, ExchangeError> {
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

        async fn place_order(&self, order: &OrderRequest) -> Result<PlaceOutcome, ExchangeError> {
            self.placed.lock().unwrap().push(order.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Ok(PlaceOutcome::Rejected(OrderRejection {
                        kind: RejectionKind::Other,
                        max_size: None,
                        code: "none".to_string(),
                        message: "script exhausted".to_string(),
                    }))
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

    fn accepted(id: &str) -> Result<PlaceOutcome, ExchangeError> {
        Ok(PlaceOutcome::Accepted {
            order_id: id.to_string(),
        })
    }

    fn rejected(kind: RejectionKind, max_size: Option<u64>) -> Result<PlaceOutcome, ExchangeError> {
        Ok(PlaceOutcome::Rejected(OrderRejection {
            kind,
            max_size,
            code: "51xxx".to_string(),
            message: "rejected".to_string(),
        }))
    }

    fn transport_error() -> Result<PlaceOutcome, ExchangeError> {
        Err(ExchangeError::Api {
            code: "-1".to_string(),
            message: "connection reset".to_string(),
        })
    }

    fn entry(contracts: u64) -> EntryOrder {
        EntryOrder {
            inst_id: "BTC-USDT-SWAP".to_string(),
            direction: Direction::Long,
            pos_side: PosSide::Net,
            margin_mode: MarginMode::Cross,
            contracts,
            leverage: 100,
            last: dec!(30000),
            tp_ratio: dec!(0.02),
            sl_ratio: dec!(0.01),
            tp_trigger_type: TriggerPriceType::Last,
            sl_trigger_type: TriggerPriceType::Last,
        }
    }

    fn submitter(
        outcomes: Vec<Result<PlaceOutcome, ExchangeError>>,
    ) -> (OrderSubmitter, Arc<ScriptedExchange>, Arc<CapCache>) {
        let exchange = Arc::new(ScriptedExchange::new(outcomes));
        let caps = Arc::new(CapCache::new());
        let sub = OrderSubmitter::new(exchange.clone(), caps.clone());
        (sub, exchange, caps)
    }

    #[tokio::test]
    async fn test_accepted_first_try() {
        let (sub, exchange, _) = submitter(vec![accepted("ord-1")]);

        let result = sub.submit(&entry(3)).await;
        assert_eq!(result, Some("ord-1".to_string()));

        let placed = exchange.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Buy);
        assert_eq!(placed[0].size, 3);
        // Long entry: TP strictly above, SL strictly below the last price
        assert_eq!(placed[0].take_profit.unwrap().trigger_px, dec!(30600));
        assert_eq!(placed[0].stop_loss.unwrap().trigger_px, dec!(29700));
    }

    #[tokio::test]
    async fn test_accepted_without_order_id_is_failure() {
        let (sub, exchange, _) = submitter(vec![accepted("")]);

        assert_eq!(sub.submit(&entry(1)).await, None);
        assert_eq!(exchange.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_no_order_id() {
        let (sub, exchange, _) = submitter(vec![transport_error()]);

        assert_eq!(sub.submit(&entry(1)).await, None);
        assert_eq!(exchange.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_tp_rejection_flips_trigger_once() {
        let (sub, exchange, _) = submitter(vec![
            rejected(RejectionKind::TpSideInvalid, None),
            accepted("ord-2"),
        ]);

        let result = sub.submit(&entry(2)).await;
        assert_eq!(result, Some("ord-2".to_string()));

        let placed = exchange.placed();
        assert_eq!(placed.len(), 2);
        let first_tp = placed[0].take_profit.unwrap().trigger_px;
        let retry_tp = placed[1].take_profit.unwrap().trigger_px;
        // First TP sat above last; the retry flips below with the same 2%
        assert_eq!(first_tp, dec!(30600));
        assert_eq!(retry_tp, dec!(29400));
        // Size and SL are untouched by the flip
        assert_eq!(placed[1].size, 2);
        assert_eq!(
            placed[1].stop_loss.unwrap().trigger_px,
            placed[0].stop_loss.unwrap().trigger_px
        );
    }

    #[tokio::test]
    async fn test_second_tp_rejection_is_terminal() {
        let (sub, exchange, _) = submitter(vec![
            rejected(RejectionKind::TpSideInvalid, None),
            rejected(RejectionKind::TpSideInvalid, None),
        ]);

        assert_eq!(sub.submit(&entry(2)).await, None);
        // Never more than two attempts per submission
        assert_eq!(exchange.placed().len(), 2);
    }

    #[tokio::test]
    async fn test_cap_rejection_clamps_and_caches() {
        let (sub, exchange, caps) = submitter(vec![
            rejected(RejectionKind::SizeCapExceeded, Some(1500)),
            accepted("ord-3"),
        ]);

        let result = sub.submit(&entry(2000)).await;
        assert_eq!(result, Some("ord-3".to_string()));

        let placed = exchange.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[1].size, 1500);
        assert_eq!(caps.get("BTC-USDT-SWAP", 100).await, Some(1500));
    }

    #[tokio::test]
    async fn test_cap_rejection_caches_even_without_retry() {
        // The stated cap is not below the requested size, so no retry
        // fires, but the cap is still recorded for future planning.
        let (sub, exchange, caps) = submitter(vec![rejected(
            RejectionKind::SizeCapExceeded,
            Some(1500),
        )]);

        assert_eq!(sub.submit(&entry(1500)).await, None);
        assert_eq!(exchange.placed().len(), 1);
        assert_eq!(caps.get("BTC-USDT-SWAP", 100).await, Some(1500));
    }

    #[tokio::test]
    async fn test_cap_rejection_without_parsed_cap_halves() {
        let (sub, exchange, caps) = submitter(vec![
            rejected(RejectionKind::SizeCapExceeded, None),
            accepted("ord-4"),
        ]);

        assert_eq!(sub.submit(&entry(9)).await, Some("ord-4".to_string()));
        assert_eq!(exchange.placed()[1].size, 4);
        assert_eq!(caps.get("BTC-USDT-SWAP", 100).await, None);
    }

    #[tokio::test]
    async fn test_cap_rejection_at_size_one_does_not_retry() {
        let (sub, exchange, _) =
            submitter(vec![rejected(RejectionKind::SizeCapExceeded, None)]);

        assert_eq!(sub.submit(&entry(1)).await, None);
        assert_eq!(exchange.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_margin_rejection_halves_once() {
        let (sub, exchange, _) = submitter(vec![
            rejected(RejectionKind::InsufficientMargin, None),
            accepted("ord-5"),
        ]);

        assert_eq!(sub.submit(&entry(4)).await, Some("ord-5".to_string()));
        assert_eq!(exchange.placed()[1].size, 2);
    }

    #[tokio::test]
    async fn test_margin_rejection_at_size_one_does_not_retry() {
        let (sub, exchange, _) =
            submitter(vec![rejected(RejectionKind::InsufficientMargin, None)]);

        assert_eq!(sub.submit(&entry(1)).await, None);
        assert_eq!(exchange.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_unclassified_rejection_does_not_retry() {
        let (sub, exchange, _) = submitter(vec![rejected(RejectionKind::Other, None)]);

        assert_eq!(sub.submit(&entry(5)).await, None);
        assert_eq!(exchange.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_short_entry_triggers_mirror() {
        let (sub, exchange, _) = submitter(vec![accepted("ord-6")]);

        let mut short = entry(1);
        short.direction = Direction::Short;
        sub.submit(&short).await;

        let placed = exchange.placed();
        assert_eq!(placed[0].side, OrderSide::Sell);
        // Short: TP below, SL above
        assert_eq!(placed[0].take_profit.unwrap().trigger_px, dec!(29400));
        assert_eq!(placed[0].stop_loss.unwrap().trigger_px, dec!(30300));
    }

    #[test]
    fn test_trigger_clamps_for_zero_ratio() {
        // A zero ratio must still place the TP strictly beyond the price
        assert_eq!(
            take_profit_trigger(dec!(30000), Decimal::ZERO, true),
            dec!(30060)
        );
        assert_eq!(
            take_profit_trigger(dec!(30000), Decimal::ZERO, false),
            dec!(29940)
        );
        assert_eq!(
            stop_loss_trigger(dec!(30000), Decimal::ZERO, true),
            dec!(29940)
        );
        assert_eq!(
            stop_loss_trigger(dec!(30000), Decimal::ZERO, false),
            dec!(30060)
        );
    }

    #[test]
    fn test_trigger_uses_ratio_magnitude() {
        assert_eq!(
            take_profit_trigger(dec!(30000), dec!(-0.02), true),
            dec!(30600)
        );
        assert_eq!(
            stop_loss_trigger(dec!(30000), dec!(-0.01), true),
            dec!(29700)
        );
    }

    #[test]
    fn test_trigger_rounded_to_six_places() {
        let px = take_profit_trigger(dec!(0.123456789), dec!(0.02), true);
        assert_eq!(px, dec!(0.125926));
    }

    #[test]
    fn test_flip_direction_and_margin() {
        // Rejected above the price: flip below with the full ratio
        assert_eq!(
            flipped_take_profit(dec!(30000), dec!(30600), dec!(0.02)),
            dec!(29400)
        );
        // Rejected below the price: flip above
        assert_eq!(
            flipped_take_profit(dec!(30000), dec!(29400), dec!(0.02)),
            dec!(30600)
        );
        // Tiny ratios widen to the minimum flip margin
        assert_eq!(
            flipped_take_profit(dec!(30000), dec!(30001), dec!(0.0001)),
            dec!(29970)
        );
        // Zero ratio widens to the default margin
        assert_eq!(
            flipped_take_profit(dec!(30000), dec!(30060), Decimal::ZERO),
            dec!(29700)
        );
    }

    #[test]
    fn test_is_long_entry_resolution() {
        assert!(is_long_entry(PosSide::Long, OrderSide::Sell));
        assert!(!is_long_entry(PosSide::Short, OrderSide::Buy));
        assert!(is_long_entry(PosSide::Net, OrderSide::Buy));
        assert!(!is_long_entry(PosSide::Net, OrderSide::Sell));
    }
}
