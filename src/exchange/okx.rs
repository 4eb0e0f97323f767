//! OKX v5 REST adapter.
//!
//! Covers the account, market-data and trade endpoints the trading loop
//! needs. Every request is signed with the account's API credentials;
//! demo accounts additionally send the simulated-trading header. Order
//! placement maps the exchange's rejection codes onto [`RejectionKind`]
//! so the submitter can react without parsing exchange messages itself.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use super::{
    Candle, Exchange, ExchangeError, MarginMode, OrderRejection, OrderRequest, OrderSide,
    PlaceOutcome, PosSide, PositionMode, PositionRecord, RejectionKind,
};

/// REST domain for demo (paper) accounts.
const DEMO_URL: &str = "https://www.okx.com";
/// REST domain for live accounts.
const LIVE_URL: &str = "https://www.okx.me";

const HTTP_TIMEOUT_SECS: u64 = 30;

type HmacSha256 = Hmac<Sha256>;

/// API credentials for an OKX account.
#[derive(Debug, Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

/// Signed REST client for the OKX v5 API.
pub struct OkxClient {
    http: Client,
    credentials: OkxCredentials,
    base_url: &'static str,
    demo: bool,
}

impl OkxClient {
    /// Create a client. `demo` selects the paper-trading domain and adds
    /// the simulated-trading header to every request.
    pub fn new(credentials: OkxCredentials, demo: bool) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            credentials,
            base_url: if demo { DEMO_URL } else { LIVE_URL },
            demo,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>, ExchangeError> {
        self.request(Method::GET, path, String::new()).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiEnvelope<T>, ExchangeError> {
        let payload = serde_json::to_string(body)?;
        self.request(Method::POST, path, payload).await
    }

    /// Send a signed request. The signature covers the exact body bytes
    /// that go on the wire.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: String,
    ) -> Result<ApiEnvelope<T>, ExchangeError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let signature = sign_request(
            &self.credentials.api_secret,
            &timestamp,
            method.as_str(),
            path,
            &body,
        )?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .header("Content-Type", "application/json");
        if self.demo {
            request = request.header("x-simulated-trading", "1");
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Api {
                code: status.as_u16().to_string(),
                message: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Exchange for OkxClient {
    async fn usdt_balance(&self) -> Result<Decimal, ExchangeError> {
        let data: Vec<BalanceData> = ok_data(self.get("/api/v5/account/balance").await?)?;
        let balance = data
            .into_iter()
            .next()
            .map(|d| d.details)
            .unwrap_or_default()
            .into_iter()
            .find(|d| d.ccy == "USDT")
            .map(|d| parse_decimal(&d.avail_bal))
            .unwrap_or_default();
        Ok(balance)
    }

    async fn candles(
        &self,
        inst_id: &str,
        bar: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let path =
            format!("/api/v5/market/history-candles?instId={inst_id}&bar={bar}&limit={limit}");
        let rows: Vec<Vec<String>> = ok_data(self.get(&path).await?)?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_candle(&row) {
                Some(candle) => candles.push(candle),
                None => warn!(inst_id = %inst_id, "Dropping malformed candle row"),
            }
        }
        Ok(candles)
    }

    async fn last_price(&self, inst_id: &str) -> Result<Decimal, ExchangeError> {
        let path = format!("/api/v5/market/ticker?instId={inst_id}");
        let data: Vec<TickerData> = ok_data(self.get(&path).await?)?;
        Ok(data.first().map(|t| parse_decimal(&t.last)).unwrap_or_default())
    }

    async fn positions(&self, inst_id: Option<&str>) -> Result<Vec<PositionRecord>, ExchangeError> {
        let path = match inst_id {
            Some(id) => format!("/api/v5/account/positions?instId={id}"),
            None => "/api/v5/account/positions".to_string(),
        };
        let data: Vec<PositionData> = ok_data(self.get(&path).await?)?;
        Ok(data.into_iter().map(position_record).collect())
    }

    async fn position_mode(&self) -> PositionMode {
        let result = self
            .get::<AccountConfigData>("/api/v5/account/config")
            .await
            .and_then(ok_data);
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Could not read account config, assuming net mode");
                return PositionMode::Net;
            }
        };
        match data.first().map(|c| c.pos_mode.as_str()) {
            Some("long_short_mode") | Some("long_short") => PositionMode::LongShort,
            _ => PositionMode::Net,
        }
    }

    async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: u32,
        margin_mode: MarginMode,
        pos_side: PosSide,
    ) -> Result<(), ExchangeError> {
        let body = SetLeverageBody {
            inst_id,
            lever: leverage.to_string(),
            mgn_mode: margin_mode.as_str(),
            pos_side: wire_pos_side(pos_side),
        };
        ok_data::<serde_json::Value>(self.post("/api/v5/account/set-leverage", &body).await?)?;
        Ok(())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<PlaceOutcome, ExchangeError> {
        let body = order_body(order);
        debug!(inst_id = %order.inst_id, side = order.side.as_str(), sz = order.size, "Submitting order");

        let envelope: ApiEnvelope<OrderAck> = self.post("/api/v5/trade/order", &body).await?;
        let ack = envelope.data.into_iter().next();

        if envelope.code == "0" {
            if let Some(ack) = &ack {
                if !ack.ord_id.is_empty() {
                    return Ok(PlaceOutcome::Accepted {
                        order_id: ack.ord_id.clone(),
                    });
                }
            }
        }

        // Per-order codes live in the data array; the envelope code is the
        // fallback when that array is missing.
        let (code, message) = match ack {
            Some(a) if !a.s_code.is_empty() => (a.s_code, a.s_msg),
            _ => (envelope.code, envelope.msg),
        };
        Ok(PlaceOutcome::Rejected(classify_rejection(&code, &message)))
    }

    async fn cancel_open_orders(&self, inst_id: &str) -> Result<usize, ExchangeError> {
        let path = format!("/api/v5/trade/orders-pending?instId={inst_id}");
        let orders: Vec<PendingOrderData> = ok_data(self.get(&path).await?)?;

        let mut cancelled = 0;
        for order in orders {
            if order.state != "live" && order.state != "partially_filled" {
                continue;
            }
            let body = CancelOrderBody {
                inst_id,
                ord_id: &order.ord_id,
            };
            let result = self
                .post::<_, serde_json::Value>("/api/v5/trade/cancel-order", &body)
                .await
                .and_then(ok_data);
            match result {
                Ok(_) => cancelled += 1,
                Err(e) => {
                    warn!(inst_id = %inst_id, ord_id = %order.ord_id, error = %e, "Cancel failed")
                }
            }
        }
        Ok(cancelled)
    }

    async fn cancel_trigger_orders(&self, inst_id: &str) -> Result<usize, ExchangeError> {
        let mut algo_ids = Vec::new();
        for ord_type in ["conditional", "oco"] {
            let path =
                format!("/api/v5/trade/orders-algo-pending?ordType={ord_type}&instId={inst_id}");
            let algos: Vec<AlgoOrderData> = ok_data(self.get(&path).await?)?;
            algo_ids.extend(
                algos
                    .into_iter()
                    .filter(|a| a.state == "live")
                    .map(|a| a.algo_id),
            );
        }
        if algo_ids.is_empty() {
            return Ok(0);
        }

        let body: Vec<CancelAlgoBody> = algo_ids
            .iter()
            .map(|algo_id| CancelAlgoBody { inst_id, algo_id })
            .collect();
        ok_data::<serde_json::Value>(self.post("/api/v5/trade/cancel-algos", &body).await?)?;
        Ok(body.len())
    }

    async fn close_position_market(
        &self,
        inst_id: &str,
        pos_side: PosSide,
        size: Option<u64>,
        margin_mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        let side;
        let contracts;
        match pos_side {
            PosSide::Long | PosSide::Short => {
                side = if pos_side == PosSide::Long {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                };
                contracts = match size {
                    Some(n) => n,
                    None => match self.position_summary(inst_id).await? {
                        Some(record) => contract_count(record.size),
                        None => 0,
                    },
                };
            }
            // Net mode: the position sign decides the closing side.
            PosSide::Net => {
                let Some(record) = self.position_summary(inst_id).await? else {
                    return Ok(());
                };
                side = if record.size >= Decimal::ZERO {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                };
                contracts = size.unwrap_or_else(|| contract_count(record.size));
            }
        }
        if contracts == 0 {
            return Ok(());
        }

        let body = PlaceOrderBody {
            inst_id,
            td_mode: margin_mode.as_str(),
            side: side.as_str(),
            ord_type: "market",
            sz: contracts.to_string(),
            pos_side: wire_pos_side(pos_side),
            attach_algo_ords: Vec::new(),
        };
        let envelope: ApiEnvelope<OrderAck> = self.post("/api/v5/trade/order", &body).await?;
        if envelope.code != "0" {
            let (code, message) = match envelope.data.into_iter().next() {
                Some(a) if !a.s_code.is_empty() => (a.s_code, a.s_msg),
                _ => (envelope.code, envelope.msg),
            };
            return Err(ExchangeError::Api { code, message });
        }

        // The TP/SL triggers of the closed position must not linger.
        if let Err(e) = self.cancel_trigger_orders(inst_id).await {
            warn!(inst_id = %inst_id, error = %e, "Could not cancel leftover trigger orders");
        }
        Ok(())
    }

    async fn position_summary(
        &self,
        inst_id: &str,
    ) -> Result<Option<PositionRecord>, ExchangeError> {
        let positions = self.positions(Some(inst_id)).await?;
        Ok(positions.into_iter().find(|p| p.inst_id == inst_id))
    }
}

/// HMAC-SHA256 over `timestamp + METHOD + path + body`, base64 encoded.
/// For GET requests the path includes the query string and the body is
/// empty.
fn sign_request(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Auth(format!("unusable api secret: {e}")))?;
    mac.update(format!("{timestamp}{method}{request_path}{body}").as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Standard OKX response envelope. `code` is `"0"` on success; errors put
/// the detail either in `msg` or in per-item `sCode`/`sMsg` fields.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    // Plain #[serde(default)] would put a `T: Default` bound on the
    // derived impl; the explicit path does not.
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

fn ok_data<T>(envelope: ApiEnvelope<T>) -> Result<Vec<T>, ExchangeError> {
    if envelope.code != "0" {
        return Err(ExchangeError::Api {
            code: envelope.code,
            message: envelope.msg,
        });
    }
    Ok(envelope.data)
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    #[serde(default)]
    details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDetail {
    #[serde(default)]
    ccy: String,
    #[serde(default)]
    avail_bal: String,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(default)]
    last: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionData {
    #[serde(default)]
    inst_id: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    pos: String,
    #[serde(default)]
    realized_pnl_ratio: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountConfigData {
    #[serde(default)]
    pos_mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingOrderData {
    #[serde(default)]
    ord_id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlgoOrderData {
    #[serde(default)]
    algo_id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    #[serde(default)]
    ord_id: String,
    #[serde(default)]
    s_code: String,
    #[serde(default)]
    s_msg: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLeverageBody<'a> {
    inst_id: &'a str,
    lever: String,
    mgn_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos_side: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderBody<'a> {
    inst_id: &'a str,
    td_mode: &'a str,
    side: &'a str,
    ord_type: &'a str,
    sz: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos_side: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attach_algo_ords: Vec<AttachedTriggerBody>,
}

/// TP/SL legs attached to an entry order. `tpOrdPx`/`slOrdPx` of `-1`
/// means execute at market once triggered.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachedTriggerBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    tp_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tp_trigger_px_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tp_ord_px: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sl_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sl_trigger_px_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sl_ord_px: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelOrderBody<'a> {
    inst_id: &'a str,
    ord_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelAlgoBody<'a> {
    inst_id: &'a str,
    algo_id: &'a str,
}

fn order_body(order: &OrderRequest) -> PlaceOrderBody<'_> {
    let mut trigger = AttachedTriggerBody::default();
    if let Some(tp) = order.take_profit {
        trigger.tp_trigger_px = Some(format_px(tp.trigger_px));
        trigger.tp_trigger_px_type = Some(tp.trigger_px_type.as_str());
        trigger.tp_ord_px = Some("-1");
    }
    if let Some(sl) = order.stop_loss {
        trigger.sl_trigger_px = Some(format_px(sl.trigger_px));
        trigger.sl_trigger_px_type = Some(sl.trigger_px_type.as_str());
        trigger.sl_ord_px = Some("-1");
    }
    let attach_algo_ords = if order.take_profit.is_some() || order.stop_loss.is_some() {
        vec![trigger]
    } else {
        Vec::new()
    };

    PlaceOrderBody {
        inst_id: &order.inst_id,
        td_mode: order.margin_mode.as_str(),
        side: order.side.as_str(),
        ord_type: "market",
        sz: order.size.to_string(),
        pos_side: wire_pos_side(order.pos_side),
        attach_algo_ords,
    }
}

/// Net-mode accounts reject an explicit position side, so the field is
/// only sent for long/short.
fn wire_pos_side(pos_side: PosSide) -> Option<&'static str> {
    match pos_side {
        PosSide::Net => None,
        other => Some(other.as_str()),
    }
}

/// Trigger prices go to the wire with six decimal places.
fn format_px(px: Decimal) -> String {
    format!("{px:.6}")
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or_default()
}

fn contract_count(size: Decimal) -> u64 {
    size.abs().trunc().to_u64().unwrap_or(0)
}

/// History rows come as string arrays: ts, open, high, low, close,
/// volume, then fields this client does not use.
fn parse_candle(row: &[String]) -> Option<Candle> {
    Some(Candle {
        ts: row.first()?.parse().ok()?,
        open: row.get(1)?.parse().ok()?,
        high: row.get(2)?.parse().ok()?,
        low: row.get(3)?.parse().ok()?,
        close: row.get(4)?.parse().ok()?,
        volume: row.get(5)?.parse().ok()?,
    })
}

fn position_record(data: PositionData) -> PositionRecord {
    PositionRecord {
        inst_id: data.inst_id,
        pos_side: match data.pos_side.as_str() {
            "long" => PosSide::Long,
            "short" => PosSide::Short,
            _ => PosSide::Net,
        },
        size: parse_decimal(&data.pos),
        realized_pnl_ratio: data.realized_pnl_ratio.parse().ok(),
    }
}

/// Map an order rejection onto the retry classes the submitter knows.
///
/// 51051/51052 are wrong-side TP triggers (also recognized from the
/// message text, since the code has shifted between API revisions).
/// 51004 is the per-leverage position cap and carries the cap in its
/// message. 51008 is insufficient margin.
fn classify_rejection(code: &str, message: &str) -> OrderRejection {
    let lower = message.to_lowercase();
    let kind = if code == "51052"
        || code == "51051"
        || (lower.contains("tp price") && (lower.contains("lower") || lower.contains("higher")))
    {
        RejectionKind::TpSideInvalid
    } else if code == "51004" {
        RejectionKind::SizeCapExceeded
    } else if code == "51008" {
        RejectionKind::InsufficientMargin
    } else {
        RejectionKind::Other
    };

    let max_size = if kind == RejectionKind::SizeCapExceeded {
        parse_position_cap(message)
    } else {
        None
    };

    OrderRejection {
        kind,
        max_size,
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Pull the maximum contract count out of a 51004 message, e.g.
/// `... you can open a maximum of 1,500(contracts) ...`.
fn parse_position_cap(message: &str) -> Option<u64> {
    static CONTRACTS: OnceLock<Regex> = OnceLock::new();
    static FALLBACK: OnceLock<Regex> = OnceLock::new();

    let contracts = CONTRACTS
        .get_or_init(|| Regex::new(r"([0-9,]+)\(contracts\)").expect("contracts regex is valid"));
    if let Some(value) = contracts
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
    {
        return Some(value);
    }

    let fallback = FALLBACK.get_or_init(|| {
        Regex::new(r"(?i)maximum position amount[^0-9]*([0-9,]+)")
            .expect("position amount regex is valid")
    });
    fallback
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{TriggerPriceType, TriggerSpec};
    use rust_decimal_macros::dec;

    fn credentials() -> OkxCredentials {
        OkxCredentials {
            api_key: "key".to_string(),
            api_secret: "abc123-secret".to_string(),
            passphrase: "pass".to_string(),
        }
    }

    #[test]
    fn test_sign_request_known_vectors() {
        // Vectors computed independently with a reference HMAC-SHA256
        let sig = sign_request(
            "abc123-secret",
            "2024-05-01T12:00:00.000Z",
            "GET",
            "/api/v5/account/balance",
            "",
        )
        .unwrap();
        assert_eq!(sig, "fBUsn0J0681j4kZAN/RWiKm8K89WFIFontlvgfS57To=");

        let sig = sign_request(
            "abc123-secret",
            "2024-05-01T12:00:00.000Z",
            "POST",
            "/api/v5/trade/order",
            "{\"instId\":\"BTC-USDT-SWAP\"}",
        )
        .unwrap();
        assert_eq!(sig, "Todf/ezFCRFVh3LF8HcxXUTE4SqrukbOdImpG5cyhL0=");
    }

    #[test]
    fn test_domain_selection() {
        let demo = OkxClient::new(credentials(), true).unwrap();
        assert_eq!(demo.base_url, DEMO_URL);
        assert!(demo.demo);

        let live = OkxClient::new(credentials(), false).unwrap();
        assert_eq!(live.base_url, LIVE_URL);
        assert!(!live.demo);
    }

    #[test]
    fn test_classify_tp_side_codes() {
        assert_eq!(
            classify_rejection("51052", "Your TP price should be lower").kind,
            RejectionKind::TpSideInvalid
        );
        assert_eq!(
            classify_rejection("51051", "Your TP price should be higher").kind,
            RejectionKind::TpSideInvalid
        );
        // Message heuristic catches shifted codes
        assert_eq!(
            classify_rejection(
                "51999",
                "TP price must be higher than the order price"
            )
            .kind,
            RejectionKind::TpSideInvalid
        );
    }

    #[test]
    fn test_classify_cap_parses_contract_count() {
        let rejection = classify_rejection(
            "51004",
            "Order failed. You can open a maximum of 1,500(contracts) at the current leverage.",
        );
        assert_eq!(rejection.kind, RejectionKind::SizeCapExceeded);
        assert_eq!(rejection.max_size, Some(1500));
    }

    #[test]
    fn test_classify_cap_fallback_phrase() {
        let rejection = classify_rejection(
            "51004",
            "Order amount exceeds the Maximum Position Amount: 3,000.",
        );
        assert_eq!(rejection.kind, RejectionKind::SizeCapExceeded);
        assert_eq!(rejection.max_size, Some(3000));
    }

    #[test]
    fn test_classify_cap_without_number() {
        let rejection = classify_rejection("51004", "Order size too large.");
        assert_eq!(rejection.kind, RejectionKind::SizeCapExceeded);
        assert_eq!(rejection.max_size, None);
    }

    #[test]
    fn test_classify_margin_and_other() {
        assert_eq!(
            classify_rejection("51008", "Insufficient margin").kind,
            RejectionKind::InsufficientMargin
        );
        let other = classify_rejection("51000", "Parameter error");
        assert_eq!(other.kind, RejectionKind::Other);
        assert_eq!(other.code, "51000");
    }

    #[test]
    fn test_order_body_net_mode() {
        let order = OrderRequest {
            inst_id: "BTC-USDT-SWAP".to_string(),
            side: OrderSide::Buy,
            pos_side: PosSide::Net,
            margin_mode: MarginMode::Cross,
            size: 3,
            take_profit: Some(TriggerSpec {
                trigger_px: dec!(30600),
                trigger_px_type: TriggerPriceType::Last,
            }),
            stop_loss: Some(TriggerSpec {
                trigger_px: dec!(29700),
                trigger_px_type: TriggerPriceType::Last,
            }),
        };

        let body = serde_json::to_value(order_body(&order)).unwrap();
        assert_eq!(body["instId"], "BTC-USDT-SWAP");
        assert_eq!(body["tdMode"], "cross");
        assert_eq!(body["side"], "buy");
        assert_eq!(body["ordType"], "market");
        assert_eq!(body["sz"], "3");
        // Net mode never sends posSide
        assert!(body.get("posSide").is_none());

        let attached = &body["attachAlgoOrds"][0];
        assert_eq!(attached["tpTriggerPx"], "30600.000000");
        assert_eq!(attached["tpTriggerPxType"], "last");
        assert_eq!(attached["tpOrdPx"], "-1");
        assert_eq!(attached["slTriggerPx"], "29700.000000");
        assert_eq!(attached["slOrdPx"], "-1");
    }

    #[test]
    fn test_order_body_long_short_mode() {
        let order = OrderRequest {
            inst_id: "ETH-USDT-SWAP".to_string(),
            side: OrderSide::Sell,
            pos_side: PosSide::Short,
            margin_mode: MarginMode::Isolated,
            size: 10,
            take_profit: None,
            stop_loss: None,
        };

        let body = serde_json::to_value(order_body(&order)).unwrap();
        assert_eq!(body["posSide"], "short");
        assert_eq!(body["tdMode"], "isolated");
        // No triggers requested, so the attach array is omitted entirely
        assert!(body.get("attachAlgoOrds").is_none());
    }

    #[test]
    fn test_format_px_six_places() {
        assert_eq!(format_px(dec!(30600)), "30600.000000");
        assert_eq!(format_px(dec!(0.125926)), "0.125926");
        assert_eq!(format_px(dec!(1.5)), "1.500000");
    }

    #[test]
    fn test_parse_candle_rows() {
        let row: Vec<String> = [
            "1700000000000",
            "30000.1",
            "30100.5",
            "29900.0",
            "30050.2",
            "1234",
            "extra",
            "fields",
            "1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let candle = parse_candle(&row).unwrap();
        assert_eq!(candle.ts, 1700000000000);
        assert_eq!(candle.open, dec!(30000.1));
        assert_eq!(candle.close, dec!(30050.2));
        assert_eq!(candle.volume, dec!(1234));

        // Too short or non-numeric rows are rejected
        let short: Vec<String> = ["1700000000000", "30000"].iter().map(|s| s.to_string()).collect();
        assert!(parse_candle(&short).is_none());
        let garbage: Vec<String> = ["ts", "a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        assert!(parse_candle(&garbage).is_none());
    }

    #[test]
    fn test_position_record_mapping() {
        let record = position_record(PositionData {
            inst_id: "BTC-USDT-SWAP".to_string(),
            pos_side: "net".to_string(),
            pos: "-2".to_string(),
            realized_pnl_ratio: "0.0314".to_string(),
        });
        assert_eq!(record.inst_id, "BTC-USDT-SWAP");
        assert_eq!(record.pos_side, PosSide::Net);
        assert_eq!(record.size, dec!(-2));
        assert_eq!(record.realized_pnl_ratio, Some(dec!(0.0314)));
        assert!(record.is_open());

        let flat = position_record(PositionData {
            inst_id: "BTC-USDT-SWAP".to_string(),
            pos_side: "long".to_string(),
            pos: "0".to_string(),
            realized_pnl_ratio: String::new(),
        });
        assert_eq!(flat.pos_side, PosSide::Long);
        assert_eq!(flat.realized_pnl_ratio, None);
        assert!(!flat.is_open());
    }

    #[test]
    fn test_envelope_rejection_parsing() {
        let raw = r#"{
            "code": "1",
            "msg": "Operation failed.",
            "data": [{"ordId": "", "sCode": "51008", "sMsg": "Insufficient margin"}]
        }"#;
        let envelope: ApiEnvelope<OrderAck> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.code, "1");
        let ack = envelope.data.into_iter().next().unwrap();
        assert_eq!(ack.s_code, "51008");
        assert!(ack.ord_id.is_empty());
    }

    #[test]
    fn test_envelope_accept_parsing() {
        let raw = r#"{
            "code": "0",
            "msg": "",
            "data": [{"ordId": "590908157585625111", "sCode": "0", "sMsg": ""}]
        }"#;
        let envelope: ApiEnvelope<OrderAck> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.code, "0");
        assert_eq!(envelope.data[0].ord_id, "590908157585625111");
    }
}
