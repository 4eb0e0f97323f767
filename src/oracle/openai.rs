//! OpenAI-compatible chat client for direction decisions.
//!
//! Posts the instrument id plus a window of recent candles to a
//! `/chat/completions` endpoint and expects a one-word `long`/`short`
//! answer. Any transport failure, non-success status, or ambiguous reply
//! degrades to the momentum heuristic; the trading loop never sees an
//! oracle error.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{momentum_direction, Direction, DirectionOracle};
use crate::exchange::Candle;

/// Most recent bars included in the prompt.
const PROMPT_CANDLE_LIMIT: usize = 120;
/// Momentum window used when the chat call fails or is ambiguous.
const FALLBACK_LOOKBACK: usize = 10;
/// Keep the trading loop from blocking on a slow completion.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const SYSTEM_PROMPT: &str = "You are a quantitative strategy assistant for crypto derivatives. \
Decide the contract direction for the next bar: long or short. \
Reply with exactly one word, long or short. \
Weigh trend, momentum, volatility, and the recent take-profit/stop-loss range.";

/// Chat-completions oracle for any OpenAI-compatible service.
pub struct OpenAiOracle {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct PromptPayload<'a> {
    inst_id: &'a str,
    candles_schema: &'static str,
    recent_candles: &'a [Candle],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl OpenAiOracle {
    /// Create a new chat oracle.
    ///
    /// # Arguments
    /// * `api_key` - Bearer token for the service
    /// * `base_url` - Service base URL, e.g. `https://api.openai.com/v1`
    /// * `model` - Model name, e.g. `gpt-4o-mini`
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    async fn ask(&self, inst_id: &str, candles: &[Candle]) -> Result<Direction> {
        let window = &candles[..candles.len().min(PROMPT_CANDLE_LIMIT)];
        let payload = PromptPayload {
            inst_id,
            candles_schema: "{ts, open, high, low, close, volume}, newest first",
            recent_candles: window,
        };

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: serde_json::to_string(&payload)?,
                },
            ],
            temperature: 0.2,
            max_tokens: 4,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion failed: {} - {}", status, text));
        }

        let parsed: ChatResponse = resp.json().await.context("Failed to parse chat response")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_lowercase())
            .unwrap_or_default();
        debug!(inst_id = %inst_id, answer = %content, "Chat oracle answered");

        parse_decision(&content).ok_or_else(|| anyhow!("ambiguous model answer: {:?}", content))
    }
}

/// Accept only an unambiguous answer: exactly one of the two keywords.
fn parse_decision(content: &str) -> Option<Direction> {
    let has_long = content.contains("long");
    let has_short = content.contains("short");
    match (has_long, has_short) {
        (true, false) => Some(Direction::Long),
        (false, true) => Some(Direction::Short),
        _ => None,
    }
}

#[async_trait]
impl DirectionOracle for OpenAiOracle {
    async fn decide(&self, inst_id: &str, candles: &[Candle]) -> Direction {
        match self.ask(inst_id, candles).await {
            Ok(direction) => direction,
            Err(e) => {
                warn!(
                    inst_id = %inst_id,
                    error = %e,
                    "Chat decision failed, falling back to momentum"
                );
                momentum_direction(candles, FALLBACK_LOOKBACK)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision_single_keyword() {
        assert_eq!(parse_decision("long"), Some(Direction::Long));
        assert_eq!(parse_decision("short"), Some(Direction::Short));
        assert_eq!(parse_decision("go long here"), Some(Direction::Long));
    }

    #[test]
    fn test_parse_decision_ambiguous() {
        assert_eq!(parse_decision(""), None);
        assert_eq!(parse_decision("hold"), None);
        assert_eq!(parse_decision("long or short"), None);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let oracle = OpenAiOracle::new("key", "https://api.openai.com/v1/", "gpt-4o-mini").unwrap();
        assert_eq!(oracle.base_url, "https://api.openai.com/v1");
    }
}
