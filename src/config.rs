//! Configuration loading and validation.
//!
//! Settings come from a YAML file (default `./config.yaml`) overlaid with
//! environment variables; the environment always wins. Every field has a
//! default, so the bot starts with no file at all and falls back to the
//! simulator and heuristic oracle when credentials are absent.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, File, FileFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::exchange::{MarginMode, OkxCredentials, TriggerPriceType};

/// Deployment target. Demo routes to the exchange's paper-trading
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Demo,
    Prod,
}

impl Environment {
    pub fn is_demo(&self) -> bool {
        matches!(self, Environment::Demo)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Demo => "demo",
            Environment::Prod => "prod",
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: Environment,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub okx: OkxConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            trading: TradingConfig::default(),
            instruments: Vec::new(),
            ai: AiConfig::default(),
            okx: OkxConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn default_environment() -> Environment {
    Environment::Demo
}

/// Global trading defaults, overridable per instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_leverage")]
    pub default_leverage: u32,
    #[serde(default = "default_tp_percent")]
    pub default_tp_percent: Decimal,
    #[serde(default = "default_sl_percent")]
    pub default_sl_percent: Decimal,
    #[serde(default = "default_base_notional")]
    pub base_notional_usdt: Decimal,
    #[serde(default = "default_margin_mode")]
    pub margin_mode: MarginMode,
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Account-wide contract cap, applied when an instrument sets none.
    #[serde(default)]
    pub max_contracts: Option<u64>,
    #[serde(default = "default_trigger_type")]
    pub tp_trigger_type: TriggerPriceType,
    #[serde(default = "default_trigger_type")]
    pub sl_trigger_type: TriggerPriceType,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            default_leverage: default_leverage(),
            default_tp_percent: default_tp_percent(),
            default_sl_percent: default_sl_percent(),
            base_notional_usdt: default_base_notional(),
            margin_mode: default_margin_mode(),
            dry_run: default_dry_run(),
            max_contracts: None,
            tp_trigger_type: default_trigger_type(),
            sl_trigger_type: default_trigger_type(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_leverage() -> u32 {
    100
}

fn default_tp_percent() -> Decimal {
    dec!(0.02)
}

fn default_sl_percent() -> Decimal {
    dec!(0.01)
}

fn default_base_notional() -> Decimal {
    dec!(10)
}

fn default_margin_mode() -> MarginMode {
    MarginMode::Cross
}

fn default_dry_run() -> bool {
    true
}

fn default_trigger_type() -> TriggerPriceType {
    TriggerPriceType::Last
}

/// One tradable instrument with optional per-instrument overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub inst_id: String,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub tp_percent: Option<Decimal>,
    #[serde(default)]
    pub sl_percent: Option<Decimal>,
    #[serde(default)]
    pub base_notional_usdt: Option<Decimal>,
    /// Pin the order size, bypassing notional sizing and caps.
    #[serde(default)]
    pub fixed_contracts: Option<u64>,
    #[serde(default)]
    pub max_contracts: Option<u64>,
}

impl InstrumentConfig {
    pub fn effective_leverage(&self, defaults: &TradingConfig) -> u32 {
        self.leverage.unwrap_or(defaults.default_leverage)
    }

    pub fn effective_tp(&self, defaults: &TradingConfig) -> Decimal {
        self.tp_percent.unwrap_or(defaults.default_tp_percent)
    }

    pub fn effective_sl(&self, defaults: &TradingConfig) -> Decimal {
        self.sl_percent.unwrap_or(defaults.default_sl_percent)
    }

    pub fn effective_notional(&self, defaults: &TradingConfig) -> Decimal {
        self.base_notional_usdt
            .unwrap_or(defaults.base_notional_usdt)
    }
}

/// Direction oracle settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key: None,
        }
    }
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Exchange API credentials. All optional: without them the bot runs
/// against the simulator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OkxConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl OkxConfig {
    /// Credentials for the live client, present only when the full set is
    /// configured.
    pub fn credentials(&self) -> Option<OkxCredentials> {
        match (&self.api_key, &self.api_secret, &self.passphrase) {
            (Some(api_key), Some(api_secret), Some(passphrase)) => Some(OkxCredentials {
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
                passphrase: passphrase.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Load the configuration: YAML file (may be absent), then environment
/// overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let raw = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Yaml)
                .required(false),
        )
        .build()
        .with_context(|| format!("could not read configuration from {}", path.display()))?;

    let mut config: AppConfig = raw
        .try_deserialize()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Overlay the documented environment variables onto a parsed config.
/// Split out from [`load`] so tests can inject their own lookup.
fn apply_env_overrides(
    config: &mut AppConfig,
    get: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(key) = get("OKX_API_KEY") {
        config.okx.api_key = Some(key);
    }
    if let Some(secret) = get("OKX_API_SECRET") {
        config.okx.api_secret = Some(secret);
    }
    if let Some(passphrase) = get("OKX_PASSPHRASE") {
        config.okx.passphrase = Some(passphrase);
    }

    if let Some(key) = get("OPENAI_API_KEY") {
        config.ai.api_key = Some(key);
    }
    if let Some(url) = get("OPENAI_BASE_URL") {
        config.ai.base_url = url;
    }
    if let Some(model) = get("OPENAI_MODEL") {
        config.ai.model = model;
    }

    if let Some(env) = get("ENV") {
        config.environment = match env.as_str() {
            "demo" => Environment::Demo,
            "prod" => Environment::Prod,
            other => bail!("ENV must be demo or prod, got {other:?}"),
        };
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.log.level = level;
    }
    Ok(())
}

impl AppConfig {
    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.trading.poll_interval_secs == 0 {
            bail!("trading.poll_interval_secs must be at least 1");
        }
        if self.trading.default_leverage == 0 {
            bail!("trading.default_leverage must be at least 1");
        }
        if self.trading.default_tp_percent < Decimal::ZERO
            || self.trading.default_sl_percent < Decimal::ZERO
        {
            bail!("trading TP/SL percentages must not be negative");
        }
        if self.trading.base_notional_usdt <= Decimal::ZERO {
            bail!("trading.base_notional_usdt must be positive");
        }

        for inst in &self.instruments {
            if inst.inst_id.is_empty() {
                bail!("instrument with empty inst_id");
            }
            if inst.leverage == Some(0) {
                bail!("{}: leverage must be at least 1", inst.inst_id);
            }
            if matches!(inst.tp_percent, Some(p) if p < Decimal::ZERO)
                || matches!(inst.sl_percent, Some(p) if p < Decimal::ZERO)
            {
                bail!("{}: TP/SL percentages must not be negative", inst.inst_id);
            }
            if matches!(inst.base_notional_usdt, Some(n) if n <= Decimal::ZERO) {
                bail!("{}: base_notional_usdt must be positive", inst.inst_id);
            }
        }
        Ok(())
    }

    /// Multi-line description with credentials redacted.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "environment: {}", self.environment.as_str());
        let _ = writeln!(
            out,
            "trading: dry_run={} poll={}s leverage={}x tp={} sl={} notional={} margin={}",
            self.trading.dry_run,
            self.trading.poll_interval_secs,
            self.trading.default_leverage,
            self.trading.default_tp_percent,
            self.trading.default_sl_percent,
            self.trading.base_notional_usdt,
            self.trading.margin_mode.as_str(),
        );
        if let Some(cap) = self.trading.max_contracts {
            let _ = writeln!(out, "trading.max_contracts: {cap}");
        }
        for inst in &self.instruments {
            let _ = writeln!(
                out,
                "instrument: {} leverage={}x tp={} sl={} notional={}",
                inst.inst_id,
                inst.effective_leverage(&self.trading),
                inst.effective_tp(&self.trading),
                inst.effective_sl(&self.trading),
                inst.effective_notional(&self.trading),
            );
        }
        let _ = writeln!(
            out,
            "ai: model={} base_url={} api_key={}",
            self.ai.model,
            self.ai.base_url,
            redact(self.ai.api_key.as_deref()),
        );
        let _ = writeln!(
            out,
            "okx: api_key={} passphrase={}",
            redact(self.okx.api_key.as_deref()),
            redact(self.okx.passphrase.as_deref()),
        );
        let _ = writeln!(
            out,
            "log: level={} dir={}",
            self.log.level,
            self.log.dir.display()
        );
        out
    }
}

/// Keep the first four characters of a secret, mask the rest.
fn redact(secret: Option<&str>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(s) if s.chars().count() <= 4 => "***".to_string(),
        Some(s) => {
            let head: String = s.chars().take(4).collect();
            format!("{head}***")
        }
    }
}
