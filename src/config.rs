//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Exchange credentials are referenced by env-var name in the config and
//! resolved at startup into secret strings.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tracing::warn;

use crate::exchange::binance::{MAINNET_BASE_URL, TESTNET_BASE_URL};
use crate::exchange::retry::RetryPolicy;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Slowest accepted request rate: one request every 100 seconds.
pub const MIN_RATE_LIMIT: f64 = 0.01;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Overrides the mainnet/testnet default when set.
    pub base_url: Option<String>,
    pub testnet: bool,
    pub api_key_env: String,
    pub secret_key_env: String,
    /// Sustained request budget, requests per second.
    pub rate_limit: f64,
    pub rate_limit_burst: u32,
    pub max_retries: u32,
    pub backoff_unit_ms: u64,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            testnet: false,
            api_key_env: "BINANCE_API_KEY".into(),
            secret_key_env: "BINANCE_SECRET_KEY".into(),
            rate_limit: 20.0,
            rate_limit_burst: 5,
            max_retries: 3,
            backoff_unit_ms: 1000,
            recv_window_ms: 5000,
            timeout_secs: 10,
        }
    }
}

/// Which scouting variant drives the engine.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Hold one asset; only pairs out of it are scouted.
    #[default]
    #[serde(alias = "default")]
    SingleHolding,
    /// Scout every pair; each asset carries its own quantity.
    #[serde(alias = "multiple_coins")]
    MultiAsset,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SingleHolding => "single_holding",
            StrategyKind::MultiAsset => "multi_asset",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    pub bridge: String,
    pub assets: Vec<String>,
    /// Units held per asset when the asset is first seen. Multi-asset only.
    #[serde(default)]
    pub initial_quantities: HashMap<String, f64>,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Units sold per jump by the single-holding variant.
    #[serde(default)]
    pub quantity: f64,
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default)]
    pub scout_margin_pct: f64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://ring_trader.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: Option<String>,
    pub json: bool,
}

fn default_fee_rate() -> f64 {
    0.001
}

fn default_tick_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: AppConfig =
            toml::from_str(contents).context("Failed to parse config")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Upper-case symbols and drop duplicates and the bridge from the asset
    /// list.
    fn normalize(&mut self) {
        let t = &mut self.trading;
        t.bridge = t.bridge.trim().to_uppercase();
        let mut seen = Vec::with_capacity(t.assets.len());
        for asset in t.assets.drain(..) {
            let asset = asset.trim().to_uppercase();
            if !asset.is_empty() && asset != t.bridge && !seen.contains(&asset) {
                seen.push(asset);
            }
        }
        t.assets = seen;
        t.initial_quantities = t
            .initial_quantities
            .drain()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if t.bridge.is_empty() {
            bail!("trading.bridge must not be empty");
        }
        if t.assets.len() < 2 {
            bail!("trading.assets needs at least two assets besides the bridge");
        }
        if !(0.0..1.0).contains(&t.fee_rate) {
            bail!("trading.fee_rate must be in [0, 1), got {}", t.fee_rate);
        }
        if !t.scout_margin_pct.is_finite() {
            bail!("trading.scout_margin_pct must be finite");
        }
        if t.tick_interval_secs == 0 {
            bail!("trading.tick_interval_secs must be positive");
        }
        if t.strategy == StrategyKind::SingleHolding && t.quantity <= 0.0 {
            bail!("trading.quantity must be positive for the single_holding strategy");
        }
        if t.initial_quantities.values().any(|q| *q < 0.0 || !q.is_finite()) {
            bail!("trading.initial_quantities must be non-negative");
        }

        let e = &self.exchange;
        if !e.rate_limit.is_finite() || e.rate_limit < MIN_RATE_LIMIT {
            bail!(
                "exchange.rate_limit must be at least {MIN_RATE_LIMIT} requests/s, got {}",
                e.rate_limit
            );
        }
        if e.rate_limit_burst == 0 {
            bail!("exchange.rate_limit_burst must be positive");
        }
        if e.backoff_unit_ms == 0 || e.timeout_secs == 0 {
            bail!("exchange.backoff_unit_ms and exchange.timeout_secs must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

impl ExchangeConfig {
    pub fn base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url,
            None if self.testnet => TESTNET_BASE_URL,
            None => MAINNET_BASE_URL,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_unit_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// API key and secret. Missing values are fatal unless `dry_run`, where
    /// no signed request is ever sent.
    pub fn credentials(&self, dry_run: bool) -> Result<(SecretString, SecretString)> {
        let resolve = |name: &str| -> Result<SecretString> {
            match AppConfig::resolve_env(name) {
                Ok(v) if !v.is_empty() => Ok(SecretString::new(v)),
                Ok(_) | Err(_) if dry_run => {
                    warn!(env = name, "Exchange credential not set, continuing in dry-run");
                    Ok(SecretString::new(String::new()))
                }
                Ok(_) => bail!("Environment variable is empty: {name}"),
                Err(e) => Err(e),
            }
        };
        Ok((resolve(&self.api_key_env)?, resolve(&self.secret_key_env)?))
    }
}

impl TradingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Configured assets with the quantity each starts with.
    pub fn seed_assets(&self) -> Vec<(String, f64)> {
        self.assets
            .iter()
            .map(|a| (a.clone(), self.initial_quantities.get(a).copied().unwrap_or(0.0)))
            .collect()
    }
}
