//! Shared types for the trader.
//!
//! These types form the data model used across all modules: the persisted
//! records (assets, pairs, the current holding, trades) and the immutable
//! price snapshot every tick evaluates against.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::exchange::TickerPrice;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Order side, as the exchange spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A tradable asset (coin code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub symbol: String,
    pub enabled: bool,
    /// Units held. Only meaningful to the multi-asset strategy.
    pub quantity: f64,
}

/// An ordered (from, to) pair with its benchmark ratio.
///
/// `ratio` is `price(from) / price(to)` at the moment it was last accepted as
/// the anchor; zero means "not yet initialised".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pair {
    pub id: i64,
    pub from_asset: String,
    pub to_asset: String,
    pub ratio: f64,
}

impl Pair {
    pub fn is_initialized(&self) -> bool {
        self.ratio > 0.0
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from_asset, self.to_asset)
    }
}

/// The single asset currently held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CurrentHolding {
    pub symbol: String,
    /// Unix milliseconds of the last change.
    pub updated_at: i64,
}

/// One executed leg of a jump, as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub quote_quantity: f64,
    /// Unix milliseconds (exchange transaction time for live orders).
    pub timestamp: i64,
    pub is_simulation: bool,
    pub order_id: String,
    /// Realised profit ratio, set on the closing (buy) leg only.
    pub profit: Option<f64>,
}

/// A trade leg about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub quote_quantity: f64,
    pub timestamp: i64,
    pub is_simulation: bool,
    pub order_id: String,
    pub profit: Option<f64>,
}

// ---------------------------------------------------------------------------
// Price snapshot
// ---------------------------------------------------------------------------

/// Why a price could not be read from a snapshot.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriceError {
    #[error("no price for {0} in snapshot")]
    Missing(String),

    #[error("unparseable price {raw:?} for {symbol}")]
    Unparseable { symbol: String, raw: String },

    #[error("non-positive price {raw} for {symbol}")]
    NonPositive { symbol: String, raw: String },
}

/// All ticker prices fetched by one `/ticker/price` call.
///
/// Prices are kept as the exchange's decimal strings so a malformed entry
/// only fails the pairs that actually read it.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSnapshot {
    prices: HashMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn from_tickers(tickers: Vec<TickerPrice>) -> Self {
        Self {
            prices: tickers.into_iter().map(|t| (t.symbol, t.price)).collect(),
            fetched_at: Utc::now(),
        }
    }

    /// Build a snapshot from `(symbol, price)` literals.
    pub fn from_prices<I, S, P>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<String>,
    {
        Self {
            prices: prices
                .into_iter()
                .map(|(s, p)| (s.into(), p.into()))
                .collect(),
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    fn raw(&self, symbol: &str) -> Result<&str, PriceError> {
        self.prices
            .get(symbol)
            .map(String::as_str)
            .ok_or_else(|| PriceError::Missing(symbol.to_string()))
    }

    /// Price as a float, for ratio arithmetic.
    pub fn price(&self, symbol: &str) -> Result<f64, PriceError> {
        let raw = self.raw(symbol)?;
        let value: f64 = raw.parse().map_err(|_| PriceError::Unparseable {
            symbol: symbol.to_string(),
            raw: raw.to_string(),
        })?;
        if value <= 0.0 || !value.is_finite() {
            return Err(PriceError::NonPositive {
                symbol: symbol.to_string(),
                raw: raw.to_string(),
            });
        }
        Ok(value)
    }

    /// Price as an exact decimal, for order sizing.
    pub fn price_decimal(&self, symbol: &str) -> Result<Decimal, PriceError> {
        let raw = self.raw(symbol)?;
        let value = Decimal::from_str(raw).map_err(|_| PriceError::Unparseable {
            symbol: symbol.to_string(),
            raw: raw.to_string(),
        })?;
        if value <= Decimal::ZERO {
            return Err(PriceError::NonPositive {
                symbol: symbol.to_string(),
                raw: raw.to_string(),
            });
        }
        Ok(value)
    }
}

/// Exchange symbol for `asset` quoted in `bridge` (e.g. `BTC` + `USDT`).
pub fn market_symbol(asset: &str, bridge: &str) -> String {
    format!("{asset}{bridge}")
}

/// Convert a float to a decimal through its shortest round-trip text form,
/// so `0.001` becomes exactly `0.001`.
pub fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&value.to_string()).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
