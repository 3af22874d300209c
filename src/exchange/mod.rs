//! Exchange integration.
//!
//! Defines the `Exchange` trait the engine trades through, the wire types of
//! the four REST endpoints it consumes, and the client error taxonomy.
//! `binance` provides the rate-limited, retrying, signing implementation.

pub mod binance;
pub mod rate_limit;
pub mod retry;
pub mod rules;
pub mod signer;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{PriceSnapshot, Side};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// One entry of `GET /ticker/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// `GET /exchangeInfo`, reduced to what the rule cache reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default)]
    pub min_qty: Option<String>,
    #[serde(default)]
    pub max_qty: Option<String>,
    #[serde(default)]
    pub step_size: Option<String>,
}

/// `POST /order` acknowledgement (RESULT/FULL response types).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default)]
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(default)]
    pub transact_time: i64,
    #[serde(default)]
    pub executed_qty: String,
    #[serde(default)]
    pub cummulative_quote_qty: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub side: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of one logical request, after admission control and retries.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error calling {path}: {source}")]
    Network {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server error {status} from {path}: {body}")]
    Server {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("request to {path} rejected with {status}: {body}")]
    Client {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("rate limited by {path} ({status}), retry-after {retry_after:?}")]
    RateLimited {
        path: String,
        status: StatusCode,
        /// Server-directed wait, in backoff units.
        retry_after: Option<u64>,
    },

    #[error("{path} failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        path: String,
        attempts: u32,
        last: Box<ApiError>,
    },

    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("failed to sign request to {path}: {source}")]
    Signing {
        path: String,
        #[source]
        source: signer::SigningError,
    },

    #[error("request to {path} cancelled by shutdown")]
    Cancelled { path: String },
}

impl ApiError {
    /// Transient failures the client retries within its budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network { .. } | ApiError::Server { .. } | ApiError::RateLimited { .. }
        )
    }

    /// Server-directed wait carried by a rate-limit response.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ApiError::Network { path, .. }
            | ApiError::Server { path, .. }
            | ApiError::Client { path, .. }
            | ApiError::RateLimited { path, .. }
            | ApiError::ExhaustedRetries { path, .. }
            | ApiError::Decode { path, .. }
            | ApiError::Signing { path, .. }
            | ApiError::Cancelled { path } => path,
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange trait
// ---------------------------------------------------------------------------

/// The exchange operations the engine depends on.
///
/// `create_order` is the only state-mutating call; implementations sign it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Connectivity check. Returns the exchange clock in Unix milliseconds.
    async fn server_time(&self) -> Result<i64, ApiError>;

    /// One consistent snapshot of every ticker price.
    async fn ticker_prices(&self) -> Result<PriceSnapshot, ApiError>;

    /// Symbol list with trading filters.
    async fn exchange_info(&self) -> Result<ExchangeInfo, ApiError>;

    /// Place a MARKET order for `quantity` units of the symbol's base asset.
    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResponse, ApiError>;
}
