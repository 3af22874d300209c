//! Mock exchange for integration testing.
//!
//! A deterministic in-memory `Exchange`: prices are set from test code,
//! orders fill instantly at the current price, and every order is kept
//! for inspection.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use ring_trader::exchange::{
    ApiError, Exchange, ExchangeInfo, OrderResponse, SymbolFilter, SymbolInfo,
};
use ring_trader::types::{PriceSnapshot, Side};

/// One order the mock accepted.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
}

#[derive(Clone, Default)]
pub struct MockExchange {
    prices: Arc<Mutex<HashMap<String, String>>>,
    lot_sizes: Arc<Mutex<HashMap<String, (String, String)>>>,
    orders: Arc<Mutex<Vec<PlacedOrder>>>,
    /// Orders for these symbols are rejected with a 400.
    reject: Arc<Mutex<Vec<String>>>,
    /// If set, price requests fail with a server error.
    prices_down: Arc<Mutex<bool>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: &str) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), price.to_string());
    }

    pub fn set_lot_size(&self, symbol: &str, min_qty: &str, step_size: &str) {
        self.lot_sizes.lock().unwrap().insert(
            symbol.to_string(),
            (min_qty.to_string(), step_size.to_string()),
        );
    }

    pub fn reject_orders_for(&self, symbol: &str) {
        self.reject.lock().unwrap().push(symbol.to_string());
    }

    pub fn set_prices_down(&self, down: bool) {
        *self.prices_down.lock().unwrap() = down;
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn server_time(&self) -> Result<i64, ApiError> {
        Ok(chrono::Utc::now().timestamp_millis())
    }

    async fn ticker_prices(&self) -> Result<PriceSnapshot, ApiError> {
        if *self.prices_down.lock().unwrap() {
            return Err(ApiError::Server {
                path: "/ticker/price".into(),
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "maintenance".into(),
            });
        }
        let prices = self.prices.lock().unwrap().clone();
        Ok(PriceSnapshot::from_prices(prices))
    }

    async fn exchange_info(&self) -> Result<ExchangeInfo, ApiError> {
        let symbols = self
            .lot_sizes
            .lock()
            .unwrap()
            .iter()
            .map(|(symbol, (min_qty, step_size))| SymbolInfo {
                symbol: symbol.clone(),
                status: "TRADING".into(),
                filters: vec![SymbolFilter {
                    filter_type: "LOT_SIZE".into(),
                    min_qty: Some(min_qty.clone()),
                    max_qty: Some("9000000".into()),
                    step_size: Some(step_size.clone()),
                }],
            })
            .collect();
        Ok(ExchangeInfo { symbols })
    }

    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResponse, ApiError> {
        if self.reject.lock().unwrap().iter().any(|s| s == symbol) {
            return Err(ApiError::Client {
                path: "/order".into(),
                status: StatusCode::BAD_REQUEST,
                body: r#"{"code":-2010,"msg":"Account has insufficient balance"}"#.into(),
            });
        }

        let price = self
            .prices
            .lock()
            .unwrap()
            .get(symbol)
            .and_then(|p| Decimal::from_str(p).ok())
            .ok_or_else(|| ApiError::Client {
                path: "/order".into(),
                status: StatusCode::BAD_REQUEST,
                body: format!("unknown symbol {symbol}"),
            })?;

        let mut orders = self.orders.lock().unwrap();
        orders.push(PlacedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
        });

        Ok(OrderResponse {
            symbol: symbol.to_string(),
            order_id: orders.len() as i64,
            transact_time: chrono::Utc::now().timestamp_millis(),
            executed_qty: quantity.to_string(),
            cummulative_quote_qty: (quantity * price).to_string(),
            status: "FILLED".into(),
            side: side.to_string(),
            ..Default::default()
        })
    }
}
