//! Jump executor.
//!
//! Converts the From asset into the To asset through the bridge: sell
//! From/B, then buy To/B with the proceeds. Both quantities are floored to
//! the symbol's lot step. Everything that can be checked before the sell
//! (sizing, both prices) is checked first, so a rejected jump has no side
//! effects. Once the sell has gone through there is no rollback: a failed
//! or undersized buy leaves the account holding the bridge and is reported
//! as a partial jump. Shutdown is not consulted once the sell is underway.
//! A jump whose legs both filled but which could not be written to the store
//! is reported as an unrecorded jump. Either outcome suspends the engine.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use super::scanner::Opportunity;
use super::TradingContext;
use crate::exchange::rules::SizingError;
use crate::exchange::ApiError;
use crate::storage::JumpCommit;
use crate::strategy::profit::current_ratio;
use crate::types::{market_symbol, to_decimal, NewTrade, PriceError, PriceSnapshot, Side};

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

/// Sell leg done, buy leg not. Needs an operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialJump {
    pub from_asset: String,
    pub to_asset: String,
    pub bridge: String,
    pub sold_quantity: f64,
    /// Bridge units obtained from the sell, after fees.
    pub bridge_amount: f64,
    pub sell_order_id: String,
    pub reason: String,
    /// Unix milliseconds.
    pub at: i64,
}

impl fmt::Display for PartialJump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sold {} {} for {} {} (order {}) but buying {} failed: {}",
            self.sold_quantity,
            self.from_asset,
            self.bridge_amount,
            self.bridge,
            self.sell_order_id,
            self.to_asset,
            self.reason
        )
    }
}

/// Both legs filled but the store could not take the result. The recorded
/// holding and quantities are stale until an operator reconciles them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnrecordedJump {
    pub from_asset: String,
    pub to_asset: String,
    pub sold_quantity: f64,
    pub bought_quantity: f64,
    pub sell_order_id: String,
    pub buy_order_id: String,
    pub reason: String,
    /// Unix milliseconds.
    pub at: i64,
}

impl fmt::Display for UnrecordedJump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sold {} {} (order {}) and bought {} {} (order {}) but the jump was not recorded: {}",
            self.sold_quantity,
            self.from_asset,
            self.sell_order_id,
            self.bought_quantity,
            self.to_asset,
            self.buy_order_id,
            self.reason
        )
    }
}

/// Why the engine stopped jumping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suspension {
    Partial(PartialJump),
    Unrecorded(UnrecordedJump),
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspension::Partial(p) => write!(f, "partial jump: {p}"),
            Suspension::Unrecorded(u) => write!(f, "unrecorded jump: {u}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JumpError {
    #[error("invalid jump quantity {0}")]
    InvalidQuantity(f64),

    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error("cannot price jump: {0}")]
    Price(#[from] PriceError),

    #[error("sell order for {symbol} failed: {source}")]
    Sell {
        symbol: String,
        #[source]
        source: ApiError,
    },

    #[error("partial jump: {0}")]
    PartialJump(PartialJump),

    #[error("unrecorded jump: {0}")]
    Unrecorded(UnrecordedJump),
}

impl JumpError {
    /// The suspension this failure calls for, if any.
    pub fn suspension(&self) -> Option<Suspension> {
        match self {
            JumpError::PartialJump(p) => Some(Suspension::Partial(p.clone())),
            JumpError::Unrecorded(u) => Some(Suspension::Unrecorded(u.clone())),
            _ => None,
        }
    }
}

/// A completed jump.
#[derive(Debug, Clone)]
pub struct JumpReport {
    pub from_asset: String,
    pub to_asset: String,
    pub profit: f64,
    pub sold: Decimal,
    pub bridge_amount: Decimal,
    pub bought: Decimal,
    pub simulated: bool,
    pub sell_order_id: String,
    pub buy_order_id: String,
    /// Pairs out of the new holding that got a fresh benchmark.
    pub rebenchmarked: usize,
}

/// One executed (or simulated) order.
#[derive(Debug, Clone)]
struct Fill {
    order_id: String,
    quantity: Decimal,
    quote: Decimal,
    timestamp: i64,
    simulated: bool,
}

impl Fill {
    fn to_trade(&self, symbol: &str, side: Side, profit: Option<f64>) -> NewTrade {
        let quantity = self.quantity.to_f64().unwrap_or_default();
        let quote_quantity = self.quote.to_f64().unwrap_or_default();
        NewTrade {
            symbol: symbol.to_string(),
            side,
            price: if quantity > 0.0 {
                quote_quantity / quantity
            } else {
                0.0
            },
            quantity,
            quote_quantity,
            timestamp: self.timestamp,
            is_simulation: self.simulated,
            order_id: self.order_id.clone(),
            profit,
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_positive(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw).ok().filter(|d| *d > Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Place one MARKET order, or simulate it at the snapshot price in dry-run.
async fn place(
    ctx: &TradingContext,
    symbol: &str,
    side: Side,
    quantity: Decimal,
    price: Decimal,
) -> Result<Fill, ApiError> {
    if ctx.settings.dry_run {
        let fill = Fill {
            order_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
            quantity,
            quote: quantity * price,
            timestamp: now_ms(),
            simulated: true,
        };
        info!(symbol, %side, %quantity, order_id = %fill.order_id, "DRY RUN: order simulated");
        return Ok(fill);
    }

    let resp = ctx.exchange.create_order(symbol, side, quantity).await?;
    let executed = parse_positive(&resp.executed_qty).unwrap_or(quantity);
    let quote = parse_positive(&resp.cummulative_quote_qty).unwrap_or(executed * price);
    info!(
        symbol,
        %side,
        order_id = resp.order_id,
        executed = %executed,
        quote = %quote,
        status = %resp.status,
        "Order placed"
    );

    Ok(Fill {
        order_id: resp.order_id.to_string(),
        quantity: executed,
        quote,
        timestamp: if resp.transact_time > 0 {
            resp.transact_time
        } else {
            now_ms()
        },
        simulated: false,
    })
}

/// Execute the jump described by `opportunity`, selling `quantity` units of
/// its From asset, pricing and re-benchmarking from `snapshot`.
pub async fn execute_jump(
    ctx: &TradingContext,
    opportunity: &Opportunity,
    quantity: f64,
    snapshot: &PriceSnapshot,
) -> Result<JumpReport, JumpError> {
    let bridge: &str = &ctx.settings.bridge;
    let from = opportunity.pair.from_asset.as_str();
    let to = opportunity.pair.to_asset.as_str();
    let sell_symbol = market_symbol(from, bridge);
    let buy_symbol = market_symbol(to, bridge);

    // -- Pre-flight: nothing has been sent yet --------------------------------
    let requested = to_decimal(quantity).ok_or(JumpError::InvalidQuantity(quantity))?;
    let sell_qty = ctx.rules.size(&sell_symbol, requested)?;
    let sell_price = snapshot.price_decimal(&sell_symbol)?;
    let buy_price = snapshot.price_decimal(&buy_symbol)?;
    let keep = Decimal::ONE - to_decimal(ctx.settings.model.fee_rate).unwrap_or_default();

    info!(
        from,
        to,
        profit = opportunity.profit,
        quantity = %sell_qty,
        dry_run = ctx.settings.dry_run,
        "Executing jump"
    );

    // -- Leg 1: From -> bridge -----------------------------------------------
    let sell = place(ctx, &sell_symbol, Side::Sell, sell_qty, sell_price)
        .await
        .map_err(|source| JumpError::Sell {
            symbol: sell_symbol.clone(),
            source,
        })?;
    let bridge_amount = sell.quote * keep;

    let sell_trade = sell.to_trade(&sell_symbol, Side::Sell, None);
    if let Err(e) = ctx.store.record_trade(&sell_trade).await {
        // The order went through regardless; keep going.
        error!(symbol = %sell_symbol, error = %e, "Failed to record sell trade");
    }

    let partial = |reason: String| {
        let info = PartialJump {
            from_asset: from.to_string(),
            to_asset: to.to_string(),
            bridge: bridge.to_string(),
            sold_quantity: sell.quantity.to_f64().unwrap_or_default(),
            bridge_amount: bridge_amount.to_f64().unwrap_or_default(),
            sell_order_id: sell.order_id.clone(),
            reason,
            at: now_ms(),
        };
        error!(
            from,
            to,
            bridge,
            sold = info.sold_quantity,
            bridge_amount = info.bridge_amount,
            sell_order_id = %info.sell_order_id,
            reason = %info.reason,
            "PARTIAL JUMP: holding bridge asset, operator action required"
        );
        JumpError::PartialJump(info)
    };

    // -- Leg 2: bridge -> To -------------------------------------------------
    let buy_qty = ctx
        .rules
        .size(&buy_symbol, bridge_amount / buy_price)
        .map_err(|e| partial(e.to_string()))?;

    let buy = place(ctx, &buy_symbol, Side::Buy, buy_qty, buy_price)
        .await
        .map_err(|e| partial(e.to_string()))?;

    // -- Persist -------------------------------------------------------------
    let unrecorded = |e: anyhow::Error| {
        let info = UnrecordedJump {
            from_asset: from.to_string(),
            to_asset: to.to_string(),
            sold_quantity: sell.quantity.to_f64().unwrap_or_default(),
            bought_quantity: buy.quantity.to_f64().unwrap_or_default(),
            sell_order_id: sell.order_id.clone(),
            buy_order_id: buy.order_id.clone(),
            reason: format!("{e:#}"),
            at: now_ms(),
        };
        error!(
            from,
            to,
            sell_order_id = %info.sell_order_id,
            buy_order_id = %info.buy_order_id,
            reason = %info.reason,
            "UNRECORDED JUMP: both legs filled but the store was not updated, operator action required"
        );
        JumpError::Unrecorded(info)
    };

    let next_pairs = ctx.store.pairs_from(to).await.map_err(unrecorded)?;
    let ratios: Vec<(i64, f64)> = next_pairs
        .iter()
        .filter(|p| p.to_asset != bridge)
        .filter_map(|p| match current_ratio(to, &p.to_asset, bridge, snapshot) {
            Ok(ratio) => Some((p.id, ratio)),
            Err(e) => {
                warn!(pair = %p, error = %e, "Cannot re-benchmark pair, keeping old ratio");
                None
            }
        })
        .collect();

    let commit = JumpCommit {
        from_asset: from.to_string(),
        to_asset: to.to_string(),
        sold: sell.quantity.to_f64().unwrap_or_default(),
        bought: buy.quantity.to_f64().unwrap_or_default(),
        buy_trade: buy.to_trade(&buy_symbol, Side::Buy, Some(opportunity.profit)),
        ratios,
    };
    ctx.store.commit_jump(&commit).await.map_err(unrecorded)?;

    info!(
        from,
        to,
        sold = %sell.quantity,
        bought = %buy.quantity,
        rebenchmarked = commit.ratios.len(),
        "Jump complete"
    );

    Ok(JumpReport {
        from_asset: from.to_string(),
        to_asset: to.to_string(),
        profit: opportunity.profit,
        sold: sell.quantity,
        bridge_amount,
        bought: buy.quantity,
        simulated: sell.simulated,
        sell_order_id: sell.order_id.clone(),
        buy_order_id: buy.order_id,
        rebenchmarked: commit.ratios.len(),
    })
}
