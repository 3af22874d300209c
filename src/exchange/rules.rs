//! Exchange rule cache.
//!
//! Holds the `LOT_SIZE` filter (minimum quantity and step size) of every
//! symbol, fetched once at startup. Order quantities are always floored to
//! the step, never rounded to nearest, so the client never asks for more
//! than the exchange permits.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

use super::ExchangeInfo;

const LOT_SIZE_FILTER: &str = "LOT_SIZE";

/// Lot-size constraint of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotSize {
    pub min_qty: Decimal,
    pub step_size: Decimal,
}

/// Quantity rejected before any order was attempted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("quantity {requested} for {symbol} floors to {quantity}, below the exchange minimum {min_qty}")]
pub struct SizingError {
    pub symbol: String,
    /// Quantity before flooring.
    pub requested: Decimal,
    /// Quantity after flooring to the step.
    pub quantity: Decimal,
    pub min_qty: Decimal,
}

/// Floor `quantity` to a whole multiple of `step`.
///
/// A non-positive step leaves the quantity untouched. `None` when the
/// quotient does not fit a `Decimal`.
pub fn floor_to_step(quantity: Decimal, step: Decimal) -> Option<Decimal> {
    if step <= Decimal::ZERO {
        return Some(quantity);
    }
    let steps = quantity.checked_div(step)?.floor();
    Some(steps.checked_mul(step)?.normalize())
}

impl LotSize {
    /// Floor to the step and check the minimum. A quantity too large to
    /// floor is rejected like an undersized one.
    pub fn size(&self, symbol: &str, quantity: Decimal) -> Result<Decimal, SizingError> {
        let floored = floor_to_step(quantity, self.step_size).unwrap_or(Decimal::ZERO);
        if floored < self.min_qty || floored <= Decimal::ZERO {
            return Err(SizingError {
                symbol: symbol.to_string(),
                requested: quantity,
                quantity: floored,
                min_qty: self.min_qty,
            });
        }
        Ok(floored)
    }
}

/// Per-symbol lot-size rules.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRules {
    lot_sizes: HashMap<String, LotSize>,
}

impl ExchangeRules {
    /// Extract the lot-size filter of every symbol that carries a well-formed
    /// one. Symbols without it are simply absent.
    pub fn from_exchange_info(info: &ExchangeInfo) -> Self {
        let mut lot_sizes = HashMap::with_capacity(info.symbols.len());

        for symbol in &info.symbols {
            let Some(filter) = symbol
                .filters
                .iter()
                .find(|f| f.filter_type == LOT_SIZE_FILTER)
            else {
                continue;
            };

            let parse = |v: &Option<String>| v.as_deref().and_then(|s| Decimal::from_str(s).ok());
            match (parse(&filter.min_qty), parse(&filter.step_size)) {
                (Some(min_qty), Some(step_size)) => {
                    lot_sizes.insert(symbol.symbol.clone(), LotSize { min_qty, step_size });
                }
                _ => {
                    debug!(symbol = %symbol.symbol, "Malformed LOT_SIZE filter, skipping");
                }
            }
        }

        Self { lot_sizes }
    }

    pub fn insert(&mut self, symbol: impl Into<String>, lot_size: LotSize) {
        self.lot_sizes.insert(symbol.into(), lot_size);
    }

    pub fn lot_size(&self, symbol: &str) -> Option<&LotSize> {
        self.lot_sizes.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.lot_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lot_sizes.is_empty()
    }

    /// Size an order quantity for `symbol`.
    ///
    /// Without a known rule the quantity passes through unchanged (the
    /// exchange remains the final arbiter).
    pub fn size(&self, symbol: &str, quantity: Decimal) -> Result<Decimal, SizingError> {
        match self.lot_sizes.get(symbol) {
            Some(lot) => lot.size(symbol, quantity),
            None => {
                warn!(symbol, "No LOT_SIZE rule for symbol, using quantity unrounded");
                if quantity <= Decimal::ZERO {
                    return Err(SizingError {
                        symbol: symbol.to_string(),
                        requested: quantity,
                        quantity,
                        min_qty: Decimal::ZERO,
                    });
                }
                Ok(quantity)
            }
        }
    }
}
