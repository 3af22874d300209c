//! Profit model.
//!
//! A pair (From, To) is worth jumping when the current From/To price ratio,
//! after paying the fee on both legs, beats the stored benchmark by more than
//! the scout margin:
//!
//! ```text
//! current   = price(From/B) / price(To/B)
//! effective = current * (1 - fee)^2
//! profit    = effective / benchmark - 1 - margin% / 100
//! ```

use crate::types::{market_symbol, Pair, PriceError, PriceSnapshot};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Price(#[from] PriceError),

    #[error("pair {0} has no benchmark ratio yet")]
    Uninitialized(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitModel {
    /// Fee per leg, as a fraction (0.001 = 0.1%).
    pub fee_rate: f64,
    /// Extra required edge, in percent.
    pub scout_margin_pct: f64,
}

impl ProfitModel {
    pub fn new(fee_rate: f64, scout_margin_pct: f64) -> Self {
        Self {
            fee_rate,
            scout_margin_pct,
        }
    }

    /// Profit of jumping along `pair` at the snapshot prices.
    ///
    /// Jumps into the bridge itself are never scored: they return exactly
    /// zero without reading any price.
    pub fn evaluate(
        &self,
        pair: &Pair,
        bridge: &str,
        snapshot: &PriceSnapshot,
    ) -> Result<f64, EvalError> {
        if pair.to_asset == bridge {
            return Ok(0.0);
        }

        let current = current_ratio(&pair.from_asset, &pair.to_asset, bridge, snapshot)?;
        if !pair.is_initialized() {
            return Err(EvalError::Uninitialized(pair.to_string()));
        }

        Ok(self.profit_from_ratio(current, pair.ratio))
    }

    /// A jump pays the fee twice, once per leg.
    pub fn profit_from_ratio(&self, current_ratio: f64, benchmark: f64) -> f64 {
        let effective = self.after_fee(self.after_fee(current_ratio));
        effective / benchmark - 1.0 - self.scout_margin_pct / 100.0
    }

    /// Proceeds kept from one leg after the fee.
    pub fn after_fee(&self, gross: f64) -> f64 {
        gross * (1.0 - self.fee_rate)
    }
}

/// `price(from/bridge) / price(to/bridge)` at the snapshot. This is also the
/// value a pair is benchmarked to.
pub fn current_ratio(
    from: &str,
    to: &str,
    bridge: &str,
    snapshot: &PriceSnapshot,
) -> Result<f64, PriceError> {
    let from_price = snapshot.price(&market_symbol(from, bridge))?;
    let to_price = snapshot.price(&market_symbol(to, bridge))?;
    Ok(from_price / to_price)
}
