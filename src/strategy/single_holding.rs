//! Single-holding variant: the whole balance sits in one asset and each tick
//! only looks at jumps out of it.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::info;

use super::{fetch_snapshot, scan, select, ScoutError, ScoutStrategy, Selection, TickOutcome};
use crate::engine::executor::execute_jump;
use crate::engine::TradingContext;

#[derive(Debug, Default)]
pub struct SingleHolding;

impl SingleHolding {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScoutStrategy for SingleHolding {
    fn name(&self) -> &'static str {
        "single_holding"
    }

    /// Keep a valid recorded holding. Otherwise (none, empty, the bridge, or
    /// an asset no longer enabled) start from a random enabled asset.
    async fn initialize(&mut self, ctx: &TradingContext) -> Result<(), ScoutError> {
        let bridge: &str = &ctx.settings.bridge;
        let assets = ctx.store.enabled_assets().await.map_err(ScoutError::storage)?;
        let holding = ctx.store.current_holding().await.map_err(ScoutError::storage)?;

        if let Some(h) = &holding {
            if !h.symbol.is_empty()
                && h.symbol != bridge
                && assets.iter().any(|a| a.symbol == h.symbol)
            {
                info!(holding = %h.symbol, "Resuming from recorded holding");
                return Ok(());
            }
        }

        let candidates: Vec<&str> = assets
            .iter()
            .map(|a| a.symbol.as_str())
            .filter(|s| *s != bridge)
            .collect();
        let pick = candidates
            .choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .ok_or(ScoutError::NoAssets)?;

        ctx.store
            .set_current_holding(&pick)
            .await
            .map_err(ScoutError::storage)?;
        info!(
            previous = holding.as_ref().map(|h| h.symbol.as_str()).unwrap_or("<none>"),
            holding = %pick,
            "Initial holding chosen"
        );
        Ok(())
    }

    async fn scout(&mut self, ctx: &TradingContext) -> Result<TickOutcome, ScoutError> {
        let snapshot = fetch_snapshot(ctx).await?;

        let holding = ctx
            .store
            .current_holding()
            .await
            .map_err(ScoutError::storage)?
            .ok_or(ScoutError::NoHolding)?;
        let pairs = ctx
            .store
            .pairs_from(&holding.symbol)
            .await
            .map_err(ScoutError::storage)?;

        let summary = scan(ctx, pairs, &snapshot).await;
        let best = match select(ctx, self.name(), summary) {
            Selection::Act(best) => best,
            Selection::Skip(outcome) => return Ok(outcome),
        };

        let report = execute_jump(ctx, &best, ctx.settings.quantity, &snapshot).await?;
        Ok(TickOutcome::Jumped(report))
    }
}
