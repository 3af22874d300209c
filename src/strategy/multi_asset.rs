//! Multi-asset variant: every asset keeps its own quantity and each tick
//! picks the globally best jump across all pairs.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{fetch_snapshot, scan, select, ScoutError, ScoutStrategy, Selection, TickOutcome};
use crate::engine::executor::execute_jump;
use crate::engine::TradingContext;

#[derive(Debug, Default)]
pub struct MultiAsset;

impl MultiAsset {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScoutStrategy for MultiAsset {
    fn name(&self) -> &'static str {
        "multi_asset"
    }

    async fn initialize(&mut self, ctx: &TradingContext) -> Result<(), ScoutError> {
        if ctx
            .store
            .current_holding()
            .await
            .map_err(ScoutError::storage)?
            .is_none()
        {
            ctx.store
                .set_current_holding(&ctx.settings.bridge)
                .await
                .map_err(ScoutError::storage)?;
        }

        let pairs = ctx.store.all_pairs().await.map_err(ScoutError::storage)?;
        let assets = ctx.store.enabled_assets().await.map_err(ScoutError::storage)?;
        if pairs.is_empty() {
            warn!("No tradable pairs; the multi-asset strategy will stay idle");
        }
        let funded = assets.iter().filter(|a| a.quantity > 0.0).count();
        info!(pairs = pairs.len(), assets = assets.len(), funded, "Multi-asset strategy ready");
        Ok(())
    }

    async fn scout(&mut self, ctx: &TradingContext) -> Result<TickOutcome, ScoutError> {
        let snapshot = fetch_snapshot(ctx).await?;
        let pairs = ctx.store.all_pairs().await.map_err(ScoutError::storage)?;

        let summary = scan(ctx, pairs, &snapshot).await;
        let best = match select(ctx, self.name(), summary) {
            Selection::Act(best) => best,
            Selection::Skip(outcome) => return Ok(outcome),
        };

        let quantity = ctx
            .store
            .asset(&best.pair.from_asset)
            .await
            .map_err(ScoutError::storage)?
            .map(|a| a.quantity)
            .unwrap_or_default();

        let report = execute_jump(ctx, &best, quantity, &snapshot).await?;
        Ok(TickOutcome::Jumped(report))
    }
}
