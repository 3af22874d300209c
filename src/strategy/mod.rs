//! Scouting strategies.
//!
//! A strategy decides which pairs are candidates on a tick and how much to
//! sell when one qualifies. Scoring, selection and execution are shared:
//! see [`crate::engine::scanner`] and [`crate::engine::executor`].

pub mod multi_asset;
pub mod profit;
pub mod single_holding;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StrategyKind;
use crate::engine::executor::{JumpError, JumpReport, Suspension};
use crate::engine::scanner::{find_best_opportunity, Opportunity, ScanSummary};
use crate::engine::TradingContext;
use crate::exchange::ApiError;
use crate::types::{Pair, PriceSnapshot};

pub use multi_asset::MultiAsset;
pub use single_holding::SingleHolding;

/// What one tick did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Nothing qualified.
    Idle { candidates: usize, failed: usize },
    /// An opportunity qualified but shutdown was already requested.
    Deferred,
    Jumped(JumpReport),
}

#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    #[error("price snapshot unavailable: {0}")]
    Snapshot(#[source] ApiError),

    #[error("no current holding recorded")]
    NoHolding,

    #[error("no enabled assets to hold")]
    NoAssets,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Jump(#[from] JumpError),
}

impl ScoutError {
    fn storage(e: anyhow::Error) -> Self {
        ScoutError::Storage(format!("{e:#}"))
    }

    /// Set when the failure leaves the account out of step with the store.
    pub fn suspension(&self) -> Option<Suspension> {
        match self {
            ScoutError::Jump(e) => e.suspension(),
            _ => None,
        }
    }
}

/// A scouting variant, chosen once at startup.
#[async_trait]
pub trait ScoutStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Establish the starting holding. Runs once before the first tick.
    async fn initialize(&mut self, ctx: &TradingContext) -> Result<(), ScoutError>;

    /// One tick: snapshot, score, and jump if something qualifies.
    async fn scout(&mut self, ctx: &TradingContext) -> Result<TickOutcome, ScoutError>;
}

pub fn from_kind(kind: StrategyKind) -> Box<dyn ScoutStrategy> {
    match kind {
        StrategyKind::SingleHolding => Box::new(SingleHolding::new()),
        StrategyKind::MultiAsset => Box::new(MultiAsset::new()),
    }
}

// ---------------------------------------------------------------------------
// Shared tick steps
// ---------------------------------------------------------------------------

async fn fetch_snapshot(ctx: &TradingContext) -> Result<Arc<PriceSnapshot>, ScoutError> {
    let snapshot = ctx
        .exchange
        .ticker_prices()
        .await
        .map_err(ScoutError::Snapshot)?;
    debug!(prices = snapshot.len(), "Price snapshot fetched");
    Ok(Arc::new(snapshot))
}

async fn scan(ctx: &TradingContext, pairs: Vec<Pair>, snapshot: &Arc<PriceSnapshot>) -> ScanSummary {
    find_best_opportunity(
        pairs,
        Arc::clone(snapshot),
        Arc::clone(&ctx.settings.bridge),
        ctx.settings.model,
    )
    .await
}

/// Either the opportunity to act on, or the outcome to report instead.
enum Selection {
    Act(Opportunity),
    Skip(TickOutcome),
}

fn select(ctx: &TradingContext, strategy: &'static str, summary: ScanSummary) -> Selection {
    let Some(best) = summary.best else {
        info!(
            strategy,
            candidates = summary.candidates,
            failed = summary.failed,
            "No profitable jump this tick"
        );
        return Selection::Skip(TickOutcome::Idle {
            candidates: summary.candidates,
            failed: summary.failed,
        });
    };

    info!(
        strategy,
        pair = %best.pair,
        profit = best.profit,
        qualifying = summary.qualifying,
        "Best jump opportunity"
    );

    if ctx.shutdown.is_triggered() {
        info!(pair = %best.pair, "Shutdown requested, not starting jump");
        return Selection::Skip(TickOutcome::Deferred);
    }

    Selection::Act(best)
}
