//! Concurrent opportunity scanner.
//!
//! Every candidate pair is scored in its own task against the same shared
//! snapshot. Results fan in through a channel that closes once the last
//! worker has dropped its sender, which is the join barrier for the tick.
//! Workers only read; nothing here touches the ratio store.

use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::strategy::profit::{EvalError, ProfitModel};
use crate::types::{Pair, PriceSnapshot};

/// A pair whose profit qualifies for a jump.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub pair: Pair,
    pub profit: f64,
}

/// Outcome of scoring one batch of candidates.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub candidates: usize,
    /// Pairs with strictly positive profit.
    pub qualifying: usize,
    /// Pairs excluded because they could not be scored.
    pub failed: usize,
    pub best: Option<Opportunity>,
}

/// Ordering used to pick the winner: higher profit first, then the
/// lexicographically smaller (from, to) on an exact tie.
fn rank(a: &Opportunity, b: &Opportunity) -> Ordering {
    a.profit
        .partial_cmp(&b.profit)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            (&b.pair.from_asset, &b.pair.to_asset).cmp(&(&a.pair.from_asset, &a.pair.to_asset))
        })
}

/// Score `pairs` concurrently and return the best qualifying opportunity.
pub async fn find_best_opportunity(
    pairs: Vec<Pair>,
    snapshot: Arc<PriceSnapshot>,
    bridge: Arc<str>,
    model: ProfitModel,
) -> ScanSummary {
    let mut summary = ScanSummary {
        candidates: pairs.len(),
        ..Default::default()
    };
    if pairs.is_empty() {
        return summary;
    }

    let (tx, mut rx) = mpsc::channel::<(Pair, Result<f64, EvalError>)>(pairs.len());

    for pair in pairs {
        let tx = tx.clone();
        let snapshot = Arc::clone(&snapshot);
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let result = model.evaluate(&pair, &bridge, &snapshot);
            // Receiver only goes away if the tick itself was dropped.
            let _ = tx.send((pair, result)).await;
        });
    }
    drop(tx);

    while let Some((pair, result)) = rx.recv().await {
        match result {
            Ok(profit) if profit > 0.0 => {
                debug!(pair = %pair, profit, "Qualifying opportunity");
                summary.qualifying += 1;
                let candidate = Opportunity { pair, profit };
                let replace = match &summary.best {
                    Some(best) => rank(&candidate, best) == Ordering::Greater,
                    None => true,
                };
                if replace {
                    summary.best = Some(candidate);
                }
            }
            Ok(profit) => {
                debug!(pair = %pair, profit, "Below threshold");
            }
            Err(e) => {
                warn!(pair = %pair, error = %e, "Failed to evaluate pair, skipping");
                summary.failed += 1;
            }
        }
    }

    summary
}
