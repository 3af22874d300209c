//! Core engine: startup bootstrap and the scout -> jump tick loop.

pub mod executor;
pub mod scanner;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::TradingConfig;
use crate::exchange::rules::ExchangeRules;
use crate::exchange::Exchange;
use crate::shutdown::Shutdown;
use crate::storage::Store;
use crate::strategy::profit::{current_ratio, ProfitModel};
use crate::strategy::{ScoutError, ScoutStrategy, TickOutcome};
use crate::types::PriceSnapshot;
use executor::Suspension;

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Trading parameters fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct TradingSettings {
    pub bridge: Arc<str>,
    /// Units sold per jump by the single-holding strategy.
    pub quantity: f64,
    pub dry_run: bool,
    pub model: ProfitModel,
}

impl TradingSettings {
    pub fn from_config(cfg: &TradingConfig) -> Self {
        Self {
            bridge: Arc::from(cfg.bridge.as_str()),
            quantity: cfg.quantity,
            dry_run: cfg.dry_run,
            model: ProfitModel::new(cfg.fee_rate, cfg.scout_margin_pct),
        }
    }
}

/// Everything a tick needs. Cheap to clone.
#[derive(Clone)]
pub struct TradingContext {
    pub exchange: Arc<dyn Exchange>,
    pub store: Store,
    pub rules: Arc<ExchangeRules>,
    pub settings: Arc<TradingSettings>,
    pub shutdown: Shutdown,
}

/// Check the exchange is reachable, load its trading rules and bring the database in line
/// with the configured assets. Any failure here is fatal.
pub async fn bootstrap(
    exchange: Arc<dyn Exchange>,
    store: Store,
    cfg: &TradingConfig,
    shutdown: Shutdown,
) -> Result<TradingContext> {
    let server_time = exchange
        .server_time()
        .await
        .context("Exchange connectivity check failed")?;
    let skew_ms = Utc::now().timestamp_millis() - server_time;
    info!(server_time, skew_ms, "Exchange reachable");

    let info = exchange
        .exchange_info()
        .await
        .context("Failed to fetch exchange trading rules")?;
    let rules = ExchangeRules::from_exchange_info(&info);
    info!(symbols = info.symbols.len(), lot_rules = rules.len(), "Trading rules loaded");

    store
        .sync_assets(&cfg.seed_assets())
        .await
        .context("Failed to seed assets")?;

    let mut created = 0usize;
    for from in &cfg.assets {
        for to in cfg.assets.iter().filter(|to| *to != from) {
            if store.ensure_pair(from, to).await? {
                created += 1;
            }
        }
    }
    info!(assets = cfg.assets.len(), created, "Pairs ready");

    let ctx = TradingContext {
        exchange,
        store,
        rules: Arc::new(rules),
        settings: Arc::new(TradingSettings::from_config(cfg)),
        shutdown,
    };

    let snapshot = ctx
        .exchange
        .ticker_prices()
        .await
        .context("Failed to fetch prices for ratio initialisation")?;
    let initialised = initialize_ratios(&ctx, &snapshot).await?;
    if initialised > 0 {
        info!(pairs = initialised, "Benchmark ratios initialised");
    }

    Ok(ctx)
}

/// Benchmark every pair that has no ratio yet at the snapshot prices.
/// Pairs whose prices are missing stay uninitialised and are skipped by
/// evaluation until a later jump benchmarks them.
pub async fn initialize_ratios(ctx: &TradingContext, snapshot: &PriceSnapshot) -> Result<usize> {
    let bridge: &str = &ctx.settings.bridge;
    let mut count = 0;
    for pair in ctx.store.all_pairs().await? {
        if pair.is_initialized() || pair.to_asset == bridge {
            continue;
        }
        match current_ratio(&pair.from_asset, &pair.to_asset, bridge, snapshot) {
            Ok(ratio) => {
                ctx.store.set_ratio(pair.id, ratio).await?;
                count += 1;
            }
            Err(e) => warn!(pair = %pair, error = %e, "Cannot initialise ratio"),
        }
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Progress {
    ticks: u64,
    jumps: u64,
    failed_ticks: u64,
    last_tick_at: Option<DateTime<Utc>>,
    last_outcome: Option<String>,
    suspended: Option<Suspension>,
}

/// Live engine status, shared with the dashboard.
#[derive(Debug)]
pub struct EngineStatus {
    pub instance_id: uuid::Uuid,
    pub strategy: &'static str,
    pub bridge: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    progress: RwLock<Progress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub instance_id: String,
    pub strategy: String,
    pub bridge: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub ticks: u64,
    pub jumps: u64,
    pub failed_ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    /// Set once a jump stopped halfway or went unrecorded; no further jumps
    /// until restart.
    pub suspended: Option<Suspension>,
}

impl EngineStatus {
    pub fn new(strategy: &'static str, bridge: &str, dry_run: bool) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4(),
            strategy,
            bridge: bridge.to_string(),
            dry_run,
            started_at: Utc::now(),
            progress: RwLock::new(Progress::default()),
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let p = self.progress.read().await;
        StatusSnapshot {
            instance_id: self.instance_id.to_string(),
            strategy: self.strategy.to_string(),
            bridge: self.bridge.clone(),
            dry_run: self.dry_run,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            ticks: p.ticks,
            jumps: p.jumps,
            failed_ticks: p.failed_ticks,
            last_tick_at: p.last_tick_at,
            last_outcome: p.last_outcome.clone(),
            suspended: p.suspended.clone(),
        }
    }

    pub async fn suspended(&self) -> Option<Suspension> {
        self.progress.read().await.suspended.clone()
    }

    async fn record(&self, result: &Result<TickOutcome, ScoutError>) {
        let mut p = self.progress.write().await;
        p.ticks += 1;
        p.last_tick_at = Some(Utc::now());
        let outcome = match result {
            Ok(TickOutcome::Idle { candidates, failed }) => {
                format!("idle ({candidates} candidates, {failed} failed)")
            }
            Ok(TickOutcome::Deferred) => "deferred by shutdown".to_string(),
            Ok(TickOutcome::Jumped(r)) => {
                p.jumps += 1;
                format!("jumped {}->{} ({:.4}%)", r.from_asset, r.to_asset, r.profit * 100.0)
            }
            Err(e) => {
                p.failed_ticks += 1;
                match e.suspension() {
                    Some(suspension) => {
                        let outcome = format!("suspended: {suspension}");
                        p.suspended = Some(suspension);
                        outcome
                    }
                    None => format!("error: {e}"),
                }
            }
        };
        p.last_outcome = Some(outcome);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    ctx: TradingContext,
    strategy: Box<dyn ScoutStrategy>,
    status: Arc<EngineStatus>,
    interval: Duration,
}

impl Engine {
    pub fn new(ctx: TradingContext, strategy: Box<dyn ScoutStrategy>, interval: Duration) -> Self {
        let status = Arc::new(EngineStatus::new(
            strategy.name(),
            &ctx.settings.bridge,
            ctx.settings.dry_run,
        ));
        Self {
            ctx,
            strategy,
            status,
            interval,
        }
    }

    pub fn status(&self) -> Arc<EngineStatus> {
        Arc::clone(&self.status)
    }

    pub fn context(&self) -> &TradingContext {
        &self.ctx
    }

    pub async fn initialize(&mut self) -> Result<()> {
        self.strategy
            .initialize(&self.ctx)
            .await
            .with_context(|| format!("Failed to initialise {} strategy", self.strategy.name()))?;
        let holding = self.ctx.store.current_holding().await?;
        info!(
            strategy = self.strategy.name(),
            holding = holding.as_ref().map(|h| h.symbol.as_str()).unwrap_or("<none>"),
            dry_run = self.ctx.settings.dry_run,
            "Engine initialised"
        );
        Ok(())
    }

    /// Run one tick. Returns `None` while suspended.
    pub async fn tick(&mut self) -> Option<Result<TickOutcome, ScoutError>> {
        if let Some(suspension) = self.status.suspended().await {
            warn!(%suspension, "Engine suspended, skipping tick");
            return None;
        }

        let result = self.strategy.scout(&self.ctx).await;
        match &result {
            Ok(TickOutcome::Jumped(report)) => info!(
                from = %report.from_asset,
                to = %report.to_asset,
                profit = report.profit,
                simulated = report.simulated,
                "Tick jumped"
            ),
            Ok(_) => {}
            Err(e) => match e.suspension() {
                Some(suspension) => error!(
                    %suspension,
                    "Jumps suspended until the operator reconciles the account and restarts"
                ),
                None => warn!(error = %e, "Tick failed, retrying next interval"),
            },
        }
        self.status.record(&result).await;
        Some(result)
    }

    /// Tick until shutdown. Ticks never overlap; a late tick delays the next
    /// one instead of bursting.
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.ctx.shutdown.clone();

        info!(interval_secs = self.interval.as_secs(), "Entering main loop. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!("Shutdown signal received.");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        let status = self.status.snapshot().await;
        info!(
            ticks = status.ticks,
            jumps = status.jumps,
            failed_ticks = status.failed_ticks,
            "Engine stopped cleanly."
        );
    }
}
