//! ring-trader: bridge-currency ring arbitrage trader.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! bootstraps the exchange and database, and runs the scout -> jump loop
//! until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use ring_trader::config::{self, AppConfig};
use ring_trader::dashboard::{self, routes::DashboardState};
use ring_trader::engine::{self, Engine};
use ring_trader::exchange::binance::BinanceClient;
use ring_trader::exchange::rate_limit::TokenBucket;
use ring_trader::exchange::signer::Signer;
use ring_trader::exchange::Exchange;
use ring_trader::shutdown;
use ring_trader::storage::Store;
use ring_trader::strategy;

const CONFIG_PATH_ENV: &str = "RING_TRADER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg.logging);

    info!(
        config = %config_path,
        bridge = %cfg.trading.bridge,
        assets = ?cfg.trading.assets,
        strategy = cfg.trading.strategy.as_str(),
        dry_run = cfg.trading.dry_run,
        "ring-trader starting up"
    );
    if !cfg.trading.dry_run {
        warn!("LIVE TRADING ENABLED: orders will be sent to the exchange");
    }

    // -- Components ------------------------------------------------------

    let store = Store::connect(&cfg.database.url).await?;
    let (trigger, shutdown) = shutdown::channel();

    let (api_key, secret_key) = cfg.exchange.credentials(cfg.trading.dry_run)?;
    let signer = Signer::new(api_key, secret_key, cfg.exchange.recv_window_ms);
    let limiter = TokenBucket::new(cfg.exchange.rate_limit, cfg.exchange.rate_limit_burst);
    let client = BinanceClient::new(
        cfg.exchange.base_url(),
        signer,
        limiter,
        cfg.exchange.retry_policy(),
        cfg.exchange.timeout(),
        shutdown.clone(),
    )?;
    info!(base_url = client.base_url(), "Exchange client ready");
    let exchange: Arc<dyn Exchange> = Arc::new(client);

    let ctx = engine::bootstrap(exchange, store.clone(), &cfg.trading, shutdown.clone())
        .await
        .context("Startup failed")?;

    let mut engine = Engine::new(
        ctx,
        strategy::from_kind(cfg.trading.strategy),
        cfg.trading.tick_interval(),
    );
    engine.initialize().await?;

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState {
            history: store.reader(),
            status: engine.status(),
        });
        dashboard::spawn_dashboard(state, cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let signal = shutdown::termination_signal().context("Failed to install signal handlers")?;
    shutdown::trigger_on(trigger, signal);

    engine.run().await;

    if let Some(suspension) = engine.status().suspended().await {
        error!(%suspension, "Exiting with an unresolved jump");
    }
    info!("ring-trader shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = cfg.level.as_deref().unwrap_or("ring_trader=info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json_logging = cfg.json || std::env::var("RING_TRADER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
