//! End-to-end scouting ticks against the in-memory exchange and database.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use ring_trader::config::{AppConfig, StrategyKind};
use ring_trader::engine::executor::JumpError;
use ring_trader::engine::scanner::find_best_opportunity;
use ring_trader::engine::{bootstrap, Engine};
use ring_trader::exchange::Exchange;
use ring_trader::shutdown::Shutdown;
use ring_trader::storage::Store;
use ring_trader::strategy::{self, ScoutError, TickOutcome};
use ring_trader::types::{Pair, Side};

use crate::mock_exchange::MockExchange;

const CONFIG: &str = r#"
    [trading]
    bridge = "USDT"
    assets = ["BTC", "ETH", "BNB"]
    strategy = "single_holding"
    quantity = 0.01
    fee_rate = 0.001
    scout_margin_pct = 0.0
    dry_run = false

    [trading.initial_quantities]
    ETH = 1.0
"#;

fn config() -> AppConfig {
    AppConfig::from_toml_str(CONFIG).unwrap()
}

fn market() -> MockExchange {
    let ex = MockExchange::new();
    ex.set_price("BTCUSDT", "30000");
    ex.set_price("ETHUSDT", "2000");
    ex.set_price("BNBUSDT", "300");
    ex
}

/// Bootstrapped engine holding `holding`, benchmarked at the `market()`
/// prices.
async fn engine(ex: &MockExchange, cfg: &AppConfig, holding: &str) -> (Engine, Store) {
    let store = Store::in_memory().await.unwrap();
    let ctx = bootstrap(
        Arc::new(ex.clone()),
        store.clone(),
        &cfg.trading,
        Shutdown::never(),
    )
    .await
    .unwrap();
    store.set_current_holding(holding).await.unwrap();

    let mut engine = Engine::new(
        ctx,
        strategy::from_kind(cfg.trading.strategy),
        Duration::from_secs(5),
    );
    engine.initialize().await.unwrap();
    (engine, store)
}

fn ratio(pairs: &[Pair], from: &str, to: &str) -> f64 {
    pairs
        .iter()
        .find(|p| p.from_asset == from && p.to_asset == to)
        .map(|p| p.ratio)
        .unwrap()
}

#[tokio::test]
async fn test_btc_to_eth_jump_rebenchmarks_new_holding() {
    let ex = market();
    let cfg = config();
    let (mut engine, store) = engine(&ex, &cfg, "BTC").await;
    assert!((ratio(&store.all_pairs().await.unwrap(), "BTC", "ETH") - 15.0).abs() < 1e-9);

    ex.set_price("ETHUSDT", "1800");
    let outcome = engine.tick().await.unwrap().unwrap();
    let TickOutcome::Jumped(report) = outcome else {
        panic!("expected a jump, got {outcome:?}");
    };
    assert!((report.profit - 0.10889).abs() < 1e-4);
    assert!(!report.simulated);

    let orders = ex.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].symbol, "BTCUSDT");
    assert_eq!(orders[0].side, Side::Sell);
    assert_eq!(orders[0].quantity, dec!(0.01));
    assert_eq!(orders[1].symbol, "ETHUSDT");
    assert_eq!(orders[1].side, Side::Buy);
    assert_eq!(orders[1].quantity, dec!(0.1665));

    assert_eq!(store.current_holding().await.unwrap().unwrap().symbol, "ETH");
    let pairs = store.all_pairs().await.unwrap();
    assert!((ratio(&pairs, "ETH", "BTC") - 0.06).abs() < 1e-12);
    assert!((ratio(&pairs, "ETH", "BNB") - 6.0).abs() < 1e-12);
    // Untouched: pairs out of other assets keep their benchmark.
    assert!((ratio(&pairs, "BTC", "ETH") - 15.0).abs() < 1e-9);

    let trades = store.trades(None).await.unwrap();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().all(|t| !t.is_simulation));

    let now = chrono::Utc::now().timestamp_millis();
    let stats = store.reader().statistics(now).await.unwrap();
    assert_eq!(stats.all_time.total, 1);
    assert_eq!(stats.all_time.profitable, 1);
}

#[tokio::test]
async fn test_eth_at_2000_does_not_trade() {
    let ex = market();
    let cfg = config();
    let (mut engine, store) = engine(&ex, &cfg, "BTC").await;

    let outcome = engine.tick().await.unwrap().unwrap();
    assert!(matches!(outcome, TickOutcome::Idle { .. }));
    assert!(ex.orders().is_empty());
    assert!(store.trades(None).await.unwrap().is_empty());
    assert_eq!(store.current_holding().await.unwrap().unwrap().symbol, "BTC");
}

#[tokio::test]
async fn test_evaluation_never_mutates_ratios() {
    let ex = market();
    let cfg = config();
    let (mut engine, store) = engine(&ex, &cfg, "BTC").await;
    let before = store.all_pairs().await.unwrap();

    // Moves that stay under the fee: nothing qualifies.
    for eth in ["2001", "1999", "2002"] {
        ex.set_price("ETHUSDT", eth);
        engine.tick().await.unwrap().unwrap();
    }

    let snapshot = Arc::new(ex.ticker_prices().await.unwrap());
    let summary = find_best_opportunity(
        before.clone(),
        snapshot,
        Arc::from("USDT"),
        engine.context().settings.model,
    )
    .await;
    assert_eq!(summary.candidates, 6);

    assert_eq!(store.all_pairs().await.unwrap(), before);
    assert!(ex.orders().is_empty());
}

#[tokio::test]
async fn test_partial_jump_suspends_engine() {
    let ex = market();
    ex.reject_orders_for("ETHUSDT");
    let cfg = config();
    let (mut engine, store) = engine(&ex, &cfg, "BTC").await;

    ex.set_price("ETHUSDT", "1800");
    let err = engine.tick().await.unwrap().unwrap_err();
    let ScoutError::Jump(JumpError::PartialJump(partial)) = err else {
        panic!("expected a partial jump, got {err:?}");
    };
    assert_eq!(partial.from_asset, "BTC");
    assert_eq!(partial.to_asset, "ETH");
    assert!((partial.bridge_amount - 299.7).abs() < 1e-9);

    let status = engine.status().snapshot().await;
    assert!(status.suspended.is_some());

    // Further ticks do nothing at all.
    assert!(engine.tick().await.is_none());
    assert_eq!(ex.orders().len(), 1);
    assert_eq!(store.current_holding().await.unwrap().unwrap().symbol, "BTC");
    let trades = store.trades(None).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].side, Side::Sell);
}

#[tokio::test]
async fn test_price_outage_skips_tick() {
    let ex = market();
    let cfg = config();
    let (mut engine, store) = engine(&ex, &cfg, "BTC").await;

    ex.set_prices_down(true);
    let err = engine.tick().await.unwrap().unwrap_err();
    assert!(matches!(err, ScoutError::Snapshot(_)));
    assert_eq!(store.current_holding().await.unwrap().unwrap().symbol, "BTC");

    ex.set_prices_down(false);
    ex.set_price("ETHUSDT", "1800");
    let outcome = engine.tick().await.unwrap().unwrap();
    assert!(matches!(outcome, TickOutcome::Jumped(_)));

    let status = engine.status().snapshot().await;
    assert_eq!(status.ticks, 2);
    assert_eq!(status.failed_ticks, 1);
    assert_eq!(status.jumps, 1);
    assert!(status.suspended.is_none());
}

#[tokio::test]
async fn test_quantities_are_floored_to_lot_step() {
    let ex = market();
    ex.set_lot_size("BTCUSDT", "0.001", "0.001");
    ex.set_lot_size("ETHUSDT", "0.01", "0.01");
    let mut cfg = config();
    cfg.trading.quantity = 0.0109;
    let (mut engine, _store) = engine(&ex, &cfg, "BTC").await;

    ex.set_price("ETHUSDT", "1800");
    engine.tick().await.unwrap().unwrap();

    let orders = ex.orders();
    assert_eq!(orders[0].quantity, dec!(0.01));
    // 300 * 0.999 / 1800 = 0.1665 -> 0.16
    assert_eq!(orders[1].quantity, dec!(0.16));
}

#[tokio::test]
async fn test_sell_below_minimum_sends_nothing() {
    let ex = market();
    ex.set_lot_size("BTCUSDT", "0.1", "0.001");
    let cfg = config();
    let (mut engine, store) = engine(&ex, &cfg, "BTC").await;

    ex.set_price("ETHUSDT", "1800");
    let err = engine.tick().await.unwrap().unwrap_err();
    assert!(matches!(err, ScoutError::Jump(JumpError::Sizing(_))));
    assert!(ex.orders().is_empty());
    assert!(store.trades(None).await.unwrap().is_empty());
    assert!(engine.status().snapshot().await.suspended.is_none());
}

#[tokio::test]
async fn test_multi_asset_jumps_stored_quantity() {
    let ex = market();
    let mut cfg = config();
    cfg.trading.strategy = StrategyKind::MultiAsset;
    cfg.trading.dry_run = true;

    let store = Store::in_memory().await.unwrap();
    let ctx = bootstrap(Arc::new(ex.clone()), store.clone(), &cfg.trading, Shutdown::never())
        .await
        .unwrap();
    let mut engine = Engine::new(
        ctx,
        strategy::from_kind(cfg.trading.strategy),
        Duration::from_secs(5),
    );
    engine.initialize().await.unwrap();
    assert_eq!(store.current_holding().await.unwrap().unwrap().symbol, "USDT");

    ex.set_price("ETHUSDT", "2200");
    ex.set_price("BNBUSDT", "310");
    let outcome = engine.tick().await.unwrap().unwrap();
    let TickOutcome::Jumped(report) = outcome else {
        panic!("expected a jump, got {outcome:?}");
    };
    assert_eq!((report.from_asset.as_str(), report.to_asset.as_str()), ("ETH", "BTC"));
    assert_eq!(report.sold, dec!(1));
    assert!(report.simulated);
    // Dry run: nothing reaches the exchange.
    assert!(ex.orders().is_empty());

    assert_eq!(store.asset("ETH").await.unwrap().unwrap().quantity, 0.0);
    let btc = store.asset("BTC").await.unwrap().unwrap().quantity;
    assert!((btc - 0.07326).abs() < 1e-9);
}
