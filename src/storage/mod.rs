//! Persistence layer.
//!
//! SQLite via `sqlx`. [`Store`] is the engine's read/write handle over
//! assets, pairs, the current holding and trade history. [`TradeHistory`]
//! is the read-only view handed to reporting code.

pub mod schema;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{Asset, CurrentHolding, NewTrade, Pair, Trade};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

const TRADE_COLUMNS: &str = "id, symbol, side, price, quantity, quote_quantity, timestamp, \
                             is_simulation, order_id, profit";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// State transition applied once both legs of a jump are confirmed.
#[derive(Debug, Clone)]
pub struct JumpCommit {
    pub from_asset: String,
    pub to_asset: String,
    /// Units of `from_asset` sold.
    pub sold: f64,
    /// Units of `to_asset` bought.
    pub bought: f64,
    pub buy_trade: NewTrade,
    /// New benchmark ratios, by pair id.
    pub ratios: Vec<(i64, f64)>,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL {url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    /// Private in-memory database. A single long-lived connection keeps it
    /// alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory database URL")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in schema::MIGRATIONS {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    /// Read-only handle for reporting.
    pub fn reader(&self) -> TradeHistory {
        TradeHistory {
            pool: self.pool.clone(),
        }
    }

    // -- Assets -------------------------------------------------------------

    /// Enable exactly the given assets. New rows take the given initial
    /// quantity; existing rows keep theirs. Unlisted assets are disabled.
    pub async fn sync_assets(&self, assets: &[(String, f64)]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("UPDATE assets SET enabled = 0")
            .execute(&mut *tx)
            .await
            .context("Failed to disable assets")?;

        for (symbol, quantity) in assets {
            sqlx::query(
                "INSERT INTO assets (symbol, enabled, quantity) VALUES (?, 1, ?) \
                 ON CONFLICT(symbol) DO UPDATE SET enabled = 1",
            )
            .bind(symbol)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert asset {symbol}"))?;
        }

        tx.commit().await.context("Failed to commit asset sync")?;
        debug!(count = assets.len(), "Assets synchronised");
        Ok(())
    }

    pub async fn asset(&self, symbol: &str) -> Result<Option<Asset>> {
        sqlx::query_as::<_, Asset>("SELECT symbol, enabled, quantity FROM assets WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load asset {symbol}"))
    }

    /// Enabled assets, by symbol.
    pub async fn enabled_assets(&self) -> Result<Vec<Asset>> {
        sqlx::query_as::<_, Asset>(
            "SELECT symbol, enabled, quantity FROM assets WHERE enabled = 1 ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load assets")
    }

    pub async fn set_asset_quantity(&self, symbol: &str, quantity: f64) -> Result<()> {
        sqlx::query("UPDATE assets SET quantity = ? WHERE symbol = ?")
            .bind(quantity)
            .bind(symbol)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to set quantity of {symbol}"))?;
        Ok(())
    }

    // -- Pairs --------------------------------------------------------------

    /// Create the (from, to) pair with an uninitialised ratio unless it
    /// already exists. Returns true if a row was inserted.
    pub async fn ensure_pair(&self, from: &str, to: &str) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO pairs (from_asset, to_asset, ratio) VALUES (?, ?, 0) \
             ON CONFLICT(from_asset, to_asset) DO NOTHING",
        )
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create pair {from}->{to}"))?;
        Ok(res.rows_affected() > 0)
    }

    /// Pairs between enabled assets.
    pub async fn all_pairs(&self) -> Result<Vec<Pair>> {
        sqlx::query_as::<_, Pair>(
            "SELECT p.id, p.from_asset, p.to_asset, p.ratio FROM pairs p \
             JOIN assets f ON f.symbol = p.from_asset AND f.enabled = 1 \
             JOIN assets t ON t.symbol = p.to_asset AND t.enabled = 1 \
             ORDER BY p.from_asset, p.to_asset",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pairs")
    }

    /// Pairs originating at `from` whose target is enabled.
    pub async fn pairs_from(&self, from: &str) -> Result<Vec<Pair>> {
        sqlx::query_as::<_, Pair>(
            "SELECT p.id, p.from_asset, p.to_asset, p.ratio FROM pairs p \
             JOIN assets t ON t.symbol = p.to_asset AND t.enabled = 1 \
             WHERE p.from_asset = ? \
             ORDER BY p.to_asset",
        )
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load pairs from {from}"))
    }

    pub async fn set_ratio(&self, pair_id: i64, ratio: f64) -> Result<()> {
        sqlx::query("UPDATE pairs SET ratio = ? WHERE id = ?")
            .bind(ratio)
            .bind(pair_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update ratio of pair {pair_id}"))?;
        Ok(())
    }

    // -- Current holding ----------------------------------------------------

    pub async fn current_holding(&self) -> Result<Option<CurrentHolding>> {
        fetch_holding(&self.pool).await
    }

    pub async fn set_current_holding(&self, symbol: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO current_holding (id, symbol, updated_at) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET symbol = excluded.symbol, updated_at = excluded.updated_at",
        )
        .bind(symbol)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to set current holding to {symbol}"))?;
        Ok(())
    }

    // -- Trades -------------------------------------------------------------

    /// Append one trade leg. Returns its row id.
    pub async fn record_trade(&self, trade: &NewTrade) -> Result<i64> {
        let res = bind_trade(sqlx::query(INSERT_TRADE), trade)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to record {} {} trade", trade.side, trade.symbol))?;
        Ok(res.last_insert_rowid())
    }

    pub async fn trades(&self, limit: Option<i64>) -> Result<Vec<Trade>> {
        fetch_trades(&self.pool, limit).await
    }

    /// Run a raw statement, e.g. to install a failing trigger.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .context("Raw statement failed")?;
        Ok(())
    }

    // -- Jump ---------------------------------------------------------------

    /// Apply a completed jump in one transaction: the closing trade, the new
    /// holding, asset quantities and re-benchmarked ratios.
    pub async fn commit_jump(&self, commit: &JumpCommit) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        bind_trade(sqlx::query(INSERT_TRADE), &commit.buy_trade)
            .execute(&mut *tx)
            .await
            .context("Failed to record closing trade")?;

        sqlx::query(
            "INSERT INTO current_holding (id, symbol, updated_at) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET symbol = excluded.symbol, updated_at = excluded.updated_at",
        )
        .bind(&commit.to_asset)
        .bind(now_ms())
        .execute(&mut *tx)
        .await
        .context("Failed to update current holding")?;

        sqlx::query("UPDATE assets SET quantity = MAX(quantity - ?, 0) WHERE symbol = ?")
            .bind(commit.sold)
            .bind(&commit.from_asset)
            .execute(&mut *tx)
            .await
            .context("Failed to debit source asset")?;

        sqlx::query("UPDATE assets SET quantity = quantity + ? WHERE symbol = ?")
            .bind(commit.bought)
            .bind(&commit.to_asset)
            .execute(&mut *tx)
            .await
            .context("Failed to credit target asset")?;

        for (pair_id, ratio) in &commit.ratios {
            sqlx::query("UPDATE pairs SET ratio = ? WHERE id = ?")
                .bind(ratio)
                .bind(pair_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to re-benchmark pair {pair_id}"))?;
        }

        tx.commit().await.context("Failed to commit jump")?;
        Ok(())
    }
}

const INSERT_TRADE: &str = "INSERT INTO trades \
     (symbol, side, price, quantity, quote_quantity, timestamp, is_simulation, order_id, profit) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn bind_trade<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    trade: &'q NewTrade,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&trade.symbol)
        .bind(trade.side)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.quote_quantity)
        .bind(trade.timestamp)
        .bind(trade.is_simulation)
        .bind(&trade.order_id)
        .bind(trade.profit)
}

async fn fetch_holding(pool: &SqlitePool) -> Result<Option<CurrentHolding>> {
    sqlx::query_as::<_, CurrentHolding>(
        "SELECT symbol, updated_at FROM current_holding WHERE id = 1",
    )
    .fetch_optional(pool)
    .await
    .context("Failed to load current holding")
}

async fn fetch_trades(pool: &SqlitePool, limit: Option<i64>) -> Result<Vec<Trade>> {
    // SQLite treats a negative LIMIT as unbounded.
    sqlx::query_as::<_, Trade>(&format!(
        "SELECT {TRADE_COLUMNS} FROM trades ORDER BY timestamp DESC, id DESC LIMIT ?"
    ))
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await
    .context("Failed to load trades")
}

// ---------------------------------------------------------------------------
// Read-only reporting handle
// ---------------------------------------------------------------------------

/// Aggregate over closing trades (those carrying a profit) in one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub total: i64,
    pub profitable: i64,
    pub win_rate: f64,
    pub total_profit: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStatistics {
    pub since_24h: WindowStats,
    pub all_time: WindowStats,
}

/// Read-only view over the holding and trade history. Has no write methods.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    pool: SqlitePool,
}

impl TradeHistory {
    pub async fn current_holding(&self) -> Result<Option<CurrentHolding>> {
        fetch_holding(&self.pool).await
    }

    /// Newest first.
    pub async fn trades(&self, limit: Option<i64>) -> Result<Vec<Trade>> {
        fetch_trades(&self.pool, limit).await
    }

    /// Run a raw statement, e.g. to install a failing trigger.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .context("Raw statement failed")?;
        Ok(())
    }

    pub async fn statistics(&self, now_ms: i64) -> Result<TradeStatistics> {
        Ok(TradeStatistics {
            since_24h: self.window(now_ms - DAY_MS).await?,
            all_time: self.window(i64::MIN).await?,
        })
    }

    async fn window(&self, since_ms: i64) -> Result<WindowStats> {
        let (total, profitable, total_profit): (i64, i64, f64) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COALESCE(SUM(CASE WHEN profit > 0 THEN 1 ELSE 0 END), 0), \
                    COALESCE(SUM(profit), 0.0) \
             FROM trades WHERE profit IS NOT NULL AND timestamp >= ?",
        )
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate trades")?;

        let win_rate = if total > 0 {
            profitable as f64 / total as f64
        } else {
            0.0
        };

        Ok(WindowStats {
            total,
            profitable,
            win_rate,
            total_profit,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
