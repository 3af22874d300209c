//! SQLite schema. Every statement is idempotent and applied at connect.

pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        symbol   TEXT PRIMARY KEY NOT NULL,
        enabled  INTEGER NOT NULL DEFAULT 1,
        quantity REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pairs (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        from_asset TEXT NOT NULL REFERENCES assets(symbol),
        to_asset   TEXT NOT NULL REFERENCES assets(symbol),
        ratio      REAL NOT NULL DEFAULT 0,
        UNIQUE (from_asset, to_asset),
        CHECK (from_asset <> to_asset)
    )
    "#,
    // Singleton row: id is pinned to 1.
    r#"
    CREATE TABLE IF NOT EXISTS current_holding (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        symbol     TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trades (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol         TEXT NOT NULL,
        side           TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
        price          REAL NOT NULL,
        quantity       REAL NOT NULL,
        quote_quantity REAL NOT NULL,
        timestamp      INTEGER NOT NULL,
        is_simulation  INTEGER NOT NULL,
        order_id       TEXT NOT NULL,
        profit         REAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades (timestamp)",
];
