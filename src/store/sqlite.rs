//! SQLite-backed durable store.
//!
//! Single-writer discipline: the orchestrator is the only writer; reporting
//! readers share the pool. Decimals round-trip through TEXT to avoid float
//! drift. Closing a position writes the position update and the trade insert
//! inside one transaction, so a crash cannot leave a CLOSED position without
//! its Trade row.

use crate::domain::{AccountState, Direction, Position, PositionStatus, Trade};
use crate::error::{MarlinError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

/// One point on the account equity curve.
#[derive(Debug, Clone, PartialEq)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: Decimal,
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub num_positions: i64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

type PositionRow = (
    String,                // id
    String,                // pair
    String,                // direction
    String,                // entry_price
    String,                // quantity
    DateTime<Utc>,         // entry_time
    String,                // strategy_name
    String,                // status
    Option<String>,        // exit_price
    Option<DateTime<Utc>>, // exit_time
    String,                // exit_reason
    Option<String>,        // stop_loss_price
    Option<String>,        // take_profit_price
    Option<i64>,           // signal_id
);

type TradeRow = (
    String,        // id
    String,        // pair
    String,        // strategy_name
    String,        // direction
    String,        // entry_price
    String,        // exit_price
    DateTime<Utc>, // entry_time
    DateTime<Utc>, // exit_time
    String,        // quantity
    String,        // pnl
    String,        // fees
    String,        // exit_reason
);

impl SqliteStore {
    /// Open (creating if missing) and initialize the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        // SQLite creates the file but not its directory
        if let Some(path) = url.strip_prefix("sqlite://") {
            if !path.starts_with(':') {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(MarlinError::Database)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("Database ready at {url}");
        Ok(store)
    }

    /// In-memory store for backtests and tests.
    pub async fn in_memory() -> Result<Self> {
        // A single connection: every handle must see the same memory database
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                status TEXT NOT NULL,
                exit_price TEXT,
                exit_time TEXT,
                exit_reason TEXT NOT NULL DEFAULT '',
                stop_loss_price TEXT,
                take_profit_price TEXT,
                signal_id INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                quantity TEXT NOT NULL,
                pnl TEXT NOT NULL,
                fees TEXT NOT NULL,
                exit_reason TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                cash TEXT NOT NULL,
                equity TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reconciliation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                pair TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                cash TEXT NOT NULL,
                equity TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                num_positions INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Positions ====================

    pub async fn insert_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, pair, direction, entry_price, quantity, entry_time,
                strategy_name, status, exit_price, exit_time, exit_reason,
                stop_loss_price, take_profit_price, signal_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&position.id)
        .bind(&position.pair)
        .bind(position.direction.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.entry_time)
        .bind(&position.strategy_name)
        .bind(position.status.to_string())
        .bind(position.exit_price.map(|p| p.to_string()))
        .bind(position.exit_time)
        .bind(&position.exit_reason)
        .bind(position.stop_loss_price.map(|p| p.to_string()))
        .bind(position.take_profit_price.map(|p| p.to_string()))
        .bind(position.signal_id)
        .execute(&self.pool)
        .await?;

        debug!("Inserted position {} ({})", position.id, position.pair);
        Ok(())
    }

    /// Persist a close: update the position row and append the trade row in
    /// one transaction.
    pub async fn close_position(&self, closed: &Position, trade: &Trade) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE positions
            SET status = ?1, exit_price = ?2, exit_time = ?3, exit_reason = ?4
            WHERE id = ?5
            "#,
        )
        .bind(PositionStatus::Closed.to_string())
        .bind(closed.exit_price.map(|p| p.to_string()))
        .bind(closed.exit_time)
        .bind(&closed.exit_reason)
        .bind(&closed.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, pair, strategy_name, direction, entry_price, exit_price,
                entry_time, exit_time, quantity, pnl, fees, exit_reason
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.pair)
        .bind(&trade.strategy_name)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.entry_time)
        .bind(trade.exit_time)
        .bind(trade.quantity.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.fees.to_string())
        .bind(&trade.exit_reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Closed position {} ({})", closed.id, closed.pair);
        Ok(())
    }

    pub async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            r#"
            SELECT id, pair, direction, entry_price, quantity, entry_time,
                   strategy_name, status, exit_price, exit_time, exit_reason,
                   stop_loss_price, take_profit_price, signal_id
            FROM positions
            WHERE status = 'OPEN'
            ORDER BY entry_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(position_from_row).collect()
    }

    // ==================== Account state ====================

    pub async fn get_account_state(&self) -> Result<Option<AccountState>> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT cash, equity, last_updated FROM account_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(cash, equity, last_updated)| {
            Ok(AccountState {
                cash: parse_decimal(&cash)?,
                equity: parse_decimal(&equity)?,
                last_updated,
            })
        })
        .transpose()
    }

    pub async fn save_account_state(&self, cash: Decimal, equity: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_state (id, cash, equity, last_updated)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE
            SET cash = excluded.cash,
                equity = excluded.equity,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(cash.to_string())
        .bind(equity.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trades ====================

    /// Most recent trades, newest first.
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT id, pair, strategy_name, direction, entry_price, exit_price,
                   entry_time, exit_time, quantity, pnl, fees, exit_reason
            FROM trades
            ORDER BY exit_time DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trade_from_row).collect()
    }

    /// Trades whose exit falls at or after the given instant.
    pub async fn trades_closed_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT id, pair, strategy_name, direction, entry_price, exit_price,
                   entry_time, exit_time, quantity, pnl, fees, exit_reason
            FROM trades
            WHERE exit_time >= ?1
            ORDER BY exit_time DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trade_from_row).collect()
    }

    pub async fn all_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            r#"
            SELECT id, pair, strategy_name, direction, entry_price, exit_price,
                   entry_time, exit_time, quantity, pnl, fees, exit_reason
            FROM trades
            ORDER BY exit_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trade_from_row).collect()
    }

    // ==================== Audit log ====================

    /// Append to the reconciliation audit log, independent of the trades table.
    pub async fn insert_reconciliation_log(
        &self,
        action: &str,
        pair: &str,
        details: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_log (action, pair, details, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(action)
        .bind(pair)
        .bind(details)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn reconciliation_log(&self) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT action, pair, details FROM reconciliation_log ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ==================== Equity snapshots ====================

    pub async fn insert_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_snapshots (timestamp, cash, equity, unrealized_pnl, num_positions)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(snapshot.timestamp)
        .bind(snapshot.cash.to_string())
        .bind(snapshot.equity.to_string())
        .bind(snapshot.unrealized_pnl.to_string())
        .bind(snapshot.num_positions)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| MarlinError::Internal(format!("invalid decimal in store: {raw} ({e})")))
}

fn position_from_row(row: PositionRow) -> Result<Position> {
    let (
        id,
        pair,
        direction,
        entry_price,
        quantity,
        entry_time,
        strategy_name,
        status,
        exit_price,
        exit_time,
        exit_reason,
        stop_loss_price,
        take_profit_price,
        signal_id,
    ) = row;

    let status = match status.as_str() {
        "OPEN" => PositionStatus::Open,
        "CLOSED" => PositionStatus::Closed,
        other => {
            return Err(MarlinError::Internal(format!(
                "Invalid position status: {other}"
            )))
        }
    };

    Position::from_parts(
        id,
        pair,
        direction.parse::<Direction>()?,
        parse_decimal(&entry_price)?,
        parse_decimal(&quantity)?,
        entry_time,
        strategy_name,
        status,
        exit_price.as_deref().map(parse_decimal).transpose()?,
        exit_time,
        exit_reason,
        stop_loss_price.as_deref().map(parse_decimal).transpose()?,
        take_profit_price.as_deref().map(parse_decimal).transpose()?,
        signal_id,
    )
}

fn trade_from_row(row: TradeRow) -> Result<Trade> {
    let (
        id,
        pair,
        strategy_name,
        direction,
        entry_price,
        exit_price,
        entry_time,
        exit_time,
        quantity,
        pnl,
        fees,
        exit_reason,
    ) = row;

    Ok(Trade {
        id,
        pair,
        strategy_name,
        direction: direction.parse::<Direction>()?,
        entry_price: parse_decimal(&entry_price)?,
        exit_price: parse_decimal(&exit_price)?,
        entry_time,
        exit_time,
        quantity: parse_decimal(&quantity)?,
        pnl: parse_decimal(&pnl)?,
        fees: parse_decimal(&fees)?,
        exit_reason,
    })
}
