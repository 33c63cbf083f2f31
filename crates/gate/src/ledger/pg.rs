//! Postgres ledger. Runtime queries; the schema is ensured at startup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use condor_core::types::{Bias, StrategyKind};

use super::{Ledger, OrderRecord, PositionMetadata, PositionRow, ProposalRecord};

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Connects and ensures the schema exists.
    ///
    /// # Errors
    /// Returns an error when the connection or schema setup fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("ledger database connection failed")?;
        let ledger = Self { pool };
        ledger.ensure_schema().await?;
        Ok(ledger)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            r"CREATE TABLE IF NOT EXISTS proposals (
                id TEXT PRIMARY KEY,
                ts TIMESTAMPTZ NOT NULL,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity BIGINT NOT NULL,
                context_json JSONB NOT NULL,
                status TEXT NOT NULL,
                rejection_reason TEXT
            )",
            r"CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                proposal_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                quantity BIGINT NOT NULL,
                filled_price NUMERIC,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            r"CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT NOT NULL,
                quantity BIGINT NOT NULL,
                cost_basis NUMERIC NOT NULL,
                date_acquired TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            r"CREATE TABLE IF NOT EXISTS system_status (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                reason TEXT,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            r"CREATE TABLE IF NOT EXISTS position_metadata (
                order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                bias TEXT NOT NULL,
                strategy TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
            r"CREATE TABLE IF NOT EXISTS equity_snapshots (
                at TIMESTAMPTZ NOT NULL,
                kind TEXT NOT NULL,
                day DATE,
                equity NUMERIC NOT NULL
            )",
            r"CREATE UNIQUE INDEX IF NOT EXISTS equity_sod_day
                ON equity_snapshots (kind, day) WHERE kind = 'sod'",
            r"CREATE TABLE IF NOT EXISTS restricted_dates (day DATE PRIMARY KEY)",
            r"CREATE TABLE IF NOT EXISTS heartbeat_state (
                id TEXT PRIMARY KEY,
                at TIMESTAMPTZ NOT NULL,
                state_json JSONB
            )",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn row_to_proposal(row: &sqlx::postgres::PgRow) -> ProposalRecord {
    ProposalRecord {
        id: row.get("id"),
        at: row.get("ts"),
        symbol: row.get("symbol"),
        strategy: row.get("strategy"),
        side: row.get("side"),
        quantity: u32::try_from(row.get::<i64, _>("quantity")).unwrap_or(0),
        context: row.get("context_json"),
        status: row.get("status"),
        rejection_reason: row.get("rejection_reason"),
    }
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> OrderRecord {
    OrderRecord {
        id: row.get("id"),
        proposal_id: row.get("proposal_id"),
        symbol: row.get("symbol"),
        status: row.get("status"),
        quantity: u32::try_from(row.get::<i64, _>("quantity")).unwrap_or(0),
        filled_price: row.get("filled_price"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn record_proposal(&self, record: &ProposalRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO proposals (id, ts, symbol, strategy, side, quantity, context_json, status, rejection_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&record.id)
        .bind(record.at)
        .bind(&record.symbol)
        .bind(&record.strategy)
        .bind(&record.side)
        .bind(i64::from(record.quantity))
        .bind(&record.context)
        .bind(&record.status)
        .bind(&record.rejection_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_proposals(&self, limit: usize) -> Result<Vec<ProposalRecord>> {
        let rows = sqlx::query("SELECT * FROM proposals ORDER BY ts DESC LIMIT $1")
            .bind(i64::try_from(limit).unwrap_or(10))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_proposal).collect())
    }

    async fn proposals_since(&self, since: DateTime<Utc>) -> Result<Vec<ProposalRecord>> {
        let rows = sqlx::query("SELECT * FROM proposals WHERE ts >= $1 ORDER BY ts ASC")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_proposal).collect())
    }

    async fn insert_order(&self, order: &OrderRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO orders (id, proposal_id, symbol, status, quantity, filled_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(&order.id)
        .bind(&order.proposal_id)
        .bind(&order.symbol)
        .bind(&order.status)
        .bind(i64::from(order.quantity))
        .bind(order.filled_price)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_orders(&self) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query("SELECT * FROM orders WHERE status = 'pending' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_order).collect())
    }

    async fn update_order_status(&self, id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_positions(&self, rows: &[PositionRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE positions").execute(&mut *tx).await?;
        for row in rows {
            sqlx::query(
                r"
                INSERT INTO positions (symbol, quantity, cost_basis, date_acquired, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(&row.symbol)
            .bind(row.quantity)
            .bind(row.cost_basis)
            .bind(row.date_acquired)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<PositionRow>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY symbol ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| PositionRow {
                symbol: row.get("symbol"),
                quantity: row.get("quantity"),
                cost_basis: row.get("cost_basis"),
                date_acquired: row.get("date_acquired"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn set_system_status(&self, status: &str, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO system_status (id, status, reason, updated_at)
            VALUES ('singleton', $1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, reason = EXCLUDED.reason, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(status)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn system_status(&self) -> Result<Option<(String, Option<String>)>> {
        let row = sqlx::query("SELECT status, reason FROM system_status WHERE id = 'singleton'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get("status"), r.get("reason"))))
    }

    async fn put_metadata(&self, order_id: &str, meta: &PositionMetadata) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO position_metadata (order_id, symbol, bias, strategy, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO UPDATE SET symbol = EXCLUDED.symbol, bias = EXCLUDED.bias, strategy = EXCLUDED.strategy
            ",
        )
        .bind(order_id)
        .bind(&meta.symbol)
        .bind(meta.bias.to_string())
        .bind(meta.strategy.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_metadata(&self, order_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM position_metadata WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn metadata(&self) -> Result<Vec<(String, PositionMetadata)>> {
        let rows = sqlx::query("SELECT * FROM position_metadata ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let bias = Bias::from_str(row.get::<String, _>("bias").as_str()).ok()?;
                let strategy =
                    StrategyKind::from_str(row.get::<String, _>("strategy").as_str()).ok()?;
                Some((
                    row.get("order_id"),
                    PositionMetadata {
                        symbol: row.get("symbol"),
                        bias,
                        strategy,
                    },
                ))
            })
            .collect())
    }

    async fn latest_order_for(
        &self,
        symbol: &str,
        strategy: StrategyKind,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            r"
            SELECT order_id FROM position_metadata
            WHERE symbol = $1 AND strategy = $2
            ORDER BY created_at DESC LIMIT 1
            ",
        )
        .bind(symbol)
        .bind(strategy.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("order_id")))
    }

    async fn set_sod_equity(&self, date: NaiveDate, equity: Decimal) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO equity_snapshots (at, kind, day, equity)
            VALUES ($1, 'sod', $2, $3)
            ON CONFLICT (kind, day) WHERE kind = 'sod' DO NOTHING
            ",
        )
        .bind(Utc::now())
        .bind(date)
        .bind(equity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sod_equity(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        let row =
            sqlx::query("SELECT equity FROM equity_snapshots WHERE kind = 'sod' AND day = $1")
                .bind(date)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.get("equity")))
    }

    async fn record_equity(&self, at: DateTime<Utc>, equity: Decimal) -> Result<()> {
        sqlx::query("INSERT INTO equity_snapshots (at, kind, day, equity) VALUES ($1, 'mark', NULL, $2)")
            .bind(at)
            .bind(equity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_restricted_dates(&self, dates: &[NaiveDate]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE restricted_dates").execute(&mut *tx).await?;
        for date in dates {
            sqlx::query("INSERT INTO restricted_dates (day) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(date)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn restricted_dates(&self) -> Result<Vec<NaiveDate>> {
        let rows = sqlx::query("SELECT day FROM restricted_dates ORDER BY day ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("day")).collect())
    }

    async fn set_heartbeat(&self, at: DateTime<Utc>, state: Option<Value>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO heartbeat_state (id, at, state_json)
            VALUES ('singleton', $1, $2)
            ON CONFLICT (id) DO UPDATE SET at = EXCLUDED.at,
                state_json = COALESCE(EXCLUDED.state_json, heartbeat_state.state_json)
            ",
        )
        .bind(at)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<Option<(DateTime<Utc>, Option<Value>)>> {
        let row = sqlx::query("SELECT at, state_json FROM heartbeat_state WHERE id = 'singleton'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get("at"), r.get("state_json"))))
    }
}
