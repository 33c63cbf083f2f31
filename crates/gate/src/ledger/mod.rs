//! The audit ledger: proposals, orders, position snapshots, system status,
//! equity marks, restricted dates, position metadata and heartbeat state.
//!
//! The ledger is the audit log; the broker stays the source of truth for
//! positions. All writes come from the gate actor. Two implementations: the
//! Postgres ledger for production and an in-memory ledger for tests and the
//! `--memory-ledger` dev mode.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use condor_core::types::{Bias, StrategyKind};

mod memory;
mod pg;

pub use memory::MemoryLedger;
pub use pg::PgLedger;

/// One evaluated proposal, approved or rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: String,
    pub at: DateTime<Utc>,
    pub symbol: String,
    pub strategy: String,
    pub side: String,
    pub quantity: u32,
    pub context: Value,
    pub status: String,
    pub rejection_reason: Option<String>,
}

/// One submitted broker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub proposal_id: String,
    pub symbol: String,
    pub status: String,
    pub quantity: u32,
    pub filled_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the broker positions snapshot. Truncated and rewritten on
/// every reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRow {
    pub symbol: String,
    pub quantity: i64,
    pub cost_basis: Decimal,
    pub date_acquired: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Side index for correlation-group accounting, keyed by broker order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMetadata {
    pub symbol: String,
    pub bias: Bias,
    pub strategy: StrategyKind,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record_proposal(&self, record: &ProposalRecord) -> Result<()>;
    async fn recent_proposals(&self, limit: usize) -> Result<Vec<ProposalRecord>>;
    /// Proposals evaluated since the given instant.
    async fn proposals_since(&self, since: DateTime<Utc>) -> Result<Vec<ProposalRecord>>;

    async fn insert_order(&self, order: &OrderRecord) -> Result<()>;
    async fn pending_orders(&self) -> Result<Vec<OrderRecord>>;
    async fn update_order_status(&self, id: &str, status: &str) -> Result<()>;

    async fn replace_positions(&self, rows: &[PositionRow]) -> Result<()>;
    async fn positions(&self) -> Result<Vec<PositionRow>>;

    async fn set_system_status(&self, status: &str, reason: Option<&str>) -> Result<()>;
    async fn system_status(&self) -> Result<Option<(String, Option<String>)>>;

    async fn put_metadata(&self, order_id: &str, meta: &PositionMetadata) -> Result<()>;
    async fn remove_metadata(&self, order_id: &str) -> Result<()>;
    async fn metadata(&self) -> Result<Vec<(String, PositionMetadata)>>;
    /// Most recent order id whose metadata matches symbol and strategy.
    async fn latest_order_for(&self, symbol: &str, strategy: StrategyKind)
        -> Result<Option<String>>;

    async fn set_sod_equity(&self, date: NaiveDate, equity: Decimal) -> Result<()>;
    async fn sod_equity(&self, date: NaiveDate) -> Result<Option<Decimal>>;
    async fn record_equity(&self, at: DateTime<Utc>, equity: Decimal) -> Result<()>;

    async fn replace_restricted_dates(&self, dates: &[NaiveDate]) -> Result<()>;
    async fn restricted_dates(&self) -> Result<Vec<NaiveDate>>;

    async fn set_heartbeat(&self, at: DateTime<Utc>, state: Option<Value>) -> Result<()>;
    async fn heartbeat(&self) -> Result<Option<(DateTime<Utc>, Option<Value>)>>;
}
