//! Messages into the gate actor and its reply types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::ledger::{PositionRow, ProposalRecord};

/// Outcome of one proposal evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum EvaluationOutcome {
    #[serde(rename = "APPROVED")]
    Approved {
        order_id: String,
        proposal_id: String,
    },
    #[serde(rename = "REJECTED")]
    Rejected { reason: String },
    #[serde(rename = "APPROVED_BUT_EXECUTION_FAILED")]
    ExecutionFailed { proposal_id: String, error: String },
    /// The body did not parse as a proposal at all.
    #[serde(rename = "BAD_REQUEST")]
    Malformed { error: String },
}

/// Composite status view served to the dashboard and status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub status: String,
    pub lock_reason: Option<String>,
    pub equity: Option<Decimal>,
    pub day_pnl: Option<Decimal>,
    pub positions: Vec<PositionRow>,
    pub recent_proposals: Vec<ProposalRecord>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub brain_state: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidationResult {
    pub order_id: String,
    pub result: String,
}

/// All mutating operations and reads serialize through this mailbox; the
/// actor is the single writer.
pub enum GateCommand {
    Evaluate {
        body: Value,
        signature: Option<String>,
        respond_to: oneshot::Sender<EvaluationOutcome>,
    },
    Heartbeat {
        state: Option<Value>,
        respond_to: oneshot::Sender<()>,
    },
    Status {
        respond_to: oneshot::Sender<StatusView>,
    },
    Lock {
        reason: Option<String>,
        respond_to: oneshot::Sender<()>,
    },
    Unlock {
        respond_to: oneshot::Sender<()>,
    },
    Liquidate {
        respond_to: oneshot::Sender<Vec<LiquidationResult>>,
    },
    UpdateCalendar {
        dates: Vec<NaiveDate>,
        respond_to: oneshot::Sender<usize>,
    },
    EodReport {
        respond_to: oneshot::Sender<()>,
    },
}
