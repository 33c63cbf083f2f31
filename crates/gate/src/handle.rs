//! Cloneable handle onto the gate actor's mailbox.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::commands::{EvaluationOutcome, GateCommand, LiquidationResult, StatusView};

#[derive(Clone)]
pub struct GateHandle {
    tx: mpsc::Sender<GateCommand>,
}

impl GateHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<GateCommand>) -> Self {
        Self { tx }
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn evaluate(
        &self,
        body: Value,
        signature: Option<String>,
    ) -> Result<EvaluationOutcome> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Evaluate {
                body,
                signature,
                respond_to: tx,
            })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn heartbeat(&self, state: Option<Value>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Heartbeat {
                state,
                respond_to: tx,
            })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn status(&self) -> Result<StatusView> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Status { respond_to: tx })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn lock(&self, reason: Option<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Lock {
                reason,
                respond_to: tx,
            })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn unlock(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Unlock { respond_to: tx })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn liquidate(&self) -> Result<Vec<LiquidationResult>> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::Liquidate { respond_to: tx })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn update_calendar(&self, dates: Vec<NaiveDate>) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::UpdateCalendar {
                dates,
                respond_to: tx,
            })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }

    /// # Errors
    /// Returns an error when the actor has stopped.
    pub async fn eod_report(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(GateCommand::EodReport { respond_to: tx })
            .await
            .context("gate actor unavailable")?;
        rx.await.context("gate actor dropped the request")
    }
}
