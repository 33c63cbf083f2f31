//! The single-writer gate actor.
//!
//! Exactly one logical instance owns lock state, the restricted calendar,
//! position metadata, the positions snapshot and heartbeat state. Every
//! request, including reads, goes through the mailbox and executes to
//! completion before the next is taken; there is never a second writer.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use condor_core::config::Constitution;
use condor_core::occ;
use condor_core::session::eastern_date;
use condor_core::signing;
use condor_core::types::{Proposal, ProposalSide};
use condor_broker::{broker_side, order_type, BrokerApi, MultilegLeg, MultilegOrder};
use condor_notify::{Notifier, Severity};

use crate::commands::{EvaluationOutcome, GateCommand, LiquidationResult, StatusView};
use crate::eval;
use crate::ledger::{Ledger, OrderRecord, PositionMetadata, PositionRow, ProposalRecord};
use crate::report;

pub struct GateActor {
    constitution: Constitution,
    secret: String,
    broker: Arc<dyn BrokerApi>,
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    rx: mpsc::Receiver<GateCommand>,
    // Mirrors of durable state, hydrated at startup.
    locked: bool,
    lock_reason: Option<String>,
    restricted: Vec<chrono::NaiveDate>,
    positions_snapshot: Vec<PositionRow>,
    last_equity: Option<Decimal>,
    heartbeat_at: Option<DateTime<Utc>>,
    brain_state: Option<Value>,
}

impl GateActor {
    /// Hydrates actor state from the ledger.
    ///
    /// # Errors
    /// Returns an error when the ledger cannot be read.
    pub async fn load(
        constitution: Constitution,
        secret: String,
        broker: Arc<dyn BrokerApi>,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        rx: mpsc::Receiver<GateCommand>,
    ) -> Result<Self> {
        let (locked, lock_reason) = match ledger.system_status().await? {
            Some((status, reason)) => (status == "LOCKED", reason),
            None => (false, None),
        };
        let restricted = ledger.restricted_dates().await?;
        let positions_snapshot = ledger.positions().await?;
        let (heartbeat_at, brain_state) = match ledger.heartbeat().await? {
            Some((at, state)) => (Some(at), state),
            None => (None, None),
        };
        info!(
            locked,
            restricted = restricted.len(),
            positions = positions_snapshot.len(),
            "gate actor hydrated"
        );
        Ok(Self {
            constitution,
            secret,
            broker,
            ledger,
            notifier,
            rx,
            locked,
            lock_reason,
            restricted,
            positions_snapshot,
            last_equity: None,
            heartbeat_at,
            brain_state,
        })
    }

    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        info!("gate actor running");
        while let Some(command) = self.rx.recv().await {
            match command {
                GateCommand::Evaluate {
                    body,
                    signature,
                    respond_to,
                } => {
                    let outcome = self.evaluate(body, signature, Utc::now()).await;
                    let _ = respond_to.send(outcome);
                }
                GateCommand::Heartbeat { state, respond_to } => {
                    self.heartbeat(state, Utc::now()).await;
                    let _ = respond_to.send(());
                }
                GateCommand::Status { respond_to } => {
                    let _ = respond_to.send(self.status().await);
                }
                GateCommand::Lock { reason, respond_to } => {
                    self.lock(reason.as_deref().unwrap_or("manual lock")).await;
                    let _ = respond_to.send(());
                }
                GateCommand::Unlock { respond_to } => {
                    self.unlock().await;
                    let _ = respond_to.send(());
                }
                GateCommand::Liquidate { respond_to } => {
                    let results = self.liquidate().await;
                    let _ = respond_to.send(results);
                }
                GateCommand::UpdateCalendar { dates, respond_to } => {
                    let count = self.update_calendar(dates).await;
                    let _ = respond_to.send(count);
                }
                GateCommand::EodReport { respond_to } => {
                    self.eod_report().await;
                    let _ = respond_to.send(());
                }
            }
        }
        info!("gate actor stopped");
    }

    /// The full evaluation order; the first failure wins and every
    /// evaluation lands in the proposals ledger before the reply.
    async fn evaluate(
        &mut self,
        body: Value,
        signature: Option<String>,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        // Authentication first; nothing unauthenticated touches state.
        let Some(signature) = signature else {
            return self
                .reject(&body, None, "Missing X-GW-Signature header", now)
                .await;
        };
        let canonical = match signing::canonical_payload(&body) {
            Ok(canonical) => canonical,
            Err(err) => {
                let reason = format!("unsignable body: {err}");
                self.reject(&body, None, &reason, now).await;
                return EvaluationOutcome::Malformed { error: reason };
            }
        };
        if !signing::verify(&self.secret, &canonical, &signature) {
            return self.reject(&body, None, "Invalid signature", now).await;
        }

        let proposal: Proposal = match serde_json::from_value(body.clone()) {
            Ok(proposal) => proposal,
            Err(err) => {
                let reason = format!("malformed proposal: {err}");
                self.reject(&body, None, &reason, now).await;
                return EvaluationOutcome::Malformed { error: reason };
            }
        };

        let today = eastern_date(now);
        let checks = [
            eval::check_not_locked(self.locked, self.lock_reason.as_deref()),
            eval::check_staleness(
                now.timestamp_millis(),
                proposal.timestamp_ms,
                self.constitution.stale_proposal_ms,
            ),
            eval::check_universe(&self.constitution, &proposal),
            eval::check_price(&proposal),
            eval::check_structure(&proposal),
            eval::check_dte(&self.constitution, &proposal, today),
            eval::check_calendar(&self.restricted, &proposal, today),
            eval::check_forced_eod(
                &self.constitution,
                &proposal,
                condor_core::session::to_eastern(now).time(),
            ),
        ];
        for check in checks {
            if let Err(reason) = check {
                return self.reject(&body, Some(&proposal), &reason, now).await;
            }
        }

        // Broker truth before any position-count rule. A transient broker
        // failure falls back to the cached snapshot rather than blocking
        // all trading.
        self.reconcile_account(now).await;

        if let Some(reason) = self.daily_loss_breach(today).await {
            self.lock(&reason).await;
            return self.reject(&body, Some(&proposal), &reason, now).await;
        }

        if proposal.side == ProposalSide::Open {
            let metadata = self.ledger.metadata().await.unwrap_or_default();
            let distinct = self.distinct_open_symbols();
            info!(
                distinct_symbols = distinct,
                max_open = self.constitution.max_open_positions,
                max_total = self.constitution.max_total_positions,
                "position caps"
            );
            if distinct >= self.constitution.max_open_positions {
                let reason = format!(
                    "Position cap: {distinct} symbols already open (max {})",
                    self.constitution.max_open_positions
                );
                return self.reject(&body, Some(&proposal), &reason, now).await;
            }
            let bias = eval::proposal_bias(&proposal);
            let open_checks = [
                eval::check_correlation(&self.constitution, &metadata, &proposal.symbol, bias),
                eval::check_concentration(&self.constitution, &metadata, &proposal.symbol),
                eval::check_context(&proposal),
            ];
            for check in open_checks {
                if let Err(reason) = check {
                    return self.reject(&body, Some(&proposal), &reason, now).await;
                }
            }
        }

        // Approved: ledger first, then execution.
        self.record(&proposal, "APPROVED", None, now).await;
        self.notifier
            .send(
                Severity::Success,
                "Proposal Approved",
                &format!(
                    "{} {} {} x{} @ {}",
                    proposal.side, proposal.symbol, proposal.strategy, proposal.quantity,
                    proposal.price
                ),
            )
            .await;
        self.execute(&proposal, now).await
    }

    async fn execute(&mut self, proposal: &Proposal, now: DateTime<Utc>) -> EvaluationOutcome {
        let order = MultilegOrder {
            symbol: proposal.symbol.clone(),
            order_type: order_type(proposal.side).to_string(),
            price: proposal.price,
            legs: proposal
                .legs
                .iter()
                .map(|leg| MultilegLeg {
                    option_symbol: leg.symbol.clone(),
                    side: broker_side(proposal.side, leg.side),
                    quantity: leg.quantity,
                })
                .collect(),
        };
        match self.broker.place_multileg(&order).await {
            Ok(ack) => {
                if let Err(err) = self
                    .ledger
                    .insert_order(&OrderRecord {
                        id: ack.id.clone(),
                        proposal_id: proposal.id.clone(),
                        symbol: proposal.symbol.clone(),
                        status: "pending".to_string(),
                        quantity: proposal.quantity,
                        filled_price: None,
                        created_at: now,
                        updated_at: now,
                    })
                    .await
                {
                    error!(%err, "order ledger insert failed");
                }
                match proposal.side {
                    ProposalSide::Open => {
                        let meta = PositionMetadata {
                            symbol: proposal.symbol.clone(),
                            bias: eval::proposal_bias(proposal),
                            strategy: proposal.strategy,
                        };
                        if let Err(err) = self.ledger.put_metadata(&ack.id, &meta).await {
                            error!(%err, "metadata insert failed");
                        }
                    }
                    ProposalSide::Close => {
                        match self
                            .ledger
                            .latest_order_for(&proposal.symbol, proposal.strategy)
                            .await
                        {
                            Ok(Some(open_order_id)) => {
                                if let Err(err) =
                                    self.ledger.remove_metadata(&open_order_id).await
                                {
                                    error!(%err, "metadata removal failed");
                                }
                            }
                            Ok(None) => warn!(
                                symbol = %proposal.symbol,
                                strategy = %proposal.strategy,
                                "no matching open order metadata for close"
                            ),
                            Err(err) => error!(%err, "metadata lookup failed"),
                        }
                    }
                }
                info!(order_id = %ack.id, proposal_id = %proposal.id, "order submitted");
                EvaluationOutcome::Approved {
                    order_id: ack.id,
                    proposal_id: proposal.id.clone(),
                }
            }
            Err(err) => {
                error!(%err, proposal_id = %proposal.id, "order execution failed");
                self.notifier
                    .send(
                        Severity::Error,
                        "Execution Failed",
                        &format!("{}: {err}", proposal.symbol),
                    )
                    .await;
                EvaluationOutcome::ExecutionFailed {
                    proposal_id: proposal.id.clone(),
                    error: err.to_string(),
                }
            }
        }
    }

    /// Synchronous account reconciliation: balances and positions become the
    /// new snapshot, and the start-of-day equity latches on first sight.
    async fn reconcile_account(&mut self, now: DateTime<Utc>) {
        match self.broker.balances().await {
            Ok(balances) => {
                self.last_equity = Some(balances.total_equity);
                let today = eastern_date(now);
                match self.ledger.sod_equity(today).await {
                    Ok(None) => {
                        if let Err(err) =
                            self.ledger.set_sod_equity(today, balances.total_equity).await
                        {
                            error!(%err, "failed to persist start-of-day equity");
                        }
                    }
                    Ok(Some(_)) => {}
                    Err(err) => error!(%err, "start-of-day equity lookup failed"),
                }
                if let Err(err) = self.ledger.record_equity(now, balances.total_equity).await {
                    warn!(%err, "equity mark insert failed");
                }
            }
            Err(err) => {
                warn!(%err, "balance fetch failed, continuing with cached equity");
            }
        }
        match self.broker.positions().await {
            Ok(positions) => {
                let rows: Vec<PositionRow> = positions
                    .into_iter()
                    .map(|p| PositionRow {
                        symbol: p.symbol,
                        quantity: p.quantity,
                        cost_basis: p.cost_basis,
                        date_acquired: p.date_acquired,
                        updated_at: now,
                    })
                    .collect();
                if let Err(err) = self.ledger.replace_positions(&rows).await {
                    error!(%err, "positions snapshot write failed");
                }
                self.positions_snapshot = rows;
            }
            Err(err) => {
                warn!(%err, "position fetch failed, continuing with cached snapshot");
            }
        }
    }

    async fn daily_loss_breach(&self, today: chrono::NaiveDate) -> Option<String> {
        let current = self.last_equity?;
        let sod = self.ledger.sod_equity(today).await.ok().flatten()?;
        if sod <= Decimal::ZERO {
            return None;
        }
        let loss = (sod - current) / sod;
        let limit = Decimal::from_f64(self.constitution.max_daily_loss_percent)?;
        if loss >= limit {
            let loss_pct = loss * Decimal::from(100);
            return Some(format!(
                "Daily loss {:.2}% breaches the {:.2}% limit",
                loss_pct,
                limit * Decimal::from(100)
            ));
        }
        None
    }

    fn distinct_open_symbols(&self) -> usize {
        let mut symbols: Vec<&str> = self
            .positions_snapshot
            .iter()
            .map(|row| occ::underlying(&row.symbol))
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols.len()
    }

    async fn reject(
        &mut self,
        body: &Value,
        proposal: Option<&Proposal>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        warn!(reason, "proposal rejected");
        match proposal {
            Some(p) => self.record(p, "REJECTED", Some(reason), now).await,
            None => {
                // Unauthenticated or unparsed: record what the body claims.
                let record = ProposalRecord {
                    id: body["id"].as_str().unwrap_or("unknown").to_string(),
                    at: now,
                    symbol: body["symbol"].as_str().unwrap_or("unknown").to_string(),
                    strategy: body["strategy"].as_str().unwrap_or("unknown").to_string(),
                    side: body["side"].as_str().unwrap_or("unknown").to_string(),
                    quantity: 0,
                    context: body.get("context").cloned().unwrap_or(Value::Null),
                    status: "REJECTED".to_string(),
                    rejection_reason: Some(reason.to_string()),
                };
                if let Err(err) = self.ledger.record_proposal(&record).await {
                    error!(%err, "proposal ledger append failed");
                }
            }
        }
        self.notifier
            .send(Severity::Warning, "Proposal Rejected", reason)
            .await;
        EvaluationOutcome::Rejected {
            reason: reason.to_string(),
        }
    }

    async fn record(
        &mut self,
        proposal: &Proposal,
        status: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let record = ProposalRecord {
            id: proposal.id.clone(),
            at: now,
            symbol: proposal.symbol.clone(),
            strategy: proposal.strategy.to_string(),
            side: proposal.side.to_string(),
            quantity: proposal.quantity,
            context: serde_json::to_value(&proposal.context).unwrap_or(Value::Null),
            status: status.to_string(),
            rejection_reason: reason.map(ToString::to_string),
        };
        if let Err(err) = self.ledger.record_proposal(&record).await {
            // The audit append must precede the response; a failed append is
            // loud but does not turn an approval into a phantom rejection.
            error!(%err, "proposal ledger append failed");
        }
    }

    async fn heartbeat(&mut self, state: Option<Value>, now: DateTime<Utc>) {
        self.heartbeat_at = Some(now);
        if let Some(state) = &state {
            self.brain_state = Some(state.clone());
        }
        if let Err(err) = self.ledger.set_heartbeat(now, state).await {
            warn!(%err, "heartbeat persist failed");
        }
    }

    async fn status(&self) -> StatusView {
        let recent_proposals = self.ledger.recent_proposals(10).await.unwrap_or_default();
        let today = eastern_date(Utc::now());
        let day_pnl = match (self.last_equity, self.ledger.sod_equity(today).await.ok().flatten())
        {
            (Some(current), Some(sod)) => Some(current - sod),
            _ => None,
        };
        StatusView {
            status: if self.locked { "LOCKED" } else { "NORMAL" }.to_string(),
            lock_reason: self.lock_reason.clone(),
            equity: self.last_equity,
            day_pnl,
            positions: self.positions_snapshot.clone(),
            recent_proposals,
            last_heartbeat: self.heartbeat_at,
            brain_state: self.brain_state.clone(),
        }
    }

    async fn lock(&mut self, reason: &str) {
        if self.locked {
            return;
        }
        warn!(reason, "locking system");
        self.locked = true;
        self.lock_reason = Some(reason.to_string());
        if let Err(err) = self.ledger.set_system_status("LOCKED", Some(reason)).await {
            error!(%err, "lock persist failed");
        }
        self.notifier.send(Severity::Error, "System Locked", reason).await;
    }

    async fn unlock(&mut self) {
        info!("unlocking system");
        self.locked = false;
        self.lock_reason = None;
        if let Err(err) = self.ledger.set_system_status("NORMAL", None).await {
            error!(%err, "unlock persist failed");
        }
        self.notifier
            .send(Severity::Success, "System Unlocked", "trading re-enabled")
            .await;
    }

    /// Cancels every pending order, then locks.
    async fn liquidate(&mut self) -> Vec<LiquidationResult> {
        let pending = self.ledger.pending_orders().await.unwrap_or_default();
        let mut results = Vec::with_capacity(pending.len());
        for order in pending {
            let result = match self.broker.cancel_order(&order.id).await {
                Ok(()) => {
                    if let Err(err) = self.ledger.update_order_status(&order.id, "canceled").await
                    {
                        warn!(%err, "order status update failed");
                    }
                    "canceled".to_string()
                }
                Err(err) => format!("cancel failed: {err}"),
            };
            results.push(LiquidationResult {
                order_id: order.id,
                result,
            });
        }
        self.lock("liquidation requested").await;
        results
    }

    async fn update_calendar(&mut self, dates: Vec<chrono::NaiveDate>) -> usize {
        let count = dates.len();
        if let Err(err) = self.ledger.replace_restricted_dates(&dates).await {
            error!(%err, "restricted dates persist failed");
        }
        info!(count, "restricted calendar replaced");
        self.restricted = dates;
        count
    }

    async fn eod_report(&mut self) {
        let today = eastern_date(Utc::now());
        let sod = self.ledger.sod_equity(today).await.ok().flatten();
        match report::build(self.ledger.as_ref(), sod, self.last_equity, Utc::now()).await {
            Ok(summary) => {
                self.notifier
                    .send(Severity::Info, "End of Day Report", &summary)
                    .await;
            }
            Err(err) => warn!(%err, "end-of-day report failed"),
        }
    }
}
