//! Position lifecycle management.
//!
//! A 5 second loop marks every tracked position to market, evaluates exits,
//! chases working orders and reconciles against broker truth every ten
//! minutes. The manager exclusively owns the tracked-position book; the
//! signal engine hands approved opens over a channel. Order submission
//! always goes through the gate; the broker is only read (quotes, status,
//! positions) and canceled against.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use condor_core::occ;
use condor_core::types::{
    Bias, ContextValue, PortfolioGreeks, Proposal, ProposalLeg, ProposalSide, StrategyKind,
};
use condor_broker::{BrokerApi, OrderStatus, Quote};
use condor_indicators::IndicatorStore;
use condor_notify::{Notifier, Severity};

use crate::exits::evaluate_exit;
use crate::gate_client::{GateResponse, ProposalSink};
use crate::pnl::{cost_to_close, net_mid, pnl_dollars, pnl_percent};
use crate::positions::{PositionBook, PositionStatus, TrackedPosition, WorkingOrder};

const TICK_SECS: u64 = 5;
const RECONCILE_SECS: i64 = 600;
const MAX_PENDING_SECS: i64 = 120;
const COOLDOWN_SECS: i64 = 5;
/// Mid drift beyond which a working order is cancelled and re-priced.
const CHASE_DRIFT_CENTS: i64 = 10;
/// Added to the mid when re-pricing, to buy queue priority.
const AGGRESSION_CENTS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opening,
    Closing,
}

enum Outcome {
    Keep { position: TrackedPosition, changed: bool },
    Remove,
}

pub struct PositionManager {
    broker: Arc<dyn BrokerApi>,
    sink: Arc<dyn ProposalSink>,
    store: Arc<RwLock<IndicatorStore>>,
    notifier: Arc<dyn Notifier>,
    book: PositionBook,
    mirror_tx: mpsc::UnboundedSender<Vec<u8>>,
    greeks_tx: watch::Sender<PortfolioGreeks>,
    new_positions: mpsc::UnboundedReceiver<TrackedPosition>,
    last_reconcile: Option<DateTime<Utc>>,
}

impl PositionManager {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        sink: Arc<dyn ProposalSink>,
        store: Arc<RwLock<IndicatorStore>>,
        notifier: Arc<dyn Notifier>,
        book: PositionBook,
        mirror_tx: mpsc::UnboundedSender<Vec<u8>>,
        greeks_tx: watch::Sender<PortfolioGreeks>,
        new_positions: mpsc::UnboundedReceiver<TrackedPosition>,
    ) -> Self {
        Self {
            broker,
            sink,
            store,
            notifier,
            book,
            mirror_tx,
            greeks_tx,
            new_positions,
            last_reconcile: None,
        }
    }

    /// Runs until shutdown. The in-flight cycle completes before the task
    /// stops, and the mirror is flushed last.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(TICK_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tracked = self.book.len(), "position manager started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.cycle(Utc::now()).await;
                }
                position = self.new_positions.recv() => match position {
                    Some(position) => {
                        info!(trade_id = %position.trade_id, "tracking new position");
                        self.book.insert(position);
                        self.persist();
                    }
                    // Channel closed: the engine is gone, shutdown follows.
                    None => break,
                },
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.cycle(Utc::now()).await;
        self.persist();
        info!("position manager stopped");
    }

    /// One evaluation pass over every tracked position.
    pub async fn cycle(&mut self, now: DateTime<Utc>) {
        let mut changed = false;
        let mut greeks = PortfolioGreeks::default();

        for trade_id in self.book.trade_ids() {
            let Some(position) = self.book.get(&trade_id).cloned() else {
                continue;
            };
            let outcome = match position.status {
                PositionStatus::Opening => self.drive_order(position, Phase::Opening, now).await,
                PositionStatus::Closing => self.drive_order(position, Phase::Closing, now).await,
                PositionStatus::Open => self.manage_open(position, now, &mut greeks).await,
            };
            match outcome {
                Outcome::Keep {
                    position,
                    changed: dirty,
                } => {
                    if dirty {
                        changed = true;
                    }
                    self.book.insert(position);
                }
                Outcome::Remove => {
                    self.book.remove(&trade_id);
                    changed = true;
                }
            }
        }

        let _ = self.greeks_tx.send(greeks);

        match self.last_reconcile {
            None => self.last_reconcile = Some(now),
            Some(at) if (now - at).num_seconds() >= RECONCILE_SECS => {
                if self.reconcile(now).await {
                    changed = true;
                }
                self.last_reconcile = Some(now);
            }
            Some(_) => {}
        }

        if changed {
            self.persist();
        }
    }

    async fn leg_quotes(&self, position: &TrackedPosition) -> Option<HashMap<String, Quote>> {
        let symbols: Vec<String> = position.legs.iter().map(|l| l.symbol.clone()).collect();
        match self.broker.quotes(&symbols).await {
            Ok(quotes) => Some(quotes.into_iter().map(|q| (q.symbol.clone(), q)).collect()),
            Err(err) => {
                warn!(trade_id = %position.trade_id, %err, "leg quote fetch failed");
                None
            }
        }
    }

    async fn manage_open(
        &mut self,
        mut position: TrackedPosition,
        now: DateTime<Utc>,
        greeks: &mut PortfolioGreeks,
    ) -> Outcome {
        let Some(quotes) = self.leg_quotes(&position).await else {
            return Outcome::Keep {
                position,
                changed: false,
            };
        };
        accumulate_greeks(greeks, &position.legs, &quotes);

        let Some(cost) = cost_to_close(&position.legs, &quotes) else {
            return Outcome::Keep {
                position,
                changed: false,
            };
        };
        let pnl = pnl_dollars(position.strategy, position.entry_price, cost);
        let pct = pnl_percent(pnl, position.entry_price);

        let mut changed = false;
        if pct > position.highest_pnl_seen {
            position.highest_pnl_seen = pct;
            changed = true;
        }

        let view = self.store.read().view(&position.symbol, now);
        let Some(reason) = evaluate_exit(&position, pct, &view, now) else {
            return Outcome::Keep { position, changed };
        };
        info!(
            trade_id = %position.trade_id,
            %reason,
            pnl_pct = pct,
            "exit triggered"
        );

        let Some(mid) = net_mid(&position.legs, &quotes) else {
            return Outcome::Keep { position, changed };
        };
        let limit = chase_limit(mid);
        let mut proposal = close_proposal(&position, limit, Some(reason.to_string()), now);
        match self.sink.submit(&mut proposal).await {
            Ok(GateResponse::Approved { order_id, .. }) => {
                position.status = PositionStatus::Closing;
                position.close_order = Some(WorkingOrder {
                    order_id,
                    limit,
                    mid_at_submit: mid,
                    submitted_at: now,
                });
                self.notifier
                    .send(
                        Severity::Info,
                        "Closing Position",
                        &format!("{} closing ({reason}), pnl {pct:.1}%", position.trade_id),
                    )
                    .await;
                Outcome::Keep {
                    position,
                    changed: true,
                }
            }
            Ok(GateResponse::Rejected { reason: why }) => {
                warn!(trade_id = %position.trade_id, %why, "close proposal rejected");
                Outcome::Keep { position, changed }
            }
            Ok(GateResponse::ExecutionFailed { error }) => {
                warn!(trade_id = %position.trade_id, %error, "close execution failed");
                position.retry_backoff_until = Some(now + Duration::seconds(COOLDOWN_SECS));
                Outcome::Keep {
                    position,
                    changed: true,
                }
            }
            Err(err) => {
                warn!(trade_id = %position.trade_id, %err, "close submission failed");
                Outcome::Keep { position, changed }
            }
        }
    }

    async fn drive_order(
        &mut self,
        mut position: TrackedPosition,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Outcome {
        let working = match phase {
            Phase::Opening => position.open_order.clone(),
            Phase::Closing => position.close_order.clone(),
        };
        match working {
            Some(order) => self.watch_working(position, phase, order, now).await,
            None => self.resubmit(position, phase, now).await,
        }
    }

    async fn watch_working(
        &mut self,
        mut position: TrackedPosition,
        phase: Phase,
        order: WorkingOrder,
        now: DateTime<Utc>,
    ) -> Outcome {
        let status = match self.broker.order_status(&order.order_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(order_id = %order.order_id, %err, "order status fetch failed");
                return Outcome::Keep {
                    position,
                    changed: false,
                };
            }
        };

        if status == OrderStatus::Filled {
            return match phase {
                Phase::Opening => {
                    info!(trade_id = %position.trade_id, "open order filled");
                    position.status = PositionStatus::Open;
                    position.open_order = None;
                    position.retry_backoff_until = None;
                    self.notifier
                        .send(
                            Severity::Success,
                            "Position Open",
                            &format!("{} filled at limit {}", position.trade_id, order.limit),
                        )
                        .await;
                    Outcome::Keep {
                        position,
                        changed: true,
                    }
                }
                Phase::Closing => {
                    info!(trade_id = %position.trade_id, "close order filled");
                    self.notifier
                        .send(
                            Severity::Success,
                            "Position Closed",
                            &format!("{} closed at limit {}", position.trade_id, order.limit),
                        )
                        .await;
                    Outcome::Remove
                }
            };
        }

        if status.is_terminal() {
            // Cancelled or rejected out from under us; cool down and let the
            // resubmission path take over next cycle.
            debug!(order_id = %order.order_id, ?status, "working order died");
            clear_working(&mut position, phase);
            position.retry_backoff_until = Some(now + Duration::seconds(COOLDOWN_SECS));
            return Outcome::Keep {
                position,
                changed: true,
            };
        }

        // Still working: chase on drift or stall.
        let Some(quotes) = self.leg_quotes(&position).await else {
            return Outcome::Keep {
                position,
                changed: false,
            };
        };
        let Some(mid) = net_mid(&position.legs, &quotes) else {
            return Outcome::Keep {
                position,
                changed: false,
            };
        };
        let pending_secs = (now - order.submitted_at).num_seconds();
        let drift = (mid - order.limit).abs();
        let stalled = pending_secs > MAX_PENDING_SECS;
        if stalled || drift > Decimal::new(CHASE_DRIFT_CENTS, 2) {
            info!(
                order_id = %order.order_id,
                %drift,
                pending_secs,
                stalled,
                "chasing: cancelling working order"
            );
            if let Err(err) = self.broker.cancel_order(&order.order_id).await {
                warn!(order_id = %order.order_id, %err, "cancel failed");
                return Outcome::Keep {
                    position,
                    changed: false,
                };
            }
            clear_working(&mut position, phase);
            position.retry_backoff_until = Some(now + Duration::seconds(COOLDOWN_SECS));
            return Outcome::Keep {
                position,
                changed: true,
            };
        }
        Outcome::Keep {
            position,
            changed: false,
        }
    }

    async fn resubmit(
        &mut self,
        mut position: TrackedPosition,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Outcome {
        if position
            .retry_backoff_until
            .is_some_and(|until| now < until)
        {
            return Outcome::Keep {
                position,
                changed: false,
            };
        }
        let Some(quotes) = self.leg_quotes(&position).await else {
            return Outcome::Keep {
                position,
                changed: false,
            };
        };
        let Some(mid) = net_mid(&position.legs, &quotes) else {
            return Outcome::Keep {
                position,
                changed: false,
            };
        };
        let limit = chase_limit(mid);

        let mut proposal = match phase {
            Phase::Opening => self.open_proposal(&position, limit, now),
            Phase::Closing => close_proposal(&position, limit, None, now),
        };
        match self.sink.submit(&mut proposal).await {
            Ok(GateResponse::Approved { order_id, .. }) => {
                let order = WorkingOrder {
                    order_id,
                    limit,
                    mid_at_submit: mid,
                    submitted_at: now,
                };
                match phase {
                    Phase::Opening => position.open_order = Some(order),
                    Phase::Closing => position.close_order = Some(order),
                }
                position.retry_backoff_until = None;
                Outcome::Keep {
                    position,
                    changed: true,
                }
            }
            Ok(GateResponse::Rejected { reason }) => match phase {
                Phase::Opening => {
                    warn!(trade_id = %position.trade_id, %reason, "reopen rejected, dropping");
                    self.notifier
                        .send(
                            Severity::Warning,
                            "Open Abandoned",
                            &format!("{}: {reason}", position.trade_id),
                        )
                        .await;
                    Outcome::Remove
                }
                Phase::Closing => {
                    warn!(trade_id = %position.trade_id, %reason, "close rejected, back to open");
                    position.status = PositionStatus::Open;
                    position.close_order = None;
                    Outcome::Keep {
                        position,
                        changed: true,
                    }
                }
            },
            Ok(GateResponse::ExecutionFailed { error }) => {
                warn!(trade_id = %position.trade_id, %error, "resubmit execution failed");
                position.retry_backoff_until = Some(now + Duration::seconds(COOLDOWN_SECS));
                Outcome::Keep {
                    position,
                    changed: true,
                }
            }
            Err(err) => {
                warn!(trade_id = %position.trade_id, %err, "resubmit failed");
                position.retry_backoff_until = Some(now + Duration::seconds(COOLDOWN_SECS));
                Outcome::Keep {
                    position,
                    changed: true,
                }
            }
        }
    }

    fn open_proposal(
        &self,
        position: &TrackedPosition,
        limit: Decimal,
        now: DateTime<Utc>,
    ) -> Proposal {
        // Reopen attempts must carry a live context or the gate will refuse
        // them.
        let (vix, view) = {
            let guard = self.store.read();
            (guard.vix(now), guard.view(&position.symbol, now))
        };
        let mut context = std::collections::BTreeMap::new();
        if let Some(vix) = vix {
            context.insert("vix".to_string(), ContextValue::Number(vix));
        }
        context.insert(
            "flow_state".to_string(),
            ContextValue::Text(view.flow_state.to_string().to_lowercase()),
        );
        context.insert(
            "trend_state".to_string(),
            ContextValue::Text(position.bias.to_string()),
        );
        context.insert(
            "resubmit_of".to_string(),
            ContextValue::Text(position.trade_id.clone()),
        );
        Proposal {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: now.timestamp_millis(),
            symbol: position.symbol.clone(),
            strategy: position.strategy,
            side: ProposalSide::Open,
            quantity: position.quantity,
            price: limit,
            legs: position.legs.clone(),
            context,
            signature: None,
        }
    }

    /// Aligns the book with broker truth. Returns whether anything changed.
    pub async fn reconcile(&mut self, now: DateTime<Utc>) -> bool {
        let broker_positions = match self.broker.positions().await {
            Ok(positions) => positions,
            Err(err) => {
                warn!(%err, "reconciliation fetch failed, keeping tracked state");
                return false;
            }
        };
        let held: HashMap<String, &condor_broker::BrokerPosition> = broker_positions
            .iter()
            .filter(|p| occ::underlying(&p.symbol) != p.symbol)
            .map(|p| (p.symbol.clone(), p))
            .collect();
        let tracked_symbols: HashSet<String> = self
            .book
            .iter()
            .flat_map(|p| p.legs.iter().map(|l| l.symbol.clone()))
            .collect();

        let mut changed = false;
        for trade_id in self.book.trade_ids() {
            let Some(mut position) = self.book.get(&trade_id).cloned() else {
                continue;
            };
            let total = position.legs.len();
            let present = position
                .legs
                .iter()
                .filter(|leg| {
                    held.get(&leg.symbol).is_some_and(|bp| match leg.side {
                        condor_core::types::LegSide::Sell => bp.quantity < 0,
                        condor_core::types::LegSide::Buy => bp.quantity > 0,
                    })
                })
                .count();

            if position.status == PositionStatus::Opening && total > 0 && present == total {
                info!(trade_id = %trade_id, "reconciliation: legs filled, promoting to open");
                position.status = PositionStatus::Open;
                position.open_order = None;
                self.book.insert(position);
                changed = true;
                continue;
            }
            if position.status != PositionStatus::Opening && present == 0 {
                warn!(trade_id = %trade_id, "reconciliation: ghost position removed");
                self.notifier
                    .send(
                        Severity::Warning,
                        "Ghost Position",
                        &format!("{trade_id} no longer held at broker, untracking"),
                    )
                    .await;
                self.book.remove(&trade_id);
                changed = true;
                continue;
            }
            // The broker's quantities win.
            let mut adjusted = false;
            for leg in &mut position.legs {
                if let Some(bp) = held.get(&leg.symbol) {
                    let broker_qty = u32::try_from(bp.quantity.unsigned_abs()).unwrap_or(0);
                    if broker_qty > 0 && broker_qty != leg.quantity {
                        debug!(
                            trade_id = %trade_id,
                            leg = %leg.symbol,
                            from = leg.quantity,
                            to = broker_qty,
                            "reconciliation: quantity adjusted"
                        );
                        leg.quantity = broker_qty;
                        adjusted = true;
                    }
                }
            }
            if adjusted {
                self.book.insert(position);
                changed = true;
            }
        }

        // Anything the broker holds that no tracked leg claims was opened
        // outside the brain; adopt it under the neutral recovery rules.
        for (symbol, bp) in &held {
            if tracked_symbols.contains(symbol) {
                continue;
            }
            match occ::decode(symbol) {
                Ok(parts) => {
                    let quantity = u32::try_from(bp.quantity.unsigned_abs()).unwrap_or(0).max(1);
                    let side = if bp.quantity < 0 {
                        condor_core::types::LegSide::Sell
                    } else {
                        condor_core::types::LegSide::Buy
                    };
                    let position = TrackedPosition {
                        trade_id: TrackedPosition::make_trade_id(
                            &parts.root,
                            StrategyKind::ManualRecovery,
                        ),
                        symbol: parts.root.clone(),
                        strategy: StrategyKind::ManualRecovery,
                        origin: "MANUAL_RECOVERY".to_string(),
                        bias: Bias::Neutral,
                        legs: vec![ProposalLeg {
                            symbol: symbol.clone(),
                            expiration: parts.expiration,
                            strike: parts.strike,
                            option_type: parts.option_type,
                            quantity,
                            side,
                        }],
                        entry_price: bp.cost_basis.abs(),
                        quantity,
                        highest_pnl_seen: 0.0,
                        status: PositionStatus::Open,
                        open_order: None,
                        close_order: None,
                        retry_backoff_until: None,
                        opened_at: now,
                    };
                    info!(symbol = %symbol, "reconciliation: adopted unknown position");
                    self.book.insert(position);
                    changed = true;
                }
                Err(err) => warn!(symbol = %symbol, %err, "unparseable broker option symbol"),
            }
        }

        changed
    }

    fn persist(&mut self) {
        match self.book.snapshot_bytes() {
            Ok(bytes) => {
                let _ = self.mirror_tx.send(bytes);
            }
            Err(err) => warn!(%err, "position book serialization failed"),
        }
    }

    #[must_use]
    pub fn book(&self) -> &PositionBook {
        &self.book
    }
}

fn clear_working(position: &mut TrackedPosition, phase: Phase) {
    match phase {
        Phase::Opening => position.open_order = None,
        Phase::Closing => position.close_order = None,
    }
}

/// Re-price at the current mid plus the aggressiveness buffer.
fn chase_limit(mid: Decimal) -> Decimal {
    (mid + Decimal::new(AGGRESSION_CENTS, 2)).round_dp(2)
}

fn close_proposal(
    position: &TrackedPosition,
    limit: Decimal,
    exit_reason: Option<String>,
    now: DateTime<Utc>,
) -> Proposal {
    let mut context = std::collections::BTreeMap::new();
    if let Some(reason) = exit_reason {
        context.insert("exit_reason".to_string(), ContextValue::Text(reason));
    }
    Proposal {
        id: Uuid::new_v4().to_string(),
        timestamp_ms: now.timestamp_millis(),
        symbol: position.symbol.clone(),
        strategy: position.strategy,
        side: ProposalSide::Close,
        quantity: position.quantity,
        price: limit,
        legs: position.legs.clone(),
        context,
        signature: None,
    }
}

fn accumulate_greeks(
    greeks: &mut PortfolioGreeks,
    legs: &[ProposalLeg],
    quotes: &HashMap<String, Quote>,
) {
    for leg in legs {
        let Some(g) = quotes.get(&leg.symbol).and_then(|q| q.greeks) else {
            continue;
        };
        let sign = match leg.side {
            condor_core::types::LegSide::Sell => -1.0,
            condor_core::types::LegSide::Buy => 1.0,
        };
        let contracts = f64::from(leg.quantity) * 100.0 * sign;
        greeks.delta += g.delta * contracts;
        greeks.theta += g.theta * contracts;
        greeks.vega += g.vega * contracts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use condor_broker::{Balances, BrokerPosition, Greeks, MultilegOrder, OptionContract, OrderAck};
    use condor_core::types::{LegSide, OptionType};
    use condor_indicators::StoreConfig;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    // 17:00 UTC is 12:00 ET, inside the session, before the 15:55 close-all.
    const MIDDAY: &str = "2026-01-16 17:00:00";

    #[derive(Default)]
    struct MockBroker {
        quotes: Mutex<HashMap<String, Quote>>,
        statuses: Mutex<HashMap<String, OrderStatus>>,
        positions: Mutex<Vec<BrokerPosition>>,
        canceled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrokerApi for MockBroker {
        async fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
            let quotes = self.quotes.lock();
            Ok(symbols.iter().filter_map(|s| quotes.get(s).cloned()).collect())
        }
        async fn option_expirations(&self, _symbol: &str) -> Result<Vec<chrono::NaiveDate>> {
            Ok(vec![])
        }
        async fn option_chain(
            &self,
            _symbol: &str,
            _expiration: chrono::NaiveDate,
        ) -> Result<Vec<OptionContract>> {
            Ok(vec![])
        }
        async fn time_sales(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<condor_core::types::Candle>> {
            Ok(vec![])
        }
        async fn balances(&self) -> Result<Balances> {
            Ok(Balances {
                total_equity: dec!(100000),
            })
        }
        async fn positions(&self) -> Result<Vec<BrokerPosition>> {
            Ok(self.positions.lock().clone())
        }
        async fn place_multileg(&self, _order: &MultilegOrder) -> Result<OrderAck> {
            Err(anyhow!("brain never places orders directly"))
        }
        async fn cancel_order(&self, order_id: &str) -> Result<()> {
            self.canceled.lock().push(order_id.to_string());
            self.statuses
                .lock()
                .insert(order_id.to_string(), OrderStatus::Canceled);
            Ok(())
        }
        async fn order_status(&self, order_id: &str) -> Result<OrderStatus> {
            Ok(self
                .statuses
                .lock()
                .get(order_id)
                .copied()
                .unwrap_or(OrderStatus::Pending))
        }
    }

    #[derive(Default)]
    struct MockSink {
        responses: Mutex<VecDeque<GateResponse>>,
        submissions: Mutex<Vec<Proposal>>,
    }

    #[async_trait]
    impl ProposalSink for MockSink {
        async fn submit(&self, proposal: &mut Proposal) -> Result<GateResponse> {
            self.submissions.lock().push(proposal.clone());
            Ok(self
                .responses
                .lock()
                .pop_front()
                .unwrap_or(GateResponse::Rejected {
                    reason: "no scripted response".to_string(),
                }))
        }
    }

    fn leg(symbol: &str, side: LegSide, quantity: u32) -> ProposalLeg {
        ProposalLeg {
            symbol: symbol.to_string(),
            expiration: chrono::NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
            strike: dec!(428),
            option_type: OptionType::Put,
            quantity,
            side,
        }
    }

    fn quote(symbol: &str, bid: Decimal, ask: Decimal) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid,
            ask,
            last: None,
            greeks: Some(Greeks {
                delta: -0.3,
                gamma: 0.0,
                theta: 0.05,
                vega: 0.1,
                mid_iv: 0.2,
            }),
        }
    }

    fn open_position(trade_id: &str) -> TrackedPosition {
        TrackedPosition {
            trade_id: trade_id.to_string(),
            symbol: "SPY".to_string(),
            strategy: StrategyKind::CreditSpread,
            origin: "TREND_ENGINE".to_string(),
            bias: Bias::Bullish,
            legs: vec![leg("SHORT", LegSide::Sell, 10), leg("LONG", LegSide::Buy, 10)],
            entry_price: dec!(280),
            quantity: 10,
            highest_pnl_seen: 0.0,
            status: PositionStatus::Open,
            open_order: None,
            close_order: None,
            retry_backoff_until: None,
            opened_at: utc(MIDDAY),
        }
    }

    struct Fixture {
        broker: Arc<MockBroker>,
        sink: Arc<MockSink>,
        manager: PositionManager,
        _dir: TempDir,
        _new_tx: mpsc::UnboundedSender<TrackedPosition>,
    }

    fn fixture(positions: Vec<TrackedPosition>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let broker = Arc::new(MockBroker::default());
        let sink = Arc::new(MockSink::default());
        let mut store = IndicatorStore::new(StoreConfig::default());
        store.mark_warm();
        let store = Arc::new(RwLock::new(store));
        let mut book = PositionBook::load(&dir.path().join("positions.json"));
        for p in positions {
            book.insert(p);
        }
        let (mirror_tx, mut mirror_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move { while mirror_rx.recv().await.is_some() {} });
        let (greeks_tx, _greeks_rx) = watch::channel(PortfolioGreeks::default());
        let (new_tx, new_rx) = mpsc::unbounded_channel();
        let manager = PositionManager::new(
            broker.clone(),
            sink.clone(),
            store,
            Arc::new(condor_notify::NullNotifier),
            book,
            mirror_tx,
            greeks_tx,
            new_rx,
        );
        Fixture {
            broker,
            sink,
            manager,
            _dir: dir,
            _new_tx: new_tx,
        }
    }

    #[tokio::test]
    async fn profit_target_submits_close() {
        let mut f = fixture(vec![open_position("SPY-CS-1")]);
        // Spread worth 0.04 to close on a 0.28 entry: pnl ~85.7%.
        f.broker.quotes.lock().extend([
            ("SHORT".to_string(), quote("SHORT", dec!(0.05), dec!(0.07))),
            ("LONG".to_string(), quote("LONG", dec!(0.01), dec!(0.03))),
        ]);
        f.sink.responses.lock().push_back(GateResponse::Approved {
            order_id: "C1".to_string(),
            proposal_id: "p".to_string(),
        });

        f.manager.cycle(utc(MIDDAY)).await;

        let pos = f.manager.book().get("SPY-CS-1").unwrap();
        assert_eq!(pos.status, PositionStatus::Closing);
        let close = pos.close_order.as_ref().unwrap();
        assert_eq!(close.order_id, "C1");
        let submitted = f.sink.submissions.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, ProposalSide::Close);
        // Mid 0.40 plus the 0.05 buffer.
        assert_eq!(submitted[0].price, dec!(0.45));
    }

    #[tokio::test]
    async fn chaser_cancels_on_drift() {
        let mut pos = open_position("SPY-CS-1");
        pos.status = PositionStatus::Opening;
        pos.open_order = Some(WorkingOrder {
            order_id: "O1".to_string(),
            limit: dec!(0.55),
            mid_at_submit: dec!(0.55),
            submitted_at: utc(MIDDAY),
        });
        let mut f = fixture(vec![pos]);
        // Net mid now 0.70: short 0.90 mid minus long 0.20 mid, qty 1 scale.
        f.broker.quotes.lock().extend([
            ("SHORT".to_string(), quote("SHORT", dec!(0.089), dec!(0.091))),
            ("LONG".to_string(), quote("LONG", dec!(0.019), dec!(0.021))),
        ]);
        // Quantities are 10, so per-order net mid = (0.09 - 0.02) * 10 = 0.70.

        f.manager.cycle(utc(MIDDAY) + Duration::seconds(10)).await;

        assert_eq!(f.broker.canceled.lock().as_slice(), ["O1"]);
        let pos = f.manager.book().get("SPY-CS-1").unwrap();
        assert!(pos.open_order.is_none());
        assert!(pos.retry_backoff_until.is_some());
    }

    #[tokio::test]
    async fn chaser_forces_cancel_after_two_minutes() {
        let mut pos = open_position("SPY-CS-1");
        pos.status = PositionStatus::Opening;
        pos.open_order = Some(WorkingOrder {
            order_id: "O1".to_string(),
            limit: dec!(0.55),
            mid_at_submit: dec!(0.55),
            submitted_at: utc(MIDDAY),
        });
        let mut f = fixture(vec![pos]);
        // Mid pinned at the limit: no drift.
        f.broker.quotes.lock().extend([
            ("SHORT".to_string(), quote("SHORT", dec!(0.075), dec!(0.075))),
            ("LONG".to_string(), quote("LONG", dec!(0.020), dec!(0.020))),
        ]);

        // 119 seconds in: leave it alone.
        f.manager.cycle(utc(MIDDAY) + Duration::seconds(119)).await;
        assert!(f.broker.canceled.lock().is_empty());

        // 121 seconds in: force the cancel regardless of drift.
        f.manager.cycle(utc(MIDDAY) + Duration::seconds(121)).await;
        assert_eq!(f.broker.canceled.lock().as_slice(), ["O1"]);
    }

    #[tokio::test]
    async fn resubmit_prices_mid_plus_buffer_after_cooldown() {
        let mut pos = open_position("SPY-CS-1");
        pos.status = PositionStatus::Opening;
        pos.open_order = None;
        pos.retry_backoff_until = Some(utc(MIDDAY) + Duration::seconds(5));
        let mut f = fixture(vec![pos]);
        f.broker.quotes.lock().extend([
            ("SHORT".to_string(), quote("SHORT", dec!(0.089), dec!(0.091))),
            ("LONG".to_string(), quote("LONG", dec!(0.019), dec!(0.021))),
        ]);
        f.sink.responses.lock().push_back(GateResponse::Approved {
            order_id: "O2".to_string(),
            proposal_id: "p".to_string(),
        });

        // Inside the cooldown nothing happens.
        f.manager.cycle(utc(MIDDAY) + Duration::seconds(3)).await;
        assert!(f.sink.submissions.lock().is_empty());

        // After the cooldown it re-prices at mid + 0.05.
        f.manager.cycle(utc(MIDDAY) + Duration::seconds(6)).await;
        let submitted = f.sink.submissions.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].price, dec!(0.75));
        drop(submitted);
        let pos = f.manager.book().get("SPY-CS-1").unwrap();
        assert_eq!(pos.open_order.as_ref().unwrap().order_id, "O2");
    }

    #[tokio::test]
    async fn rejected_close_returns_position_to_open() {
        let mut pos = open_position("SPY-CS-1");
        pos.status = PositionStatus::Closing;
        pos.close_order = None;
        let mut f = fixture(vec![pos]);
        f.broker.quotes.lock().extend([
            ("SHORT".to_string(), quote("SHORT", dec!(0.05), dec!(0.07))),
            ("LONG".to_string(), quote("LONG", dec!(0.01), dec!(0.03))),
        ]);
        // Default mock response is a rejection.

        f.manager.cycle(utc(MIDDAY)).await;

        let pos = f.manager.book().get("SPY-CS-1").unwrap();
        assert_eq!(pos.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn reconciliation_promotes_removes_and_adopts() {
        let occ_short = "SPY260220P00428000";
        let occ_long = "SPY260220P00426000";
        let stranger = "QQQ260220C00400000";

        let mut opening = open_position("SPY-CS-OPENING");
        opening.status = PositionStatus::Opening;
        opening.legs = vec![leg(occ_short, LegSide::Sell, 10), leg(occ_long, LegSide::Buy, 10)];
        let mut ghost = open_position("SPY-CS-GHOST");
        ghost.legs = vec![leg("GONE1", LegSide::Sell, 10), leg("GONE2", LegSide::Buy, 10)];

        let mut f = fixture(vec![opening, ghost]);
        *f.broker.positions.lock() = vec![
            BrokerPosition {
                symbol: occ_short.to_string(),
                quantity: -10,
                cost_basis: dec!(-1100),
                date_acquired: utc(MIDDAY),
            },
            BrokerPosition {
                symbol: occ_long.to_string(),
                quantity: 10,
                cost_basis: dec!(820),
                date_acquired: utc(MIDDAY),
            },
            BrokerPosition {
                symbol: stranger.to_string(),
                quantity: -2,
                cost_basis: dec!(-300),
                date_acquired: utc(MIDDAY),
            },
        ];

        f.manager.reconcile(utc(MIDDAY)).await;

        // Filled legs promote the OPENING position.
        let promoted = f.manager.book().get("SPY-CS-OPENING").unwrap();
        assert_eq!(promoted.status, PositionStatus::Open);
        // The ghost is gone.
        assert!(f.manager.book().get("SPY-CS-GHOST").is_none());
        // The stranger was adopted under manual recovery.
        let adopted: Vec<&TrackedPosition> = f
            .manager
            .book()
            .iter()
            .filter(|p| p.strategy == StrategyKind::ManualRecovery)
            .collect();
        assert_eq!(adopted.len(), 1);
        assert_eq!(adopted[0].symbol, "QQQ");
        assert_eq!(adopted[0].bias, Bias::Neutral);
        assert_eq!(adopted[0].entry_price, dec!(300));
        assert_eq!(adopted[0].legs[0].side, LegSide::Sell);
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let occ_short = "SPY260220P00428000";
        let occ_long = "SPY260220P00426000";
        let stranger = "QQQ260220C00400000";
        let mut opening = open_position("SPY-CS-1");
        opening.status = PositionStatus::Opening;
        opening.legs = vec![leg(occ_short, LegSide::Sell, 10), leg(occ_long, LegSide::Buy, 10)];
        let mut f = fixture(vec![opening]);
        *f.broker.positions.lock() = vec![
            BrokerPosition {
                symbol: occ_short.to_string(),
                quantity: -10,
                cost_basis: dec!(-1100),
                date_acquired: utc(MIDDAY),
            },
            BrokerPosition {
                symbol: occ_long.to_string(),
                quantity: 10,
                cost_basis: dec!(820),
                date_acquired: utc(MIDDAY),
            },
            BrokerPosition {
                symbol: stranger.to_string(),
                quantity: -2,
                cost_basis: dec!(-300),
                date_acquired: utc(MIDDAY),
            },
        ];

        // First pass promotes and adopts; unchanged broker state makes the
        // second pass a no-op with an identical book.
        assert!(f.manager.reconcile(utc(MIDDAY)).await);
        let before = f.manager.book().snapshot_bytes().unwrap();
        assert!(!f.manager.reconcile(utc(MIDDAY) + Duration::seconds(1)).await);
        assert_eq!(f.manager.book().snapshot_bytes().unwrap(), before);
    }

    #[tokio::test]
    async fn broker_quantities_override_tracked() {
        let occ_short = "SPY260220P00428000";
        let occ_long = "SPY260220P00426000";
        let mut pos = open_position("SPY-CS-1");
        pos.legs = vec![leg(occ_short, LegSide::Sell, 10), leg(occ_long, LegSide::Buy, 10)];
        let mut f = fixture(vec![pos]);
        *f.broker.positions.lock() = vec![
            BrokerPosition {
                symbol: occ_short.to_string(),
                quantity: -7,
                cost_basis: dec!(-770),
                date_acquired: utc(MIDDAY),
            },
            BrokerPosition {
                symbol: occ_long.to_string(),
                quantity: 7,
                cost_basis: dec!(574),
                date_acquired: utc(MIDDAY),
            },
        ];

        f.manager.reconcile(utc(MIDDAY)).await;

        let pos = f.manager.book().get("SPY-CS-1").unwrap();
        assert!(pos.legs.iter().all(|l| l.quantity == 7));
    }
}
