//! Signal engine: runs the strategy gates behind the common preconditions
//! and turns surviving intents into signed proposals.
//!
//! Preconditions applied to every evaluation: warm-up complete, regime
//! known, at most one proposal per symbol per minute, and no identical
//! signal replayed within five minutes.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use condor_core::config::SizingParams;
use condor_core::session::eastern_date;
use condor_core::types::{
    ContextValue, FlowState, Proposal, ProposalSide, Regime, SymbolView,
};
use condor_broker::BrokerApi;
use condor_indicators::regime::classify;
use condor_indicators::IndicatorStore;
use condor_notify::{Notifier, Severity};

use crate::gate_client::{GateResponse, ProposalSink};
use crate::journal::{TradeJournal, TradeRecord};
use crate::legs::LegBuilder;
use crate::positions::{PositionStatus, TrackedPosition, WorkingOrder};
use crate::strategies::{GateInputs, SignalIntent, StrategyGate};

const PROPOSAL_THROTTLE_SECS: i64 = 60;
const SIGNAL_REPLAY_SECS: i64 = 300;

/// Gate evaluation with throttles. Pure aside from the clocks it is handed.
pub struct SignalEngine {
    gates: Vec<Box<dyn StrategyGate>>,
    last_proposal: HashMap<String, DateTime<Utc>>,
    last_signal: HashMap<(String, &'static str), DateTime<Utc>>,
}

impl SignalEngine {
    #[must_use]
    pub fn new(gates: Vec<Box<dyn StrategyGate>>) -> Self {
        Self {
            gates,
            last_proposal: HashMap::new(),
            last_signal: HashMap::new(),
        }
    }

    /// First intent that clears every gate and guard, if any.
    #[must_use]
    pub fn evaluate(
        &self,
        view: &SymbolView,
        regime: Regime,
        vix: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<SignalIntent> {
        if !view.is_warm || regime == Regime::InsufficientData {
            return None;
        }
        if let Some(last) = self.last_proposal.get(&view.symbol) {
            if now - *last < Duration::seconds(PROPOSAL_THROTTLE_SECS) {
                return None;
            }
        }
        let inputs = GateInputs {
            view,
            regime,
            vix,
            now,
        };
        for gate in &self.gates {
            if let Some(intent) = gate.evaluate(&inputs) {
                let key = (intent.symbol.clone(), intent.signal);
                if let Some(last) = self.last_signal.get(&key) {
                    if now - *last < Duration::seconds(SIGNAL_REPLAY_SECS) {
                        continue;
                    }
                }
                return Some(intent);
            }
        }
        None
    }

    /// Records a submission for the throttle and replay guards. Called on
    /// every attempt, approved or not.
    pub fn record_submission(&mut self, symbol: &str, signal: &'static str, now: DateTime<Utc>) {
        self.last_proposal.insert(symbol.to_string(), now);
        self.last_signal.insert((symbol.to_string(), signal), now);
    }
}

/// The full trade-event pipeline: gates, sizing, legs, signing, submission,
/// and hand-off of approved opens to the position manager.
pub struct ProposalPipeline {
    pub engine: SignalEngine,
    pub broker: Arc<dyn BrokerApi>,
    pub sink: Arc<dyn ProposalSink>,
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<parking_lot::Mutex<TradeJournal>>,
    pub sizing: SizingParams,
    pub spread_width: f64,
    pub restricted_dates: Vec<NaiveDate>,
    pub new_positions: mpsc::UnboundedSender<TrackedPosition>,
    last_regime: Option<Regime>,
}

impl ProposalPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        engine: SignalEngine,
        broker: Arc<dyn BrokerApi>,
        sink: Arc<dyn ProposalSink>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<parking_lot::Mutex<TradeJournal>>,
        sizing: SizingParams,
        spread_width: f64,
        restricted_dates: Vec<NaiveDate>,
        new_positions: mpsc::UnboundedSender<TrackedPosition>,
    ) -> Self {
        Self {
            engine,
            broker,
            sink,
            notifier,
            journal,
            sizing,
            spread_width,
            restricted_dates,
            new_positions,
            last_regime: None,
        }
    }

    /// Current regime for the universe; SPY is the market proxy.
    #[must_use]
    pub fn regime(&self, store: &RwLock<IndicatorStore>, now: DateTime<Utc>) -> Regime {
        let guard = store.read();
        let vix = guard.vix(now);
        let adx_spy = guard.adx("SPY");
        drop(guard);
        classify(vix, adx_spy, self.restricted_dates.contains(&eastern_date(now)))
    }

    /// Runs the gates for one trade event and submits at most one proposal.
    /// Indicator reads happen under a short lock; all I/O happens after it
    /// is released.
    pub async fn on_trade_event(
        &mut self,
        store: &RwLock<IndicatorStore>,
        symbol: &str,
        now: DateTime<Utc>,
    ) {
        let (view, vix) = {
            let guard = store.read();
            (guard.view(symbol, now), guard.vix(now))
        };
        let regime = self.regime(store, now);
        self.track_regime(regime, now);

        let Some(intent) = self.engine.evaluate(&view, regime, vix, now) else {
            return;
        };
        info!(
            symbol,
            signal = intent.signal,
            bias = %intent.bias,
            %regime,
            "signal detected"
        );

        // Throttle from the attempt, so a failed build cannot spin.
        self.engine.record_submission(symbol, intent.signal, now);

        if let Err(err) = self.submit_intent(&intent, &view, vix, now).await {
            warn!(symbol, %err, "proposal abandoned");
            self.journal.lock().record_error(format!("{symbol}: {err}"));
        }
    }

    async fn submit_intent(
        &mut self,
        intent: &SignalIntent,
        view: &SymbolView,
        vix: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let equity = self.broker.balances().await?.total_equity;
        let builder = LegBuilder::new(self.broker.as_ref(), self.spread_width);
        let today = eastern_date(now);
        let Some(built) = builder
            .build(intent, view, equity, &self.sizing, today)
            .await?
        else {
            return Ok(());
        };

        let strategy = intent.structure.strategy_kind();
        let mut proposal = Proposal {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: now.timestamp_millis(),
            symbol: intent.symbol.clone(),
            strategy,
            side: ProposalSide::Open,
            quantity: built.quantity,
            price: built.limit_price,
            legs: built.legs.clone(),
            context: build_context(view, vix, intent.bias),
            signature: None,
        };

        let started = Utc::now();
        let response = self.sink.submit(&mut proposal).await?;
        let latency_ms = (Utc::now() - started).num_milliseconds();

        self.journal.lock().record_trade(TradeRecord {
            at: now,
            symbol: intent.symbol.clone(),
            strategy,
            side: ProposalSide::Open,
            quantity: built.quantity,
            limit_price: built.limit_price,
            outcome: outcome_label(&response).to_string(),
            latency_ms,
        });

        match response {
            GateResponse::Approved { order_id, .. } => {
                let entry_price = built.limit_price * Decimal::from(100);
                let position = TrackedPosition {
                    trade_id: TrackedPosition::make_trade_id(&intent.symbol, strategy),
                    symbol: intent.symbol.clone(),
                    strategy,
                    origin: intent.origin.to_string(),
                    bias: intent.bias,
                    legs: built.legs,
                    entry_price,
                    quantity: built.quantity,
                    highest_pnl_seen: 0.0,
                    status: PositionStatus::Opening,
                    open_order: Some(WorkingOrder {
                        order_id: order_id.clone(),
                        limit: built.limit_price,
                        mid_at_submit: built.limit_price,
                        submitted_at: now,
                    }),
                    close_order: None,
                    retry_backoff_until: None,
                    opened_at: now,
                };
                let _ = self.new_positions.send(position);
                self.notifier
                    .send(
                        Severity::Success,
                        "Trade Executed",
                        &format!(
                            "{} {} x{} approved, order {order_id}, limit {}",
                            intent.symbol, strategy, built.quantity, built.limit_price
                        ),
                    )
                    .await;
            }
            GateResponse::Rejected { reason } => {
                warn!(symbol = %intent.symbol, %reason, "proposal rejected");
                self.notifier
                    .send(
                        Severity::Warning,
                        "Proposal Rejected",
                        &format!("{} {}: {reason}", intent.symbol, strategy),
                    )
                    .await;
            }
            GateResponse::ExecutionFailed { error } => {
                self.notifier
                    .send(
                        Severity::Error,
                        "Execution Failed",
                        &format!("{} {}: {error}", intent.symbol, strategy),
                    )
                    .await;
            }
        }
        Ok(())
    }

    fn track_regime(&mut self, regime: Regime, now: DateTime<Utc>) {
        if let Some(previous) = self.last_regime {
            if previous != regime {
                info!(from = %previous, to = %regime, "regime change");
                self.journal.lock().record_regime_change(previous, regime, now);
            }
        }
        self.last_regime = Some(regime);
    }
}

fn outcome_label(response: &GateResponse) -> &'static str {
    match response {
        GateResponse::Approved { .. } => "APPROVED",
        GateResponse::Rejected { .. } => "REJECTED",
        GateResponse::ExecutionFailed { .. } => "EXECUTION_FAILED",
    }
}

fn build_context(
    view: &SymbolView,
    vix: Option<f64>,
    bias: condor_core::types::Bias,
) -> BTreeMap<String, ContextValue> {
    let mut context = BTreeMap::new();
    if let Some(vix) = vix {
        context.insert("vix".to_string(), ContextValue::Number(vix));
    }
    context.insert(
        "trend_state".to_string(),
        ContextValue::Text(bias.to_string()),
    );
    let flow = match view.flow_state {
        FlowState::RiskOn => "risk_on",
        FlowState::RiskOff => "risk_off",
        FlowState::Neutral => "neutral",
        FlowState::Unknown => "unknown",
    };
    context.insert("flow_state".to_string(), ContextValue::Text(flow.to_string()));
    if let Some(rsi) = view.rsi_14 {
        context.insert("rsi".to_string(), ContextValue::Number(rsi));
    }
    if let Some(vwap) = view.vwap {
        context.insert("vwap".to_string(), ContextValue::Number(vwap));
    }
    context.insert(
        "volume_velocity".to_string(),
        ContextValue::Number(view.volume_velocity),
    );
    if let Some(sma) = view.sma_200 {
        context.insert("sma_200".to_string(), ContextValue::Number(sma));
    }
    context.insert(
        "candle_count".to_string(),
        ContextValue::Number(view.candle_count as f64),
    );
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{Structure, testutil};
    use condor_core::types::{Bias, OptionType};

    struct AlwaysFire;
    impl StrategyGate for AlwaysFire {
        fn name(&self) -> &'static str {
            "ALWAYS"
        }
        fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
            Some(SignalIntent {
                symbol: inputs.view.symbol.clone(),
                bias: Bias::Bullish,
                structure: Structure::CreditSpread(OptionType::Put),
                dte_target: 30,
                signal: "ALWAYS",
                origin: "ALWAYS",
            })
        }
    }

    fn engine() -> SignalEngine {
        SignalEngine::new(vec![Box::new(AlwaysFire)])
    }

    #[test]
    fn cold_view_never_fires() {
        let mut view = testutil::view();
        view.is_warm = false;
        let now = testutil::utc("2026-01-16 17:00:00");
        assert!(engine().evaluate(&view, Regime::Trending, Some(18.0), now).is_none());
    }

    #[test]
    fn unknown_regime_never_fires() {
        let view = testutil::view();
        let now = testutil::utc("2026-01-16 17:00:00");
        assert!(engine()
            .evaluate(&view, Regime::InsufficientData, Some(18.0), now)
            .is_none());
    }

    #[test]
    fn proposal_throttle_is_sixty_seconds() {
        let mut eng = engine();
        let view = testutil::view();
        let t0 = testutil::utc("2026-01-16 17:00:00");
        assert!(eng.evaluate(&view, Regime::Trending, Some(18.0), t0).is_some());
        eng.record_submission("SPY", "ALWAYS", t0);

        let t1 = t0 + Duration::seconds(59);
        assert!(eng.evaluate(&view, Regime::Trending, Some(18.0), t1).is_none());
        // The same signal is still replay-guarded at 60s; a different symbol
        // is not throttled at all.
        let mut other = testutil::view();
        other.symbol = "QQQ".to_string();
        assert!(eng.evaluate(&other, Regime::Trending, Some(18.0), t1).is_some());
    }

    #[test]
    fn replay_guard_is_five_minutes() {
        let mut eng = engine();
        let view = testutil::view();
        let t0 = testutil::utc("2026-01-16 17:00:00");
        eng.record_submission("SPY", "ALWAYS", t0);

        // Past the throttle but inside the replay window.
        let t1 = t0 + Duration::seconds(120);
        assert!(eng.evaluate(&view, Regime::Trending, Some(18.0), t1).is_none());

        let t2 = t0 + Duration::seconds(300);
        assert!(eng.evaluate(&view, Regime::Trending, Some(18.0), t2).is_some());
    }

    #[test]
    fn context_carries_vix_flow_and_bias() {
        let view = testutil::view();
        let context = build_context(&view, Some(18.0), Bias::Bullish);
        assert_eq!(context["vix"], ContextValue::Number(18.0));
        assert_eq!(
            context["flow_state"],
            ContextValue::Text("risk_on".to_string())
        );
        assert_eq!(
            context["trend_state"],
            ContextValue::Text("bullish".to_string())
        );
        assert!(context.contains_key("volume_velocity"));
    }

    #[test]
    fn context_omits_missing_vix() {
        let view = testutil::view();
        let context = build_context(&view, None, Bias::Neutral);
        assert!(!context.contains_key("vix"));
    }
}
