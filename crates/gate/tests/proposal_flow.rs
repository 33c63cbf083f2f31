//! End-to-end gate scenarios through the HTTP router with an in-memory
//! ledger and a scripted broker.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

use condor_broker::{
    Balances, BrokerApi, BrokerPosition, MultilegOrder, OptionContract, OrderAck, OrderStatus,
    Quote,
};
use condor_core::config::Constitution;
use condor_core::signing;
use condor_core::types::{
    Bias, Candle, ContextValue, LegSide, OptionType, Proposal, ProposalLeg, ProposalSide,
    StrategyKind,
};
use condor_gate::actor::GateActor;
use condor_gate::handle::GateHandle;
use condor_gate::ledger::{Ledger, MemoryLedger, PositionMetadata};
use condor_gate::server;

const SECRET: &str = "test-shared-secret";

#[derive(Default)]
struct ScriptedBroker {
    equity: Mutex<Decimal>,
    positions: Mutex<Vec<BrokerPosition>>,
    fail_orders: Mutex<bool>,
    placed: Mutex<Vec<MultilegOrder>>,
    next_order_id: Mutex<u64>,
}

#[async_trait]
impl BrokerApi for ScriptedBroker {
    async fn quotes(&self, _symbols: &[String]) -> Result<Vec<Quote>> {
        Ok(vec![])
    }
    async fn option_expirations(&self, _symbol: &str) -> Result<Vec<NaiveDate>> {
        Ok(vec![])
    }
    async fn option_chain(
        &self,
        _symbol: &str,
        _expiration: NaiveDate,
    ) -> Result<Vec<OptionContract>> {
        Ok(vec![])
    }
    async fn time_sales(
        &self,
        _symbol: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(vec![])
    }
    async fn balances(&self) -> Result<Balances> {
        Ok(Balances {
            total_equity: *self.equity.lock(),
        })
    }
    async fn positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.positions.lock().clone())
    }
    async fn place_multileg(&self, order: &MultilegOrder) -> Result<OrderAck> {
        if *self.fail_orders.lock() {
            return Err(anyhow!("broker refused the order"));
        }
        self.placed.lock().push(order.clone());
        let mut next = self.next_order_id.lock();
        *next += 1;
        Ok(OrderAck {
            id: format!("{}", 900_000 + *next),
            status: "ok".to_string(),
        })
    }
    async fn cancel_order(&self, _order_id: &str) -> Result<()> {
        Ok(())
    }
    async fn order_status(&self, _order_id: &str) -> Result<OrderStatus> {
        Ok(OrderStatus::Pending)
    }
}

struct Gate {
    app: Router,
    ledger: Arc<MemoryLedger>,
    broker: Arc<ScriptedBroker>,
}

async fn spawn_gate(constitution: Constitution) -> Gate {
    let ledger = Arc::new(MemoryLedger::new());
    let broker = Arc::new(ScriptedBroker::default());
    *broker.equity.lock() = dec!(100000);

    let (tx, rx) = mpsc::channel(16);
    let actor = GateActor::load(
        constitution,
        SECRET.to_string(),
        broker.clone(),
        ledger.clone(),
        Arc::new(condor_notify::NullNotifier),
        rx,
    )
    .await
    .unwrap();
    tokio::spawn(actor.run());

    Gate {
        app: server::router(GateHandle::new(tx)),
        ledger,
        broker,
    }
}

fn leg(strike: i64, side: LegSide, quantity: u32, days_out: i64) -> ProposalLeg {
    let expiration = Utc::now().date_naive() + Duration::days(days_out);
    ProposalLeg {
        symbol: condor_core::occ::encode("SPY", expiration, OptionType::Put, Decimal::from(strike)),
        expiration,
        strike: Decimal::from(strike),
        option_type: OptionType::Put,
        quantity,
        side,
    }
}

fn bull_put_spread(symbol: &str) -> Proposal {
    let mut context = BTreeMap::new();
    context.insert("vix".to_string(), ContextValue::Number(18.0));
    context.insert(
        "flow_state".to_string(),
        ContextValue::Text("risk_on".to_string()),
    );
    context.insert(
        "trend_state".to_string(),
        ContextValue::Text("bullish".to_string()),
    );
    Proposal {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp_ms: Utc::now().timestamp_millis(),
        symbol: symbol.to_string(),
        strategy: StrategyKind::CreditSpread,
        side: ProposalSide::Open,
        quantity: 10,
        price: dec!(0.70),
        legs: vec![leg(428, LegSide::Sell, 10, 30), leg(426, LegSide::Buy, 10, 30)],
        context,
        signature: None,
    }
}

fn signed_request(proposal: &Proposal) -> Request<Body> {
    let value = serde_json::to_value(proposal).unwrap();
    let canonical = signing::canonical_payload(&value).unwrap();
    let signature = signing::sign(SECRET, &canonical);
    Request::builder()
        .method("POST")
        .uri("/v1/proposal")
        .header("content-type", "application/json")
        .header("X-GW-Signature", signature)
        .body(Body::from(value.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn bull_put_spread_happy_path() {
    let gate = spawn_gate(Constitution::default()).await;
    let proposal = bull_put_spread("SPY");

    let (status, body) = send(&gate.app, signed_request(&proposal)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "APPROVED");
    assert!(body["order_id"].as_str().is_some());
    assert_eq!(body["proposal_id"], proposal.id.as_str());

    // Exactly one ledger row, approved, written before the reply.
    let recent = gate.ledger.recent_proposals(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, proposal.id);
    assert_eq!(recent[0].status, "APPROVED");

    // Metadata keyed by the broker order id, bullish in the index group.
    let metadata = gate.ledger.metadata().await.unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].0, body["order_id"].as_str().unwrap());
    assert_eq!(metadata[0].1.bias, Bias::Bullish);
    assert_eq!(metadata[0].1.symbol, "SPY");

    // The broker got one credit multileg with mapped sides.
    let placed = gate.broker.placed.lock();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].order_type, "credit");
    assert_eq!(placed[0].legs.len(), 2);
    assert_eq!(
        placed[0].legs[0].side,
        condor_broker::BrokerLegSide::SellToOpen
    );
    assert_eq!(
        placed[0].legs[1].side,
        condor_broker::BrokerLegSide::BuyToOpen
    );
}

#[tokio::test]
async fn occ_symbols_carry_scaled_strikes() {
    let gate = spawn_gate(Constitution::default()).await;
    let proposal = bull_put_spread("SPY");
    let (status, _) = send(&gate.app, signed_request(&proposal)).await;
    assert_eq!(status, StatusCode::OK);

    let placed = gate.broker.placed.lock();
    for (leg, proposed) in placed[0].legs.iter().zip(&proposal.legs) {
        let decoded = condor_core::occ::decode(&leg.option_symbol).unwrap();
        assert_eq!(decoded.strike * dec!(1000), proposed.strike * dec!(1000));
    }
}

#[tokio::test]
async fn correlation_guard_trips_across_the_group() {
    let gate = spawn_gate(Constitution::default()).await;
    // Two bullish SPY positions already on the books.
    for id in ["900001", "900002"] {
        gate.ledger
            .put_metadata(
                id,
                &PositionMetadata {
                    symbol: "SPY".to_string(),
                    bias: Bias::Bullish,
                    strategy: StrategyKind::CreditSpread,
                },
            )
            .await
            .unwrap();
    }

    let proposal = bull_put_spread("QQQ");
    let (status, body) = send(&gate.app, signed_request(&proposal)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    let reason = body["reason"].as_str().unwrap();
    assert!(reason.contains("US_INDICES"), "reason was: {reason}");
    assert!(reason.contains('2'), "reason was: {reason}");
}

#[tokio::test]
async fn daily_loss_latches_the_lock() {
    let gate = spawn_gate(Constitution::default()).await;
    let today = condor_core::session::eastern_date(Utc::now());
    gate.ledger.set_sod_equity(today, dec!(100000)).await.unwrap();
    *gate.broker.equity.lock() = dec!(97900);

    let (status, body) = send(&gate.app, signed_request(&bull_put_spread("SPY"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let reason = body["reason"].as_str().unwrap();
    assert!(reason.contains("2.10%"), "reason was: {reason}");

    // Lock persisted to the ledger.
    let (state, _) = gate.ledger.system_status().await.unwrap().unwrap();
    assert_eq!(state, "LOCKED");

    // Every subsequent proposal bounces off the lock.
    let (status, body) = send(&gate.app, signed_request(&bull_put_spread("SPY"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("System is locked"));

    // And no APPROVED row exists after the lock.
    let recent = gate.ledger.recent_proposals(10).await.unwrap();
    assert!(recent.iter().all(|p| p.status == "REJECTED"));
}

#[tokio::test]
async fn missing_signature_is_rejected_and_recorded() {
    let gate = spawn_gate(Constitution::default()).await;
    let proposal = bull_put_spread("SPY");
    let value = serde_json::to_value(&proposal).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/proposal")
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap();

    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("signature"));

    let recent = gate.ledger.recent_proposals(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, "REJECTED");
}

#[tokio::test]
async fn malformed_body_is_still_recorded() {
    let gate = spawn_gate(Constitution::default()).await;
    // Signed correctly, but the body is not a proposal.
    let value = serde_json::json!({"id": "p-bad", "symbol": "SPY", "note": "missing everything"});
    let canonical = signing::canonical_payload(&value).unwrap();
    let signature = signing::sign(SECRET, &canonical);
    let request = Request::builder()
        .method("POST")
        .uri("/v1/proposal")
        .header("content-type", "application/json")
        .header("X-GW-Signature", signature)
        .body(Body::from(value.to_string()))
        .unwrap();

    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "BAD_REQUEST");

    // The ledger row was appended before the reply, same as any rejection.
    let recent = gate.ledger.recent_proposals(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, "p-bad");
    assert_eq!(recent[0].status, "REJECTED");
    assert!(recent[0]
        .rejection_reason
        .as_deref()
        .unwrap()
        .contains("malformed proposal"));
}

#[tokio::test]
async fn tampered_payload_fails_verification() {
    let gate = spawn_gate(Constitution::default()).await;
    let proposal = bull_put_spread("SPY");
    let mut request = signed_request(&proposal);
    // Swap the body for a different proposal while keeping the signature.
    let other = bull_put_spread("QQQ");
    *request.body_mut() = Body::from(serde_json::to_value(&other).unwrap().to_string());

    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("Invalid signature"));
}

#[tokio::test]
async fn stale_proposal_is_rejected() {
    let gate = spawn_gate(Constitution::default()).await;
    let mut proposal = bull_put_spread("SPY");
    proposal.timestamp_ms = Utc::now().timestamp_millis() - 61_000;

    let (status, body) = send(&gate.app, signed_request(&proposal)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("Stale"));
}

#[tokio::test]
async fn dte_outside_bounds_is_rejected() {
    let gate = spawn_gate(Constitution::default()).await;
    let mut proposal = bull_put_spread("SPY");
    proposal.legs = vec![leg(428, LegSide::Sell, 10, 46), leg(426, LegSide::Buy, 10, 46)];

    let (status, body) = send(&gate.app, signed_request(&proposal)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("DTE"));
}

#[tokio::test]
async fn execution_failure_keeps_approval_without_metadata() {
    let gate = spawn_gate(Constitution::default()).await;
    *gate.broker.fail_orders.lock() = true;

    let (status, body) = send(&gate.app, signed_request(&bull_put_spread("SPY"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "APPROVED_BUT_EXECUTION_FAILED");

    let recent = gate.ledger.recent_proposals(10).await.unwrap();
    assert_eq!(recent[0].status, "APPROVED");
    assert!(gate.ledger.metadata().await.unwrap().is_empty());
}

#[tokio::test]
async fn close_removes_the_matching_open_metadata() {
    let gate = spawn_gate(Constitution::default()).await;

    // Open first.
    let open = bull_put_spread("SPY");
    let (status, body) = send(&gate.app, signed_request(&open)).await;
    assert_eq!(status, StatusCode::OK);
    let order_id = body["order_id"].as_str().unwrap().to_string();
    assert_eq!(gate.ledger.metadata().await.unwrap().len(), 1);

    // Close the same shape.
    let mut close = bull_put_spread("SPY");
    close.side = ProposalSide::Close;
    let (status, _) = send(&gate.app, signed_request(&close)).await;
    assert_eq!(status, StatusCode::OK);

    let metadata = gate.ledger.metadata().await.unwrap();
    assert!(metadata.iter().all(|(id, _)| id != &order_id));

    // The close went out as a debit with inverted sides.
    let placed = gate.broker.placed.lock();
    assert_eq!(placed[1].order_type, "debit");
    assert_eq!(
        placed[1].legs[0].side,
        condor_broker::BrokerLegSide::BuyToClose
    );
    assert_eq!(
        placed[1].legs[1].side,
        condor_broker::BrokerLegSide::SellToClose
    );
}

#[tokio::test]
async fn calendar_lock_blocks_opens_only() {
    let gate = spawn_gate(Constitution::default()).await;
    let today = condor_core::session::eastern_date(Utc::now());

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/calendar")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "dates": [today] }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = send(&gate.app, signed_request(&bull_put_spread("SPY"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("restricted"));

    let mut close = bull_put_spread("SPY");
    close.side = ProposalSide::Close;
    let (status, _) = send(&gate.app, signed_request(&close)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn vix_gate_applies_to_opens() {
    let gate = spawn_gate(Constitution::default()).await;
    let mut proposal = bull_put_spread("SPY");
    proposal
        .context
        .insert("vix".to_string(), ContextValue::Number(28.01));

    let (status, body) = send(&gate.app, signed_request(&proposal)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["reason"].as_str().unwrap().contains("VIX"));
}

#[tokio::test]
async fn heartbeat_updates_status_view() {
    let gate = spawn_gate(Constitution::default()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/heartbeat")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "state": { "regime": "TRENDING" } }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");

    let request = Request::builder()
        .method("GET")
        .uri("/v1/status")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "NORMAL");
    assert!(body["last_heartbeat"].as_str().is_some());
    assert_eq!(body["brain_state"]["regime"], "TRENDING");
}

#[tokio::test]
async fn lock_and_unlock_round_trip() {
    let gate = spawn_gate(Constitution::default()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/lock")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "reason": "maintenance" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "LOCKED");

    let (status, _) = send(&gate.app, signed_request(&bull_put_spread("SPY"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/admin/unlock")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&gate.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UNLOCKED");

    let (status, _) = send(&gate.app, signed_request(&bull_put_spread("SPY"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn dashboard_serves_html() {
    let gate = spawn_gate(Constitution::default()).await;
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let response = gate.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Risk Gate"));
    assert!(html.contains("NORMAL"));
}
