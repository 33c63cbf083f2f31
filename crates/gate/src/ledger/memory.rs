//! In-memory ledger for tests and local development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;

use condor_core::types::StrategyKind;

use super::{Ledger, OrderRecord, PositionMetadata, PositionRow, ProposalRecord};

#[derive(Default)]
struct Inner {
    proposals: Vec<ProposalRecord>,
    orders: Vec<OrderRecord>,
    positions: Vec<PositionRow>,
    system_status: Option<(String, Option<String>)>,
    metadata: BTreeMap<String, PositionMetadata>,
    /// Insertion order of metadata keys, newest last.
    metadata_order: Vec<String>,
    sod_equity: BTreeMap<NaiveDate, Decimal>,
    equity_marks: Vec<(DateTime<Utc>, Decimal)>,
    restricted: Vec<NaiveDate>,
    heartbeat: Option<(DateTime<Utc>, Option<Value>)>,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_proposal(&self, record: &ProposalRecord) -> Result<()> {
        self.inner.lock().proposals.push(record.clone());
        Ok(())
    }

    async fn recent_proposals(&self, limit: usize) -> Result<Vec<ProposalRecord>> {
        let inner = self.inner.lock();
        Ok(inner.proposals.iter().rev().take(limit).cloned().collect())
    }

    async fn proposals_since(&self, since: DateTime<Utc>) -> Result<Vec<ProposalRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .proposals
            .iter()
            .filter(|p| p.at >= since)
            .cloned()
            .collect())
    }

    async fn insert_order(&self, order: &OrderRecord) -> Result<()> {
        self.inner.lock().orders.push(order.clone());
        Ok(())
    }

    async fn pending_orders(&self) -> Result<Vec<OrderRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .orders
            .iter()
            .filter(|o| o.status == "pending")
            .cloned()
            .collect())
    }

    async fn update_order_status(&self, id: &str, status: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        for order in inner.orders.iter_mut().filter(|o| o.id == id) {
            order.status = status.to_string();
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn replace_positions(&self, rows: &[PositionRow]) -> Result<()> {
        self.inner.lock().positions = rows.to_vec();
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<PositionRow>> {
        Ok(self.inner.lock().positions.clone())
    }

    async fn set_system_status(&self, status: &str, reason: Option<&str>) -> Result<()> {
        self.inner.lock().system_status =
            Some((status.to_string(), reason.map(ToString::to_string)));
        Ok(())
    }

    async fn system_status(&self) -> Result<Option<(String, Option<String>)>> {
        Ok(self.inner.lock().system_status.clone())
    }

    async fn put_metadata(&self, order_id: &str, meta: &PositionMetadata) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.metadata.insert(order_id.to_string(), meta.clone());
        inner.metadata_order.retain(|id| id != order_id);
        inner.metadata_order.push(order_id.to_string());
        Ok(())
    }

    async fn remove_metadata(&self, order_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.metadata.remove(order_id);
        inner.metadata_order.retain(|id| id != order_id);
        Ok(())
    }

    async fn metadata(&self) -> Result<Vec<(String, PositionMetadata)>> {
        let inner = self.inner.lock();
        Ok(inner
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn latest_order_for(
        &self,
        symbol: &str,
        strategy: StrategyKind,
    ) -> Result<Option<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .metadata_order
            .iter()
            .rev()
            .find(|id| {
                inner
                    .metadata
                    .get(*id)
                    .is_some_and(|m| m.symbol == symbol && m.strategy == strategy)
            })
            .cloned())
    }

    async fn set_sod_equity(&self, date: NaiveDate, equity: Decimal) -> Result<()> {
        self.inner.lock().sod_equity.insert(date, equity);
        Ok(())
    }

    async fn sod_equity(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        Ok(self.inner.lock().sod_equity.get(&date).copied())
    }

    async fn record_equity(&self, at: DateTime<Utc>, equity: Decimal) -> Result<()> {
        self.inner.lock().equity_marks.push((at, equity));
        Ok(())
    }

    async fn replace_restricted_dates(&self, dates: &[NaiveDate]) -> Result<()> {
        self.inner.lock().restricted = dates.to_vec();
        Ok(())
    }

    async fn restricted_dates(&self) -> Result<Vec<NaiveDate>> {
        Ok(self.inner.lock().restricted.clone())
    }

    async fn set_heartbeat(&self, at: DateTime<Utc>, state: Option<Value>) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = state.or_else(|| inner.heartbeat.as_ref().and_then(|(_, s)| s.clone()));
        inner.heartbeat = Some((at, state));
        Ok(())
    }

    async fn heartbeat(&self) -> Result<Option<(DateTime<Utc>, Option<Value>)>> {
        Ok(self.inner.lock().heartbeat.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condor_core::types::Bias;

    fn meta(symbol: &str, bias: Bias) -> PositionMetadata {
        PositionMetadata {
            symbol: symbol.to_string(),
            bias,
            strategy: StrategyKind::CreditSpread,
        }
    }

    #[tokio::test]
    async fn latest_order_respects_insertion_order() {
        let ledger = MemoryLedger::new();
        ledger.put_metadata("1", &meta("SPY", Bias::Bullish)).await.unwrap();
        ledger.put_metadata("2", &meta("SPY", Bias::Bullish)).await.unwrap();
        ledger.put_metadata("3", &meta("QQQ", Bias::Bearish)).await.unwrap();

        let latest = ledger
            .latest_order_for("SPY", StrategyKind::CreditSpread)
            .await
            .unwrap();
        assert_eq!(latest.as_deref(), Some("2"));

        ledger.remove_metadata("2").await.unwrap();
        let latest = ledger
            .latest_order_for("SPY", StrategyKind::CreditSpread)
            .await
            .unwrap();
        assert_eq!(latest.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn recent_proposals_are_newest_first() {
        let ledger = MemoryLedger::new();
        for i in 0..5 {
            ledger
                .record_proposal(&ProposalRecord {
                    id: format!("p{i}"),
                    at: Utc::now(),
                    symbol: "SPY".to_string(),
                    strategy: "CREDIT_SPREAD".to_string(),
                    side: "OPEN".to_string(),
                    quantity: 1,
                    context: Value::Null,
                    status: "REJECTED".to_string(),
                    rejection_reason: Some("test".to_string()),
                })
                .await
                .unwrap();
        }
        let recent = ledger.recent_proposals(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "p4");
    }

    #[tokio::test]
    async fn heartbeat_keeps_last_state_blob() {
        let ledger = MemoryLedger::new();
        let t0 = Utc::now();
        ledger
            .set_heartbeat(t0, Some(serde_json::json!({"regime": "TRENDING"})))
            .await
            .unwrap();
        // A stateless heartbeat refreshes the timestamp only.
        ledger.set_heartbeat(t0, None).await.unwrap();
        let (_, state) = ledger.heartbeat().await.unwrap().unwrap();
        assert_eq!(state.unwrap()["regime"], "TRENDING");
    }

    #[tokio::test]
    async fn positions_snapshot_is_replaced_wholesale() {
        let ledger = MemoryLedger::new();
        let row = |symbol: &str| PositionRow {
            symbol: symbol.to_string(),
            quantity: 1,
            cost_basis: Decimal::ONE,
            date_acquired: Utc::now(),
            updated_at: Utc::now(),
        };
        ledger.replace_positions(&[row("A"), row("B")]).await.unwrap();
        ledger.replace_positions(&[row("C")]).await.unwrap();
        let positions = ledger.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "C");
    }
}
