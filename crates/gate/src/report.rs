//! End-of-day summary. Triggered by the external scheduler at 21:30 UTC on
//! weekdays via `POST /v1/admin/report`; failures are logged, never fatal.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::ledger::Ledger;

/// Builds the day's summary text: equity delta plus proposal counts by
/// symbol and by status.
///
/// # Errors
/// Returns an error when the ledger cannot be read.
pub async fn build(
    ledger: &dyn Ledger,
    sod_equity: Option<Decimal>,
    current_equity: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<String> {
    let proposals = ledger.proposals_since(now - Duration::hours(24)).await?;

    let mut by_symbol: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    for p in &proposals {
        *by_symbol.entry(p.symbol.clone()).or_insert(0) += 1;
        *by_status.entry(p.status.clone()).or_insert(0) += 1;
    }

    let pnl_line = match (sod_equity, current_equity) {
        (Some(sod), Some(current)) => {
            let delta = current - sod;
            format!("Day P&L: ${delta:.2} (from ${sod:.2} to ${current:.2})")
        }
        _ => "Day P&L: unavailable".to_string(),
    };

    let mut lines = vec![pnl_line, format!("Proposals: {}", proposals.len())];
    if !by_status.is_empty() {
        let statuses: Vec<String> = by_status
            .iter()
            .map(|(status, count)| format!("{status}: {count}"))
            .collect();
        lines.push(format!("By status: {}", statuses.join(", ")));
    }
    if !by_symbol.is_empty() {
        let symbols: Vec<String> = by_symbol
            .iter()
            .map(|(symbol, count)| format!("{symbol}: {count}"))
            .collect();
        lines.push(format!("By symbol: {}", symbols.join(", ")));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, ProposalRecord};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn report_summarises_by_symbol_and_status() {
        let ledger = MemoryLedger::new();
        let record = |symbol: &str, status: &str| ProposalRecord {
            id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
            symbol: symbol.to_string(),
            strategy: "CREDIT_SPREAD".to_string(),
            side: "OPEN".to_string(),
            quantity: 1,
            context: serde_json::Value::Null,
            status: status.to_string(),
            rejection_reason: None,
        };
        for r in [
            record("SPY", "APPROVED"),
            record("SPY", "REJECTED"),
            record("QQQ", "APPROVED"),
        ] {
            ledger.record_proposal(&r).await.unwrap();
        }

        let text = build(&ledger, Some(dec!(100000)), Some(dec!(100750)), Utc::now())
            .await
            .unwrap();
        assert!(text.contains("$750.00"));
        assert!(text.contains("Proposals: 3"));
        assert!(text.contains("APPROVED: 2"));
        assert!(text.contains("SPY: 2"));
        assert!(text.contains("QQQ: 1"));
    }

    #[tokio::test]
    async fn report_without_equity_is_still_useful() {
        let ledger = MemoryLedger::new();
        let text = build(&ledger, None, None, Utc::now()).await.unwrap();
        assert!(text.contains("unavailable"));
        assert!(text.contains("Proposals: 0"));
    }
}
