//! Static HTML status dashboard served at `/`.

use chrono::Utc;

use crate::commands::StatusView;

/// Renders the composite status as a single self-contained page.
#[must_use]
pub fn render(view: &StatusView) -> String {
    let lock_class = if view.status == "LOCKED" { "locked" } else { "normal" };
    let equity = view
        .equity
        .map_or_else(|| "n/a".to_string(), |e| format!("${e:.2}"));
    let day_pnl = view
        .day_pnl
        .map_or_else(|| "n/a".to_string(), |p| format!("${p:.2}"));
    let heartbeat = view.last_heartbeat.map_or_else(
        || "never".to_string(),
        |at| format!("{}s ago", (Utc::now() - at).num_seconds()),
    );

    let mut proposal_rows = String::new();
    for p in &view.recent_proposals {
        proposal_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td></tr>\n",
            p.at.format("%H:%M:%S"),
            escape(&p.symbol),
            escape(&p.strategy),
            escape(&p.side),
            if p.status == "APPROVED" { "approved" } else { "rejected" },
            escape(&p.status),
            escape(p.rejection_reason.as_deref().unwrap_or("-")),
        ));
    }

    let mut position_rows = String::new();
    for pos in &view.positions {
        position_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>${:.2}</td></tr>\n",
            escape(&pos.symbol),
            pos.quantity,
            pos.cost_basis,
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="30">
<title>Risk Gate</title>
<style>
body {{ font-family: monospace; background: #101418; color: #d0d7de; margin: 2rem; }}
h1 {{ font-size: 1.3rem; }}
table {{ border-collapse: collapse; margin: 1rem 0; }}
td, th {{ border: 1px solid #30363d; padding: 0.3rem 0.7rem; text-align: left; }}
.locked {{ color: #f85149; font-weight: bold; }}
.normal {{ color: #3fb950; font-weight: bold; }}
.approved {{ color: #3fb950; }}
.rejected {{ color: #f85149; }}
</style>
</head>
<body>
<h1>Risk Gate</h1>
<p>Status: <span class="{lock_class}">{status}</span>{lock_reason}</p>
<p>Equity: {equity} | Day P&amp;L: {day_pnl} | Last heartbeat: {heartbeat}</p>
<h2>Positions</h2>
<table><tr><th>Symbol</th><th>Qty</th><th>Cost basis</th></tr>
{position_rows}</table>
<h2>Recent proposals</h2>
<table><tr><th>Time</th><th>Symbol</th><th>Strategy</th><th>Side</th><th>Status</th><th>Reason</th></tr>
{proposal_rows}</table>
</body>
</html>"#,
        lock_class = lock_class,
        status = escape(&view.status),
        lock_reason = view
            .lock_reason
            .as_deref()
            .map(|r| format!(" ({})", escape(r)))
            .unwrap_or_default(),
        equity = equity,
        day_pnl = day_pnl,
        heartbeat = heartbeat,
        position_rows = position_rows,
        proposal_rows = proposal_rows,
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ProposalRecord;

    fn view() -> StatusView {
        StatusView {
            status: "LOCKED".to_string(),
            lock_reason: Some("Daily loss 2.10% breaches the 2.00% limit".to_string()),
            equity: Some(rust_decimal_macros::dec!(97900)),
            day_pnl: Some(rust_decimal_macros::dec!(-2100)),
            positions: vec![],
            recent_proposals: vec![ProposalRecord {
                id: "p-1".to_string(),
                at: Utc::now(),
                symbol: "SPY".to_string(),
                strategy: "CREDIT_SPREAD".to_string(),
                side: "OPEN".to_string(),
                quantity: 10,
                context: serde_json::Value::Null,
                status: "REJECTED".to_string(),
                rejection_reason: Some("System is locked".to_string()),
            }],
            last_heartbeat: Some(Utc::now()),
            brain_state: None,
        }
    }

    #[test]
    fn dashboard_shows_lock_and_proposals() {
        let html = render(&view());
        assert!(html.contains("LOCKED"));
        assert!(html.contains("2.10%"));
        assert!(html.contains("CREDIT_SPREAD"));
        assert!(html.contains("System is locked"));
    }

    #[test]
    fn html_is_escaped() {
        let mut v = view();
        v.lock_reason = Some("<script>alert(1)</script>".to_string());
        let html = render(&v);
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
