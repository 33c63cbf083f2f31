//! Execution-quality journal.
//!
//! Captures submitted trades (signal price vs limit, gate outcome, latency)
//! and regime transitions for later review. Bounded, written atomically,
//! and strictly best-effort: journal failures never touch trading.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use condor_core::types::{ProposalSide, Regime, StrategyKind};

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub at: DateTime<Utc>,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub side: ProposalSide,
    pub quantity: u32,
    pub limit_price: Decimal,
    pub outcome: String,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeChange {
    pub at: DateTime<Utc>,
    pub from: Regime,
    pub to: Regime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JournalData {
    trades: Vec<TradeRecord>,
    regime_changes: Vec<RegimeChange>,
    errors: Vec<String>,
}

#[derive(Debug)]
pub struct TradeJournal {
    path: PathBuf,
    data: JournalData,
}

impl TradeJournal {
    /// Loads the journal, starting empty on a missing or corrupt file.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let data = std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            data,
        }
    }

    pub fn record_trade(&mut self, record: TradeRecord) {
        self.data.trades.push(record);
        trim(&mut self.data.trades);
        self.save();
    }

    pub fn record_regime_change(&mut self, from: Regime, to: Regime, at: DateTime<Utc>) {
        self.data.regime_changes.push(RegimeChange { at, from, to });
        trim(&mut self.data.regime_changes);
        self.save();
    }

    pub fn record_error(&mut self, message: String) {
        self.data.errors.push(message);
        trim(&mut self.data.errors);
        self.save();
    }

    #[must_use]
    pub fn trades(&self) -> &[TradeRecord] {
        &self.data.trades
    }

    fn save(&self) {
        let bytes = match serde_json::to_vec_pretty(&self.data) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "journal serialization failed");
                return;
            }
        };
        let tmp = self.path.with_extension("json.tmp");
        let result = std::fs::write(&tmp, &bytes).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            warn!(%err, path = %self.path.display(), "journal write failed");
        }
    }
}

fn trim<T>(entries: &mut Vec<T>) {
    if entries.len() > MAX_ENTRIES {
        let excess = entries.len() - MAX_ENTRIES;
        entries.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn record(symbol: &str) -> TradeRecord {
        TradeRecord {
            at: Utc::now(),
            symbol: symbol.to_string(),
            strategy: StrategyKind::CreditSpread,
            side: ProposalSide::Open,
            quantity: 10,
            limit_price: dec!(2.80),
            outcome: "APPROVED".to_string(),
            latency_ms: 120,
        }
    }

    #[test]
    fn journal_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.json");
        let mut journal = TradeJournal::load(&path);
        journal.record_trade(record("SPY"));
        journal.record_regime_change(Regime::LowVolChop, Regime::Trending, Utc::now());

        let reloaded = TradeJournal::load(&path);
        assert_eq!(reloaded.trades().len(), 1);
        assert_eq!(reloaded.trades()[0].symbol, "SPY");
    }

    #[test]
    fn journal_is_bounded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.json");
        let mut journal = TradeJournal::load(&path);
        for i in 0..(MAX_ENTRIES + 50) {
            journal.data.trades.push(record(&format!("S{i}")));
        }
        trim(&mut journal.data.trades);
        assert_eq!(journal.data.trades.len(), MAX_ENTRIES);
        // Oldest entries are the ones dropped.
        assert_eq!(journal.data.trades[0].symbol, "S50");
    }

    #[test]
    fn corrupt_journal_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.json");
        std::fs::write(&path, b"%%%").unwrap();
        let journal = TradeJournal::load(&path);
        assert!(journal.trades().is_empty());
    }
}
