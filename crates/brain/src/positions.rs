//! Tracked position book with an atomic disk mirror.
//!
//! The book is the brain's private view of its option positions; the broker
//! remains the source of truth and reconciliation corrects drift. The mirror
//! is rewritten in full after every mutation through a single writer task so
//! the file on disk is never partial, and reloading it is the restart
//! contract: load then serialize must be byte-identical.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use condor_core::types::{Bias, ProposalLeg, StrategyKind};

#[derive(Debug, Error)]
pub enum BookError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lifecycle of a tracked position. Transitions are OPENING to OPEN to
/// CLOSING to gone, with CLOSING falling back to OPEN on a failed close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Opening,
    Open,
    Closing,
}

/// A working order the chaser is babysitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingOrder {
    pub order_id: String,
    /// Net limit on the submitted order.
    pub limit: Decimal,
    /// Net market mid at submission time.
    pub mid_at_submit: Decimal,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub trade_id: String,
    pub symbol: String,
    pub strategy: StrategyKind,
    /// Emitting gate name; selects the exit rule family.
    pub origin: String,
    pub bias: Bias,
    pub legs: Vec<ProposalLeg>,
    /// Total net credit or debit in dollars for the full-quantity trade,
    /// computed after leg quantities were scaled to final size.
    pub entry_price: Decimal,
    pub quantity: u32,
    pub highest_pnl_seen: f64,
    pub status: PositionStatus,
    pub open_order: Option<WorkingOrder>,
    pub close_order: Option<WorkingOrder>,
    pub retry_backoff_until: Option<DateTime<Utc>>,
    pub opened_at: DateTime<Utc>,
}

impl TrackedPosition {
    /// Composite id: symbol, strategy and a short unique suffix.
    #[must_use]
    pub fn make_trade_id(symbol: &str, strategy: StrategyKind) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{symbol}-{strategy}-{}", &suffix[..8])
    }
}

/// The tracked-position map plus its mirror path.
#[derive(Debug)]
pub struct PositionBook {
    positions: BTreeMap<String, TrackedPosition>,
    path: PathBuf,
}

impl PositionBook {
    /// Loads the mirror, starting empty when the file is missing or corrupt.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let positions = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, TrackedPosition>>(&bytes)
            {
                Ok(map) => {
                    info!(count = map.len(), path = %path.display(), "loaded position mirror");
                    map
                }
                Err(err) => {
                    warn!(%err, path = %path.display(), "corrupt position mirror, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no position mirror, starting fresh");
                BTreeMap::new()
            }
            Err(err) => {
                warn!(%err, path = %path.display(), "unreadable position mirror, starting fresh");
                BTreeMap::new()
            }
        };
        Self {
            positions,
            path: path.to_path_buf(),
        }
    }

    /// Serializes the map. The map is a `BTreeMap` and fields serialize in
    /// declaration order, so repeated serialization is byte-stable.
    ///
    /// # Errors
    /// Returns an error on serialization failure.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, BookError> {
        Ok(serde_json::to_vec_pretty(&self.positions)?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn insert(&mut self, position: TrackedPosition) {
        self.positions.insert(position.trade_id.clone(), position);
    }

    pub fn remove(&mut self, trade_id: &str) -> Option<TrackedPosition> {
        self.positions.remove(trade_id)
    }

    #[must_use]
    pub fn get(&self, trade_id: &str) -> Option<&TrackedPosition> {
        self.positions.get(trade_id)
    }

    pub fn get_mut(&mut self, trade_id: &str) -> Option<&mut TrackedPosition> {
        self.positions.get_mut(trade_id)
    }

    pub fn trade_ids(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedPosition> {
        self.positions.values()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes mirror snapshots atomically (temp file then rename). One writer,
/// one file: snapshots are applied in send order, and dropping the sender
/// flushes the queue before the task exits.
#[must_use]
pub fn spawn_mirror_writer(
    path: PathBuf,
) -> (mpsc::UnboundedSender<Vec<u8>>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let handle = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(err) = write_atomic(&path, &bytes) {
                warn!(%err, path = %path.display(), "position mirror write failed");
            } else {
                debug!(bytes = bytes.len(), "position mirror written");
            }
        }
        info!("position mirror writer stopped");
    });
    (tx, handle)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use condor_core::types::{LegSide, OptionType};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn leg(strike: i64, side: LegSide, quantity: u32) -> ProposalLeg {
        let expiration = chrono::NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        ProposalLeg {
            symbol: condor_core::occ::encode(
                "SPY",
                expiration,
                OptionType::Put,
                Decimal::from(strike),
            ),
            expiration,
            strike: Decimal::from(strike),
            option_type: OptionType::Put,
            quantity,
            side,
        }
    }

    fn position(trade_id: &str) -> TrackedPosition {
        TrackedPosition {
            trade_id: trade_id.to_string(),
            symbol: "SPY".to_string(),
            strategy: StrategyKind::CreditSpread,
            origin: "TREND_ENGINE".to_string(),
            bias: Bias::Bullish,
            legs: vec![leg(428, LegSide::Sell, 10), leg(426, LegSide::Buy, 10)],
            entry_price: dec!(280),
            quantity: 10,
            highest_pnl_seen: 0.0,
            status: PositionStatus::Opening,
            open_order: Some(WorkingOrder {
                order_id: "900001".to_string(),
                limit: dec!(2.80),
                mid_at_submit: dec!(2.85),
                submitted_at: Utc.with_ymd_and_hms(2026, 1, 16, 15, 0, 0).unwrap(),
            }),
            close_order: None,
            retry_backoff_until: None,
            opened_at: Utc.with_ymd_and_hms(2026, 1, 16, 15, 0, 0).unwrap(),
        }
    }

    #[test]
    fn missing_mirror_starts_empty() {
        let dir = TempDir::new().unwrap();
        let book = PositionBook::load(&dir.path().join("positions.json"));
        assert!(book.is_empty());
    }

    #[test]
    fn corrupt_mirror_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let book = PositionBook::load(&path);
        assert!(book.is_empty());
    }

    #[test]
    fn snapshot_round_trips_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let mut book = PositionBook::load(&path);
        book.insert(position("SPY-CREDIT_SPREAD-aaaa0000"));
        book.insert(position("QQQ-CREDIT_SPREAD-bbbb1111"));

        let bytes = book.snapshot_bytes().unwrap();
        std::fs::write(&path, &bytes).unwrap();

        let reloaded = PositionBook::load(&path);
        assert_eq!(reloaded.len(), 2);
        let bytes_again = reloaded.snapshot_bytes().unwrap();
        assert_eq!(bytes, bytes_again);
    }

    #[test]
    fn reload_preserves_working_orders() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let mut book = PositionBook::load(&path);
        book.insert(position("SPY-CREDIT_SPREAD-aaaa0000"));
        std::fs::write(&path, book.snapshot_bytes().unwrap()).unwrap();

        let reloaded = PositionBook::load(&path);
        let pos = reloaded.get("SPY-CREDIT_SPREAD-aaaa0000").unwrap();
        assert_eq!(pos.status, PositionStatus::Opening);
        assert_eq!(pos.open_order.as_ref().unwrap().order_id, "900001");
        assert_eq!(pos.entry_price, dec!(280));
    }

    #[tokio::test]
    async fn mirror_writer_writes_atomically_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let (tx, handle) = spawn_mirror_writer(path.clone());
        tx.send(b"{\"first\": 1}".to_vec()).unwrap();
        tx.send(b"{\"second\": 2}".to_vec()).unwrap();
        drop(tx);
        handle.await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"second\": 2}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn trade_id_embeds_symbol_and_strategy() {
        let id = TrackedPosition::make_trade_id("SPY", StrategyKind::IronCondor);
        assert!(id.starts_with("SPY-IRON_CONDOR-"));
        let other = TrackedPosition::make_trade_id("SPY", StrategyKind::IronCondor);
        assert_ne!(id, other);
    }
}
