//! Immutable risk configuration (the "constitution") and shared sizing
//! parameters.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::StrategyKind;

/// Immutable risk rules and universe for the gate. Loaded once at startup;
/// never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constitution {
    pub allowed_symbols: Vec<String>,
    /// Enforced for OPEN proposals only; CLOSE may unwind any shape.
    pub allowed_strategies: Vec<StrategyKind>,
    /// Hard cap on distinct symbols with open positions.
    pub max_open_positions: usize,
    /// Per-symbol open position cap.
    pub max_concentration_per_symbol: usize,
    /// Daily loss fraction that latches the lock, e.g. 0.02.
    pub max_daily_loss_percent: f64,
    pub min_dte: i64,
    pub max_dte: i64,
    /// Group name to member symbols.
    pub correlation_groups: BTreeMap<String, Vec<String>>,
    /// Same-bias cap within one correlation group.
    pub max_correlated_positions: usize,
    /// Carried for the audit trail alongside `max_open_positions`; the
    /// distinct-symbol cap is the one enforced.
    pub max_total_positions: usize,
    /// Proposals older than this many milliseconds are rejected.
    pub stale_proposal_ms: i64,
    /// Forced end-of-day close, wall clock in America/New_York, as "HH:MM".
    #[serde(default, with = "eod_time")]
    pub force_eod_close_et: Option<NaiveTime>,
}

/// `"HH:MM"` wire format for the forced close time; `"HH:MM:SS"` is also
/// accepted on input.
mod eod_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&t.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => NaiveTime::parse_from_str(&s, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl Constitution {
    /// Names of every correlation group containing `symbol`.
    #[must_use]
    pub fn groups_for(&self, symbol: &str) -> Vec<&str> {
        self.correlation_groups
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == symbol))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    #[must_use]
    pub fn symbol_allowed(&self, symbol: &str) -> bool {
        self.allowed_symbols.iter().any(|s| s == symbol)
    }

    #[must_use]
    pub fn strategy_allowed(&self, strategy: StrategyKind) -> bool {
        self.allowed_strategies.contains(&strategy)
    }
}

impl Default for Constitution {
    fn default() -> Self {
        Self {
            allowed_symbols: vec![
                "SPY".to_string(),
                "QQQ".to_string(),
                "IWM".to_string(),
                "DIA".to_string(),
            ],
            allowed_strategies: vec![
                StrategyKind::CreditSpread,
                StrategyKind::IronCondor,
                StrategyKind::IronButterfly,
                StrategyKind::RatioSpread,
            ],
            max_open_positions: 5,
            max_concentration_per_symbol: 2,
            max_daily_loss_percent: 0.02,
            min_dte: 0,
            max_dte: 45,
            correlation_groups: BTreeMap::from([(
                "US_INDICES".to_string(),
                vec![
                    "SPY".to_string(),
                    "QQQ".to_string(),
                    "IWM".to_string(),
                    "DIA".to_string(),
                ],
            )]),
            max_correlated_positions: 2,
            max_total_positions: 8,
            stale_proposal_ms: 60_000,
            force_eod_close_et: None,
        }
    }
}

/// Restricted calendar dates (FOMC, CPI and similar event days). OPEN
/// proposals are blocked on these dates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestrictedDates {
    pub dates: Vec<NaiveDate>,
}

impl RestrictedDates {
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

/// Position sizing knobs for the 2% rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingParams {
    /// Fraction of equity risked per trade.
    pub risk_percent: f64,
    pub min_quantity: u32,
    /// Hard liquidity cap.
    pub max_quantity: u32,
    /// Never commit more than this fraction of equity to one trade.
    pub max_allocation_percent: f64,
}

impl Default for SizingParams {
    fn default() -> Self {
        Self {
            risk_percent: 0.02,
            min_quantity: 1,
            max_quantity: 20,
            max_allocation_percent: 0.10,
        }
    }
}
