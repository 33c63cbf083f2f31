//! Broker-facing data types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use condor_core::types::OptionType;

/// Option greeks as reported by the broker chain/quote feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    /// Mid implied volatility.
    pub mid_iv: f64,
}

/// A quote for an equity or option symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Option<Decimal>,
    pub greeks: Option<Greeks>,
}

impl Quote {
    /// Bid/ask midpoint; absent when either side is missing or zero.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            Some((self.bid + self.ask) / Decimal::from(2))
        } else {
            None
        }
    }
}

/// One contract row from an option chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    /// OCC symbol.
    pub symbol: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiration: NaiveDate,
    pub bid: Decimal,
    pub ask: Decimal,
    pub greeks: Option<Greeks>,
}

impl OptionContract {
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            Some((self.bid + self.ask) / Decimal::from(2))
        } else {
            None
        }
    }

    /// Absolute delta, 0 when greeks are missing.
    #[must_use]
    pub fn abs_delta(&self) -> f64 {
        self.greeks.map_or(0.0, |g| g.delta.abs())
    }
}

/// Account balances. Only total equity matters to the risk rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub total_equity: Decimal,
}

/// A broker-held position. The symbol is an OCC option symbol for legs, or
/// a plain equity symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    /// Signed: negative for short legs.
    pub quantity: i64,
    pub cost_basis: Decimal,
    pub date_acquired: DateTime<Utc>,
}

/// Broker acknowledgement for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
}

/// Lifecycle state of a working order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Still chaseable: submitted but not yet terminal.
    #[must_use]
    pub const fn is_working(self) -> bool {
        matches!(self, Self::Pending | Self::Open | Self::PartiallyFilled)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_working()
    }

    /// Parses a broker status string, treating unknown values as pending so
    /// the chaser keeps watching rather than abandoning the order.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "open" => Self::Open,
            "partially_filled" | "partial" => Self::PartiallyFilled,
            "filled" | "executed" => Self::Filled,
            "canceled" | "cancelled" => Self::Canceled,
            "rejected" | "error" => Self::Rejected,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }
}
