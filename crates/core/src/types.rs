//! Shared domain types for the brain and the gate.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Put or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Put,
    Call,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => write!(f, "PUT"),
            Self::Call => write!(f, "CALL"),
        }
    }
}

/// Leg side relative to the underlying position. The gate inverts these
/// into broker open/close sides at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegSide {
    Sell,
    Buy,
}

/// Whether a proposal enters a new position or exits an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalSide {
    Open,
    Close,
}

impl std::fmt::Display for ProposalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// Directional intent of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

impl std::str::FromStr for Bias {
    type Err = ();

    /// Case-insensitive; anything unrecognized is an error so callers choose
    /// their own default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bullish" => Ok(Self::Bullish),
            "bearish" => Ok(Self::Bearish),
            "neutral" => Ok(Self::Neutral),
            _ => Err(()),
        }
    }
}

/// The order structure a strategy emits.
///
/// `ManualRecovery` is never proposed; it is assigned to positions discovered
/// at reconciliation that the brain did not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    CreditSpread,
    IronCondor,
    IronButterfly,
    RatioSpread,
    CalendarSpread,
    ManualRecovery,
}

impl StrategyKind {
    /// Credit structures realise profit when the cost to close falls below
    /// the credit received. Debit structures profit when value rises.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(
            self,
            Self::CreditSpread | Self::IronCondor | Self::IronButterfly | Self::ManualRecovery
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreditSpread => "CREDIT_SPREAD",
            Self::IronCondor => "IRON_CONDOR",
            Self::IronButterfly => "IRON_BUTTERFLY",
            Self::RatioSpread => "RATIO_SPREAD",
            Self::CalendarSpread => "CALENDAR_SPREAD",
            Self::ManualRecovery => "MANUAL_RECOVERY",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT_SPREAD" => Ok(Self::CreditSpread),
            "IRON_CONDOR" => Ok(Self::IronCondor),
            "IRON_BUTTERFLY" => Ok(Self::IronButterfly),
            "RATIO_SPREAD" => Ok(Self::RatioSpread),
            "CALENDAR_SPREAD" => Ok(Self::CalendarSpread),
            "MANUAL_RECOVERY" => Ok(Self::ManualRecovery),
            _ => Err(()),
        }
    }
}

/// Market-regime classification. Strategies consult this before firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Trending,
    LowVolChop,
    HighVolExpansion,
    EventRisk,
    InsufficientData,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trending => "TRENDING",
            Self::LowVolChop => "LOW_VOL_CHOP",
            Self::HighVolExpansion => "HIGH_VOL_EXPANSION",
            Self::EventRisk => "EVENT_RISK",
            Self::InsufficientData => "INSUFFICIENT_DATA",
        };
        write!(f, "{s}")
    }
}

/// Categorical flow signal derived from price vs VWAP and volume velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    RiskOn,
    RiskOff,
    Neutral,
    Unknown,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RiskOn => "RISK_ON",
            Self::RiskOff => "RISK_OFF",
            Self::Neutral => "NEUTRAL",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// A closed 1-minute bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One option leg of a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalLeg {
    /// OCC option symbol, e.g. `SPY240116P00416000`.
    pub symbol: String,
    pub expiration: NaiveDate,
    pub strike: Decimal,
    #[serde(rename = "type")]
    pub option_type: OptionType,
    pub quantity: u32,
    pub side: LegSide,
}

/// Semi-open context value. The gate interprets `vix` and `flow_state` and
/// stores everything else verbatim in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl ContextValue {
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A signed trade request from the brain to the gate.
///
/// The signature covers the canonical JSON form of every other field; see
/// [`crate::signing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub timestamp_ms: i64,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub side: ProposalSide,
    pub quantity: u32,
    /// Net credit/debit limit for the full-quantity trade. Always positive;
    /// the side of the money is implied by the structure.
    pub price: Decimal,
    pub legs: Vec<ProposalLeg>,
    pub context: BTreeMap<String, ContextValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Proposal {
    /// VIX carried in the proposal context, if present.
    #[must_use]
    pub fn context_vix(&self) -> Option<f64> {
        self.context.get("vix").and_then(ContextValue::as_number)
    }

    /// Flow state carried in the proposal context. Missing means unknown.
    #[must_use]
    pub fn context_flow_state(&self) -> FlowState {
        match self
            .context
            .get("flow_state")
            .and_then(ContextValue::as_text)
        {
            Some(s) if s.eq_ignore_ascii_case("risk_on") => FlowState::RiskOn,
            Some(s) if s.eq_ignore_ascii_case("risk_off") => FlowState::RiskOff,
            Some(s) if s.eq_ignore_ascii_case("neutral") => FlowState::Neutral,
            _ => FlowState::Unknown,
        }
    }

    /// Days from `today` to the first leg's expiration.
    #[must_use]
    pub fn first_leg_dte(&self, today: NaiveDate) -> Option<i64> {
        self.legs
            .first()
            .map(|leg| (leg.expiration - today).num_days())
    }
}

/// Portfolio-level greeks, summed across tracked legs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    pub delta: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Per-symbol market view carried in heartbeats and consumed by strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolView {
    pub symbol: String,
    pub price: Option<f64>,
    pub sma_200: Option<f64>,
    pub rsi_14: Option<f64>,
    pub rsi_2: Option<f64>,
    pub adx: Option<f64>,
    pub vwap: Option<f64>,
    pub volume_velocity: f64,
    pub poc: Option<f64>,
    pub vah: Option<f64>,
    pub val: Option<f64>,
    pub iv_rank: Option<f64>,
    pub candle_count: usize,
    pub flow_state: FlowState,
    /// High/low of the 09:30 to 10:00 ET opening range, once complete.
    pub opening_range: Option<(f64, f64)>,
    pub is_warm: bool,
}
