//! Per-strategy signal gates.
//!
//! Every gate is a pure check over a [`SymbolView`] snapshot plus the regime
//! and clock; gates never do I/O. The engine applies the common
//! preconditions (warm-up, known regime, throttles) before asking gates to
//! evaluate, and turns an emitted [`SignalIntent`] into legs and a proposal.

use chrono::{DateTime, Utc};

use condor_core::types::{Bias, OptionType, Regime, StrategyKind, SymbolView};

mod butterfly;
mod orb;
mod range_farmer;
mod ratio_hedge;
mod scalper;
mod trend;
mod weekend;

pub use butterfly::IronButterflyGate;
pub use orb::OrbGate;
pub use range_farmer::RangeFarmerGate;
pub use ratio_hedge::RatioHedgeGate;
pub use scalper::ScalperGate;
pub use trend::TrendEngineGate;
pub use weekend::WeekendWarriorGate;

/// Everything a gate may look at for one evaluation.
pub struct GateInputs<'a> {
    pub view: &'a SymbolView,
    pub regime: Regime,
    pub vix: Option<f64>,
    pub now: DateTime<Utc>,
}

/// The shape of the trade a strategy wants to put on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    CreditSpread(OptionType),
    IronCondor,
    IronButterfly,
    RatioSpread(OptionType),
}

impl Structure {
    #[must_use]
    pub const fn strategy_kind(self) -> StrategyKind {
        match self {
            Self::CreditSpread(_) => StrategyKind::CreditSpread,
            Self::IronCondor => StrategyKind::IronCondor,
            Self::IronButterfly => StrategyKind::IronButterfly,
            Self::RatioSpread(_) => StrategyKind::RatioSpread,
        }
    }
}

/// A trade a gate wants the engine to propose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalIntent {
    pub symbol: String,
    pub bias: Bias,
    pub structure: Structure,
    /// Days-to-expiration target; 0 means same-day or nearest listed.
    pub dte_target: i64,
    /// Replay-guard key; identical signals are suppressed for 300 s.
    pub signal: &'static str,
    /// Emitting gate, recorded on the tracked position to select exit rules.
    pub origin: &'static str,
}

pub trait StrategyGate: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent>;
}

/// The full strategy roster in evaluation order.
#[must_use]
pub fn default_gates() -> Vec<Box<dyn StrategyGate>> {
    vec![
        Box::new(OrbGate),
        Box::new(ScalperGate),
        Box::new(TrendEngineGate),
        Box::new(RangeFarmerGate),
        Box::new(IronButterflyGate),
        Box::new(RatioHedgeGate),
        Box::new(WeekendWarriorGate),
    ]
}
