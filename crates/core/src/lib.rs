//! Shared domain types, OCC symbol encoding, canonical signing and risk
//! configuration for the condor trading system.

pub mod config;
pub mod occ;
pub mod session;
pub mod signing;
pub mod types;

pub use config::{Constitution, RestrictedDates, SizingParams};
pub use types::{
    Bias, Candle, ContextValue, FlowState, LegSide, OptionType, PortfolioGreeks, Proposal,
    ProposalLeg, ProposalSide, Regime, StrategyKind, SymbolView,
};
