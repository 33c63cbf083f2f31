//! Multi-leg order construction and form encoding.
//!
//! The broker accepts one atomic multi-leg order as a URL-encoded form with
//! indexed fields: `option_symbol[0..n-1]`, `side[0..n-1]`,
//! `quantity[0..n-1]`, plus `class=multileg`, the underlying `symbol`, the
//! order `type` (`credit` for opens, `debit` for closes), `duration=day` and
//! the net limit `price`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use condor_core::types::{LegSide, ProposalSide};

/// Broker leg side after open/close inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerLegSide {
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
}

impl BrokerLegSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BuyToOpen => "buy_to_open",
            Self::SellToOpen => "sell_to_open",
            Self::BuyToClose => "buy_to_close",
            Self::SellToClose => "sell_to_close",
        }
    }
}

/// Maps a proposal leg side to the broker side. CLOSE inverts direction:
/// legs that were sold are bought back and vice versa.
#[must_use]
pub const fn broker_side(proposal_side: ProposalSide, leg_side: LegSide) -> BrokerLegSide {
    match (proposal_side, leg_side) {
        (ProposalSide::Open, LegSide::Sell) => BrokerLegSide::SellToOpen,
        (ProposalSide::Open, LegSide::Buy) => BrokerLegSide::BuyToOpen,
        (ProposalSide::Close, LegSide::Sell) => BrokerLegSide::BuyToClose,
        (ProposalSide::Close, LegSide::Buy) => BrokerLegSide::SellToClose,
    }
}

/// Order price type. Opens collect credit; closes pay debit.
#[must_use]
pub const fn order_type(proposal_side: ProposalSide) -> &'static str {
    match proposal_side {
        ProposalSide::Open => "credit",
        ProposalSide::Close => "debit",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultilegLeg {
    pub option_symbol: String,
    pub side: BrokerLegSide,
    pub quantity: u32,
}

/// One atomic multi-leg order with a net limit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultilegOrder {
    /// Underlying symbol.
    pub symbol: String,
    pub order_type: String,
    pub price: Decimal,
    pub legs: Vec<MultilegLeg>,
}

impl MultilegOrder {
    /// Serializes into the indexed form-field pairs the broker expects.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("class".to_string(), "multileg".to_string()),
            ("symbol".to_string(), self.symbol.clone()),
            ("type".to_string(), self.order_type.clone()),
            ("duration".to_string(), "day".to_string()),
            ("price".to_string(), self.price.round_dp(2).to_string()),
        ];
        for (i, leg) in self.legs.iter().enumerate() {
            fields.push((format!("option_symbol[{i}]"), leg.option_symbol.clone()));
            fields.push((format!("side[{i}]"), leg.side.as_str().to_string()));
            fields.push((format!("quantity[{i}]"), leg.quantity.to_string()));
        }
        fields
    }
}
