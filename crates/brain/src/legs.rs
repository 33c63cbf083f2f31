//! Turns a signal intent into concrete option legs with a net limit price.
//!
//! Quantities are scaled to the final trade size BEFORE the net price is
//! computed: SELL legs add `mid * qty`, BUY legs subtract, and the limit is
//! the absolute net rounded to the cent. The tracked position's entry price
//! is derived from that post-scaling limit, never from unit quantities.

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use condor_core::config::SizingParams;
use condor_core::types::{LegSide, OptionType, ProposalLeg, SymbolView};
use condor_broker::{BrokerApi, OptionContract};

use crate::sizing::contracts_for;
use crate::strategies::{SignalIntent, Structure};

/// Target absolute delta for the short leg of a credit spread.
const SHORT_DELTA_TARGET: f64 = 0.325;
/// Backspread legs: sell one near-the-money, buy two further out.
const BACKSPREAD_SHORT_DELTA: f64 = 0.40;
const BACKSPREAD_LONG_DELTA: f64 = 0.20;

/// Minimum acceptable net price, one tick under which fills are illusory.
const MIN_NET_PRICE_CENTS: i64 = 5;

/// A fully-sized trade ready to become a proposal.
#[derive(Debug, Clone)]
pub struct BuiltTrade {
    pub legs: Vec<ProposalLeg>,
    pub quantity: u32,
    /// Net credit/debit over the scaled quantities, absolute, cent-rounded.
    pub limit_price: Decimal,
    pub spread_width: Decimal,
}

pub struct LegBuilder<'a> {
    broker: &'a dyn BrokerApi,
    spread_width: Decimal,
}

impl<'a> LegBuilder<'a> {
    #[must_use]
    pub fn new(broker: &'a dyn BrokerApi, spread_width: f64) -> Self {
        Self {
            broker,
            spread_width: Decimal::from_f64(spread_width)
                .unwrap_or_else(|| Decimal::from(2)),
        }
    }

    /// Picks the listed expiration closest to the DTE target. Targets of 30
    /// prefer the 14 to 45 day band, short-dated targets the 1 to 14 band,
    /// with a 7 to 60 day fallback before giving up on preference.
    ///
    /// # Errors
    /// Propagates broker failures.
    pub async fn pick_expiration(
        &self,
        symbol: &str,
        target_dte: i64,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>> {
        let expirations = self.broker.option_expirations(symbol).await?;
        let mut dated: Vec<(i64, NaiveDate)> = expirations
            .into_iter()
            .map(|exp| ((exp - today).num_days(), exp))
            .filter(|(dte, _)| *dte >= 0)
            .collect();
        dated.sort_unstable();

        if dated.is_empty() {
            warn!(symbol, "no listed expirations");
            return Ok(None);
        }
        if target_dte == 0 {
            return Ok(dated.first().map(|(_, exp)| *exp));
        }

        let band = if target_dte >= 14 { (14, 45) } else { (1, 14) };
        let pick = |lo: i64, hi: i64| {
            dated
                .iter()
                .filter(|(dte, _)| *dte >= lo && *dte <= hi)
                .min_by_key(|(dte, _)| (dte - target_dte).abs())
                .map(|(_, exp)| *exp)
        };
        let best = pick(band.0, band.1)
            .or_else(|| pick(7, 60))
            .or_else(|| dated.iter().min_by_key(|(dte, _)| (dte - target_dte).abs()).map(|(_, e)| *e));
        if let Some(exp) = best {
            debug!(symbol, %exp, dte = (exp - today).num_days(), "selected expiration");
        }
        Ok(best)
    }

    /// Builds the sized legs for an intent. Returns `None` (not an error)
    /// when the chain cannot support the structure, e.g. on zero liquidity.
    ///
    /// # Errors
    /// Propagates broker failures.
    pub async fn build(
        &self,
        intent: &SignalIntent,
        view: &SymbolView,
        equity: Decimal,
        sizing: &SizingParams,
        today: NaiveDate,
    ) -> Result<Option<BuiltTrade>> {
        let Some(expiration) = self
            .pick_expiration(&intent.symbol, intent.dte_target, today)
            .await?
        else {
            return Ok(None);
        };
        let chain: Vec<OptionContract> = self
            .broker
            .option_chain(&intent.symbol, expiration)
            .await?
            .into_iter()
            .filter(|c| c.bid > Decimal::ZERO && c.ask > Decimal::ZERO)
            .collect();
        if chain.is_empty() {
            warn!(symbol = %intent.symbol, %expiration, "no liquid contracts in chain");
            return Ok(None);
        }

        let anchor = view.poc.or(view.price);
        let Some(skeleton) = select_structure(&chain, intent.structure, view.price, anchor, self.spread_width)
        else {
            warn!(symbol = %intent.symbol, structure = ?intent.structure, "no suitable strikes");
            return Ok(None);
        };

        let width = skeleton.width;
        let quantity = contracts_for(equity, width, sizing);

        let legs: Vec<ProposalLeg> = skeleton
            .legs
            .iter()
            .map(|(contract, side, unit)| ProposalLeg {
                symbol: contract.symbol.clone(),
                expiration: contract.expiration,
                strike: contract.strike,
                option_type: contract.option_type,
                quantity: unit * quantity,
                side: *side,
            })
            .collect();

        let Some(limit_price) = net_limit(&skeleton.legs, quantity) else {
            return Ok(None);
        };
        if limit_price < Decimal::new(MIN_NET_PRICE_CENTS, 2) {
            warn!(symbol = %intent.symbol, %limit_price, "net price below minimum tick");
            return Ok(None);
        }

        Ok(Some(BuiltTrade {
            legs,
            quantity,
            limit_price,
            spread_width: width,
        }))
    }
}

/// Unsized structure: contracts, sides and unit quantities (scaled later).
struct Skeleton {
    legs: Vec<(OptionContract, LegSide, u32)>,
    width: Decimal,
}

fn of_type(chain: &[OptionContract], t: OptionType) -> Vec<&OptionContract> {
    let mut contracts: Vec<&OptionContract> = chain.iter().filter(|c| c.option_type == t).collect();
    contracts.sort_by(|a, b| a.strike.cmp(&b.strike));
    contracts
}

fn by_delta<'c>(contracts: &[&'c OptionContract], target: f64) -> Option<&'c OptionContract> {
    contracts
        .iter()
        .filter(|c| c.greeks.is_some())
        .min_by(|a, b| {
            let da = (a.abs_delta() - target).abs();
            let db = (b.abs_delta() - target).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied()
}

fn by_strike<'c>(contracts: &[&'c OptionContract], target: Decimal) -> Option<&'c OptionContract> {
    contracts
        .iter()
        .min_by_key(|c| (c.strike - target).abs())
        .copied()
}

fn strike_below<'c>(contracts: &[&'c OptionContract], strike: Decimal, width: Decimal) -> Option<&'c OptionContract> {
    let below: Vec<&OptionContract> = contracts
        .iter()
        .filter(|c| c.strike < strike)
        .copied()
        .collect();
    by_strike(&below, strike - width)
}

fn strike_above<'c>(contracts: &[&'c OptionContract], strike: Decimal, width: Decimal) -> Option<&'c OptionContract> {
    let above: Vec<&OptionContract> = contracts
        .iter()
        .filter(|c| c.strike > strike)
        .copied()
        .collect();
    by_strike(&above, strike + width)
}

fn select_structure(
    chain: &[OptionContract],
    structure: Structure,
    price: Option<f64>,
    anchor: Option<f64>,
    width: Decimal,
) -> Option<Skeleton> {
    match structure {
        Structure::CreditSpread(t) => select_credit_spread(chain, t, price?, width),
        Structure::IronCondor => select_condor(chain, anchor?, width),
        Structure::IronButterfly => select_butterfly(chain, anchor?, width),
        Structure::RatioSpread(t) => select_backspread(chain, t),
    }
}

/// Short leg at the 30-35 delta target (2% OTM by strike when the chain has
/// no greeks), long leg one width further out.
fn select_credit_spread(
    chain: &[OptionContract],
    option_type: OptionType,
    price: f64,
    width: Decimal,
) -> Option<Skeleton> {
    let contracts = of_type(chain, option_type);
    let otm_fraction = match option_type {
        OptionType::Put => 0.98,
        OptionType::Call => 1.02,
    };
    let fallback_strike = Decimal::from_f64(price * otm_fraction)?;
    let short = by_delta(&contracts, SHORT_DELTA_TARGET)
        .or_else(|| by_strike(&contracts, fallback_strike))?;
    let long = match option_type {
        OptionType::Put => strike_below(&contracts, short.strike, width)?,
        OptionType::Call => strike_above(&contracts, short.strike, width)?,
    };
    let actual_width = (short.strike - long.strike).abs();
    Some(Skeleton {
        legs: vec![
            (short.clone(), LegSide::Sell, 1),
            (long.clone(), LegSide::Buy, 1),
        ],
        width: actual_width,
    })
}

/// Shorts straddle the anchor at one width, wings one width further out.
fn select_condor(chain: &[OptionContract], anchor: f64, width: Decimal) -> Option<Skeleton> {
    let anchor = Decimal::from_f64(anchor)?;
    let puts = of_type(chain, OptionType::Put);
    let calls = of_type(chain, OptionType::Call);

    let short_put = by_strike(&puts, anchor - width)?;
    let long_put = strike_below(&puts, short_put.strike, width)?;
    let short_call = by_strike(&calls, anchor + width)?;
    let long_call = strike_above(&calls, short_call.strike, width)?;
    if short_put.strike >= short_call.strike {
        return None;
    }
    let actual_width = (short_put.strike - long_put.strike).abs();
    Some(Skeleton {
        legs: vec![
            (short_put.clone(), LegSide::Sell, 1),
            (long_put.clone(), LegSide::Buy, 1),
            (short_call.clone(), LegSide::Sell, 1),
            (long_call.clone(), LegSide::Buy, 1),
        ],
        width: actual_width,
    })
}

/// Sells the straddle at the strike nearest the anchor, wings one width out.
fn select_butterfly(chain: &[OptionContract], anchor: f64, width: Decimal) -> Option<Skeleton> {
    let anchor = Decimal::from_f64(anchor)?;
    let puts = of_type(chain, OptionType::Put);
    let calls = of_type(chain, OptionType::Call);

    let body_put = by_strike(&puts, anchor)?;
    let body_call = by_strike(&calls, body_put.strike)?;
    if body_call.strike != body_put.strike {
        return None;
    }
    let wing_put = strike_below(&puts, body_put.strike, width)?;
    let wing_call = strike_above(&calls, body_call.strike, width)?;
    let actual_width = (body_put.strike - wing_put.strike).abs();
    Some(Skeleton {
        legs: vec![
            (body_put.clone(), LegSide::Sell, 1),
            (wing_put.clone(), LegSide::Buy, 1),
            (body_call.clone(), LegSide::Sell, 1),
            (wing_call.clone(), LegSide::Buy, 1),
        ],
        width: actual_width,
    })
}

/// 1x2 backspread: sell one ~40 delta, buy two ~20 delta further out.
fn select_backspread(chain: &[OptionContract], option_type: OptionType) -> Option<Skeleton> {
    let contracts = of_type(chain, option_type);
    let short = by_delta(&contracts, BACKSPREAD_SHORT_DELTA)?;
    let longs: Vec<&OptionContract> = contracts
        .iter()
        .filter(|c| match option_type {
            OptionType::Put => c.strike < short.strike,
            OptionType::Call => c.strike > short.strike,
        })
        .copied()
        .collect();
    let long = by_delta(&longs, BACKSPREAD_LONG_DELTA)?;
    let width = (short.strike - long.strike).abs();
    Some(Skeleton {
        legs: vec![
            (short.clone(), LegSide::Sell, 1),
            (long.clone(), LegSide::Buy, 2),
        ],
        width,
    })
}

/// Net price over scaled quantities: SELL adds, BUY subtracts. The limit is
/// the absolute net rounded to the cent; `None` when any leg has no mid.
fn net_limit(legs: &[(OptionContract, LegSide, u32)], quantity: u32) -> Option<Decimal> {
    let mut net = Decimal::ZERO;
    for (contract, side, unit) in legs {
        let mid = contract.mid()?;
        let scaled = Decimal::from(unit * quantity);
        match side {
            LegSide::Sell => net += mid * scaled,
            LegSide::Buy => net -= mid * scaled,
        }
    }
    Some(net.abs().round_dp(2))
}
