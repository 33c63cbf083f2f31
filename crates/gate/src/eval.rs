//! Constitution checks.
//!
//! Each check returns `Err(reason)` with the exact human-readable rejection
//! reason. The actor applies them in the mandated order; the first failure
//! wins. Checks here are pure; anything needing broker state stays in the
//! actor.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use condor_core::config::Constitution;
use condor_core::types::{Bias, FlowState, Proposal, ProposalSide, StrategyKind};

use crate::ledger::PositionMetadata;

pub const MAX_CONTEXT_VIX: f64 = 28.0;

pub fn check_not_locked(locked: bool, reason: Option<&str>) -> Result<(), String> {
    if locked {
        return Err(match reason {
            Some(why) => format!("System is locked: {why}"),
            None => "System is locked".to_string(),
        });
    }
    Ok(())
}

/// A proposal older than the staleness threshold is rejected; exactly at
/// the threshold is still fresh.
pub fn check_staleness(now_ms: i64, proposal_ms: i64, stale_ms: i64) -> Result<(), String> {
    let age = now_ms - proposal_ms;
    if age > stale_ms {
        return Err(format!("Stale proposal: {age}ms old exceeds {stale_ms}ms"));
    }
    Ok(())
}

pub fn check_universe(constitution: &Constitution, proposal: &Proposal) -> Result<(), String> {
    if !constitution.symbol_allowed(&proposal.symbol) {
        return Err(format!("Symbol {} is not in the allowed universe", proposal.symbol));
    }
    // CLOSE may unwind any shape the account holds.
    if proposal.side == ProposalSide::Open && !constitution.strategy_allowed(proposal.strategy) {
        return Err(format!("Strategy {} is not allowed", proposal.strategy));
    }
    Ok(())
}

pub fn check_price(proposal: &Proposal) -> Result<(), String> {
    if proposal.price <= Decimal::ZERO {
        return Err("Price must be positive; market orders are not permitted".to_string());
    }
    Ok(())
}

/// Leg-count and shape validation for opens.
pub fn check_structure(proposal: &Proposal) -> Result<(), String> {
    if proposal.side != ProposalSide::Open {
        return Ok(());
    }
    let legs = proposal.legs.len();
    match proposal.strategy {
        StrategyKind::CreditSpread if legs != 2 => {
            Err(format!("CREDIT_SPREAD requires exactly 2 legs, got {legs}"))
        }
        StrategyKind::IronCondor if legs != 4 => {
            Err(format!("IRON_CONDOR requires exactly 4 legs, got {legs}"))
        }
        StrategyKind::IronButterfly if legs != 4 => {
            Err(format!("IRON_BUTTERFLY requires exactly 4 legs, got {legs}"))
        }
        StrategyKind::RatioSpread => {
            if legs != 2 {
                return Err(format!("RATIO_SPREAD requires exactly 2 legs, got {legs}"));
            }
            if proposal.legs[0].quantity == proposal.legs[1].quantity {
                return Err("RATIO_SPREAD legs must have unequal quantities".to_string());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn check_dte(
    constitution: &Constitution,
    proposal: &Proposal,
    today: NaiveDate,
) -> Result<(), String> {
    if proposal.side != ProposalSide::Open {
        return Ok(());
    }
    let Some(dte) = proposal.first_leg_dte(today) else {
        return Err("Proposal has no legs".to_string());
    };
    if dte < constitution.min_dte || dte > constitution.max_dte {
        return Err(format!(
            "DTE {dte} outside allowed range [{}, {}]",
            constitution.min_dte, constitution.max_dte
        ));
    }
    Ok(())
}

pub fn check_calendar(
    restricted: &[NaiveDate],
    proposal: &Proposal,
    today: NaiveDate,
) -> Result<(), String> {
    if proposal.side == ProposalSide::Open && restricted.contains(&today) {
        return Err(format!("Calendar lock: {today} is a restricted date"));
    }
    Ok(())
}

/// After the forced end-of-day close (when configured) no new positions
/// open; closes stay allowed so the book can still flatten.
pub fn check_forced_eod(
    constitution: &Constitution,
    proposal: &Proposal,
    now_et: chrono::NaiveTime,
) -> Result<(), String> {
    if proposal.side != ProposalSide::Open {
        return Ok(());
    }
    if let Some(cutoff) = constitution.force_eod_close_et {
        if now_et >= cutoff {
            return Err(format!(
                "Past the forced end-of-day close at {} ET",
                cutoff.format("%H:%M")
            ));
        }
    }
    Ok(())
}

/// OPEN context must carry a sane VIX and a known flow state.
pub fn check_context(proposal: &Proposal) -> Result<(), String> {
    if proposal.side != ProposalSide::Open {
        return Ok(());
    }
    let Some(vix) = proposal.context_vix() else {
        return Err("Context VIX is missing".to_string());
    };
    if vix > MAX_CONTEXT_VIX {
        return Err(format!("VIX {vix:.2} above the {MAX_CONTEXT_VIX:.0} entry cap"));
    }
    if proposal.context_flow_state() == FlowState::Unknown {
        return Err("Flow state is unknown".to_string());
    }
    Ok(())
}

/// Bias declared by the proposal, defaulting to neutral.
#[must_use]
pub fn proposal_bias(proposal: &Proposal) -> Bias {
    proposal
        .context
        .get("trend_state")
        .and_then(condor_core::types::ContextValue::as_text)
        .and_then(|s| Bias::from_str(s).ok())
        .unwrap_or(Bias::Neutral)
}

/// Same-bias positions already open in each correlation group the symbol
/// belongs to. Neutral positions never correlate.
pub fn check_correlation(
    constitution: &Constitution,
    metadata: &[(String, PositionMetadata)],
    symbol: &str,
    bias: Bias,
) -> Result<(), String> {
    if bias == Bias::Neutral {
        return Ok(());
    }
    for group in constitution.groups_for(symbol) {
        let members = &constitution.correlation_groups[group];
        let count = metadata
            .iter()
            .filter(|(_, m)| m.bias == bias && members.iter().any(|s| s == &m.symbol))
            .count();
        if count >= constitution.max_correlated_positions {
            return Err(format!(
                "Correlation guard: {count} {bias} positions already open in group {group} (max {})",
                constitution.max_correlated_positions
            ));
        }
    }
    Ok(())
}

pub fn check_concentration(
    constitution: &Constitution,
    metadata: &[(String, PositionMetadata)],
    symbol: &str,
) -> Result<(), String> {
    let count = metadata.iter().filter(|(_, m)| m.symbol == symbol).count();
    if count >= constitution.max_concentration_per_symbol {
        return Err(format!(
            "Concentration: {count} open positions on {symbol} (max {})",
            constitution.max_concentration_per_symbol
        ));
    }
    Ok(())
}
