//! Position sizing under the 2% rule.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::debug;

use condor_core::config::SizingParams;

/// Contracts to trade for a given account equity and spread width.
///
/// `risk_amount = equity * risk_percent`, the max loss per contract is the
/// spread width times the option multiplier, and the raw quantity is floored
/// from their ratio. The result is clamped to the configured bounds and to a
/// total allocation cap. Worst-case loss is used: the credit received is not
/// netted against the width.
#[must_use]
pub fn contracts_for(equity: Decimal, spread_width: Decimal, params: &SizingParams) -> u32 {
    if equity <= Decimal::ZERO || spread_width <= Decimal::ZERO {
        return params.min_quantity;
    }

    let risk_percent = Decimal::from_f64(params.risk_percent).unwrap_or_default();
    let max_allocation = Decimal::from_f64(params.max_allocation_percent).unwrap_or_default();

    let risk_amount = equity * risk_percent;
    let max_loss_per_contract = spread_width * Decimal::from(100);

    let mut quantity = (risk_amount / max_loss_per_contract)
        .floor()
        .to_u32()
        .unwrap_or(0);

    if quantity > params.max_quantity {
        debug!(quantity, cap = params.max_quantity, "quantity capped at hard limit");
        quantity = params.max_quantity;
    }

    let allocation_cap = (equity * max_allocation / max_loss_per_contract)
        .floor()
        .to_u32()
        .unwrap_or(0);
    if quantity > allocation_cap {
        debug!(quantity, allocation_cap, "quantity capped by allocation limit");
        quantity = allocation_cap;
    }

    quantity.max(params.min_quantity)
}
