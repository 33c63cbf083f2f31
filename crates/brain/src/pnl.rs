//! Mark-to-market P&L for tracked positions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use condor_core::types::{LegSide, ProposalLeg, StrategyKind};
use condor_broker::Quote;

const MULTIPLIER: i64 = 100;

/// Dollar cost of unwinding the position at current mids.
///
/// SELL legs are bought back (positive cost); BUY legs are sold (negative).
/// A negative total means the position closes for a credit, which is valid
/// and must be preserved. `None` when any leg lacks a two-sided market.
#[must_use]
pub fn cost_to_close(legs: &[ProposalLeg], quotes: &HashMap<String, Quote>) -> Option<Decimal> {
    let mut total = Decimal::ZERO;
    for leg in legs {
        let mid = quotes.get(&leg.symbol)?.mid()?;
        let notional = mid * Decimal::from(leg.quantity) * Decimal::from(MULTIPLIER);
        match leg.side {
            LegSide::Sell => total += notional,
            LegSide::Buy => total -= notional,
        }
    }
    Some(total)
}

/// Net market mid for the legs in order-price units (no multiplier), used by
/// the order chaser to compare against submitted limits.
#[must_use]
pub fn net_mid(legs: &[ProposalLeg], quotes: &HashMap<String, Quote>) -> Option<Decimal> {
    let mut net = Decimal::ZERO;
    for leg in legs {
        let mid = quotes.get(&leg.symbol)?.mid()?;
        let scaled = mid * Decimal::from(leg.quantity);
        match leg.side {
            LegSide::Sell => net += scaled,
            LegSide::Buy => net -= scaled,
        }
    }
    Some(net.abs())
}

/// Dollar P&L given the entry and the current cost to close.
#[must_use]
pub fn pnl_dollars(strategy: StrategyKind, entry_price: Decimal, cost_to_close: Decimal) -> Decimal {
    if strategy.is_credit() {
        // Credit received up front; closing for a credit caps profit at the
        // full entry credit.
        entry_price - cost_to_close.max(Decimal::ZERO)
    } else if cost_to_close >= Decimal::ZERO {
        entry_price - cost_to_close
    } else {
        entry_price + cost_to_close.abs()
    }
}

/// P&L as a percentage of the entry price.
#[must_use]
pub fn pnl_percent(pnl: Decimal, entry_price: Decimal) -> f64 {
    if entry_price == Decimal::ZERO {
        return 0.0;
    }
    (pnl / entry_price * Decimal::from(100))
        .to_f64()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use condor_core::types::OptionType;
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, bid: Decimal, ask: Decimal) -> (String, Quote) {
        (
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                bid,
                ask,
                last: None,
                greeks: None,
            },
        )
    }

    fn leg(symbol: &str, side: LegSide, quantity: u32) -> ProposalLeg {
        ProposalLeg {
            symbol: symbol.to_string(),
            expiration: chrono::NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
            strike: dec!(428),
            option_type: OptionType::Put,
            quantity,
            side,
        }
    }

    #[test]
    fn cost_to_close_signs_by_side() {
        let quotes: HashMap<String, Quote> = [
            quote("SHORT", dec!(0.50), dec!(0.54)),
            quote("LONG", dec!(0.20), dec!(0.24)),
        ]
        .into_iter()
        .collect();
        let legs = vec![leg("SHORT", LegSide::Sell, 10), leg("LONG", LegSide::Buy, 10)];
        // Buy back short at 0.52, sell long at 0.22: (0.52 - 0.22) * 10 * 100.
        assert_eq!(cost_to_close(&legs, &quotes), Some(dec!(300)));
    }

    #[test]
    fn cost_to_close_can_be_negative() {
        let quotes: HashMap<String, Quote> = [
            quote("SHORT", dec!(0.10), dec!(0.14)),
            quote("LONG", dec!(0.40), dec!(0.44)),
        ]
        .into_iter()
        .collect();
        let legs = vec![leg("SHORT", LegSide::Sell, 1), leg("LONG", LegSide::Buy, 1)];
        // Short costs 12 to buy back, long sells for 42: net -30 credit.
        assert_eq!(cost_to_close(&legs, &quotes), Some(dec!(-30)));
    }

    #[test]
    fn missing_quote_aborts_the_mark() {
        let quotes: HashMap<String, Quote> =
            [quote("SHORT", dec!(0.50), dec!(0.54))].into_iter().collect();
        let legs = vec![leg("SHORT", LegSide::Sell, 1), leg("LONG", LegSide::Buy, 1)];
        assert_eq!(cost_to_close(&legs, &quotes), None);
    }

    #[test]
    fn credit_pnl_floors_cost_at_zero() {
        // Entered for a $280 credit; closing now costs $100.
        let pnl = pnl_dollars(StrategyKind::CreditSpread, dec!(280), dec!(100));
        assert_eq!(pnl, dec!(180));
        // Closing for a credit realizes the full entry credit.
        let pnl = pnl_dollars(StrategyKind::CreditSpread, dec!(280), dec!(-40));
        assert_eq!(pnl, dec!(280));
    }

    #[test]
    fn debit_close_for_credit_adds_magnitudes() {
        // Ratio spread entered at a $120 debit, closing for a $30 credit.
        let pnl = pnl_dollars(StrategyKind::RatioSpread, dec!(120), dec!(-30));
        assert_eq!(pnl, dec!(150));
        assert!((pnl_percent(pnl, dec!(120)) - 125.0).abs() < 1e-9);
    }

    #[test]
    fn debit_close_for_debit_subtracts() {
        let pnl = pnl_dollars(StrategyKind::RatioSpread, dec!(120), dec!(80));
        assert_eq!(pnl, dec!(40));
    }

    #[test]
    fn pnl_percent_of_zero_entry_is_zero() {
        assert_eq!(pnl_percent(dec!(50), Decimal::ZERO), 0.0);
    }

    #[test]
    fn net_mid_is_absolute_per_quantity_units() {
        let quotes: HashMap<String, Quote> = [
            quote("SHORT", dec!(0.50), dec!(0.54)),
            quote("LONG", dec!(0.20), dec!(0.24)),
        ]
        .into_iter()
        .collect();
        let legs = vec![leg("SHORT", LegSide::Sell, 10), leg("LONG", LegSide::Buy, 10)];
        assert_eq!(net_mid(&legs, &quotes), Some(dec!(3.00)));
    }
}
