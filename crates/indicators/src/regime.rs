//! Market-regime classification.
//!
//! Deterministic mapping from VIX and trend strength (SPY ADX) to a regime.
//! Strategies must refuse to open on `InsufficientData`.

use condor_core::types::Regime;

/// VIX at or above this forces `EventRisk` regardless of trend.
pub const VIX_EVENT_RISK: f64 = 30.0;
/// VIX at or above this with a strong trend marks volatility expansion.
pub const VIX_EXPANSION: f64 = 22.0;
const ADX_EXPANSION: f64 = 25.0;
const ADX_TRENDING: f64 = 20.0;

/// Classifies the current regime.
///
/// `event_day` is true when today's date is in the restricted calendar; it
/// short-circuits everything else, including missing data.
#[must_use]
pub fn classify(vix: Option<f64>, adx_spy: Option<f64>, event_day: bool) -> Regime {
    if event_day {
        return Regime::EventRisk;
    }
    let (Some(vix), Some(adx)) = (vix, adx_spy) else {
        return Regime::InsufficientData;
    };
    if vix >= VIX_EVENT_RISK {
        Regime::EventRisk
    } else if vix >= VIX_EXPANSION && adx >= ADX_EXPANSION {
        Regime::HighVolExpansion
    } else if adx >= ADX_TRENDING && vix < VIX_EXPANSION {
        Regime::Trending
    } else {
        Regime::LowVolChop
    }
}
