//! Exit rule evaluation for tracked positions.
//!
//! Three rule families: the 0DTE scalper's fast RSI reversion, directional
//! credit spreads with a trailing stop and trend break, and the neutral set
//! shared by condors, butterflies and manually recovered positions. A
//! 15:55 ET close-all overrides everything.

use chrono::{DateTime, NaiveTime, Utc};

use condor_core::session::within_et_window;
use condor_core::types::{Bias, SymbolView};

use crate::positions::TrackedPosition;

const EOD_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(15, 55, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const SESSION_END: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

const SCALPER_ORIGIN: &str = "SCALPER_0DTE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    RsiReversion,
    ScalperStop,
    TrailingStop,
    TrendBreak,
    ProfitTarget,
    MaxLoss,
    AdxSpike,
    EndOfDay,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RsiReversion => "rsi_reversion",
            Self::ScalperStop => "scalper_stop",
            Self::TrailingStop => "trailing_stop",
            Self::TrendBreak => "trend_break",
            Self::ProfitTarget => "profit_target",
            Self::MaxLoss => "max_loss",
            Self::AdxSpike => "adx_spike",
            Self::EndOfDay => "end_of_day",
        };
        write!(f, "{s}")
    }
}

/// Decides whether an OPEN position should be closed now.
#[must_use]
pub fn evaluate_exit(
    position: &TrackedPosition,
    pnl_pct: f64,
    view: &SymbolView,
    now: DateTime<Utc>,
) -> Option<ExitReason> {
    if within_et_window(now, EOD_CLOSE, SESSION_END) {
        return Some(ExitReason::EndOfDay);
    }

    if position.origin == SCALPER_ORIGIN {
        if let Some(rsi) = view.rsi_14 {
            let reverted = match position.bias {
                Bias::Bullish => rsi > 60.0,
                Bias::Bearish => rsi < 40.0,
                Bias::Neutral => false,
            };
            if reverted {
                return Some(ExitReason::RsiReversion);
            }
        }
        if pnl_pct <= -20.0 {
            return Some(ExitReason::ScalperStop);
        }
        return None;
    }

    if position.bias == Bias::Neutral {
        if view.adx.is_some_and(|adx| adx > 30.0) {
            return Some(ExitReason::AdxSpike);
        }
        if pnl_pct >= 50.0 {
            return Some(ExitReason::ProfitTarget);
        }
        if pnl_pct <= -100.0 {
            return Some(ExitReason::MaxLoss);
        }
        return None;
    }

    // Directional credit spreads.
    if position.highest_pnl_seen >= 30.0 && position.highest_pnl_seen - pnl_pct >= 10.0 {
        return Some(ExitReason::TrailingStop);
    }
    if let (Some(price), Some(sma)) = (view.price, view.sma_200) {
        let broken = match position.bias {
            Bias::Bullish => price < sma,
            Bias::Bearish => price > sma,
            Bias::Neutral => false,
        };
        if broken {
            return Some(ExitReason::TrendBreak);
        }
    }
    if pnl_pct >= 80.0 {
        return Some(ExitReason::ProfitTarget);
    }
    if pnl_pct <= -100.0 {
        return Some(ExitReason::MaxLoss);
    }
    None
}
