//! Weekend warrior. Sells a trend-aligned credit spread into the Friday
//! close to harvest weekend theta, but only on a calm VIX.

use chrono::{Datelike, NaiveTime, Weekday};

use condor_core::session::{to_eastern, within_et_window};
use condor_core::types::{Bias, OptionType};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const WINDOW_START: NaiveTime = match NaiveTime::from_hms_opt(15, 55, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const WINDOW_END: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const MAX_VIX: f64 = 25.0;

pub struct WeekendWarriorGate;

impl StrategyGate for WeekendWarriorGate {
    fn name(&self) -> &'static str {
        "WEEKEND_WARRIOR"
    }

    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
        if to_eastern(inputs.now).weekday() != Weekday::Fri {
            return None;
        }
        if !within_et_window(inputs.now, WINDOW_START, WINDOW_END) {
            return None;
        }
        if inputs.vix? >= MAX_VIX {
            return None;
        }
        let price = inputs.view.price?;
        let sma = inputs.view.sma_200?;

        let (bias, option_type, signal) = if price > sma {
            (Bias::Bullish, OptionType::Put, "WEEKEND_BULL_PUT")
        } else {
            (Bias::Bearish, OptionType::Call, "WEEKEND_BEAR_CALL")
        };
        Some(SignalIntent {
            symbol: inputs.view.symbol.clone(),
            bias,
            structure: Structure::CreditSpread(option_type),
            dte_target: 7,
            signal,
            origin: "WEEKEND_WARRIOR",
        })
    }
}
