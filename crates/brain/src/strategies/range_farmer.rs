//! Range farmer. Sells a lunchtime iron condor when the tape is pinned to
//! the point of control with no trend.

use chrono::NaiveTime;

use condor_core::session::within_et_window;
use condor_core::types::{Bias, Regime};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const WINDOW_START: NaiveTime = match NaiveTime::from_hms_opt(13, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const WINDOW_END: NaiveTime = match NaiveTime::from_hms_opt(13, 5, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const MAX_ADX: f64 = 20.0;
const MAX_POC_DISTANCE: f64 = 2.0;

pub struct RangeFarmerGate;

impl StrategyGate for RangeFarmerGate {
    fn name(&self) -> &'static str {
        "RANGE_FARMER"
    }

    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
        if inputs.regime != Regime::LowVolChop {
            return None;
        }
        if !within_et_window(inputs.now, WINDOW_START, WINDOW_END) {
            return None;
        }
        let price = inputs.view.price?;
        let poc = inputs.view.poc?;
        let adx = inputs.view.adx?;
        if adx >= MAX_ADX || (price - poc).abs() >= MAX_POC_DISTANCE {
            return None;
        }

        Some(SignalIntent {
            symbol: inputs.view.symbol.clone(),
            bias: Bias::Neutral,
            structure: Structure::IronCondor,
            dte_target: 0,
            signal: "RANGE_FARM",
            origin: "RANGE_FARMER",
        })
    }
}
