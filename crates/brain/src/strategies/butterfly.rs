//! Iron butterfly. Sells the straddle body at the point of control when
//! implied vol is rich and the tape is pinned.

use chrono::NaiveTime;

use condor_core::session::within_et_window;
use condor_core::types::{Bias, Regime};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const WINDOW_START: NaiveTime = match NaiveTime::from_hms_opt(12, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const WINDOW_END: NaiveTime = match NaiveTime::from_hms_opt(13, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const MIN_IV_RANK: f64 = 50.0;
const MAX_POC_DISTANCE: f64 = 2.0;

pub struct IronButterflyGate;

impl StrategyGate for IronButterflyGate {
    fn name(&self) -> &'static str {
        "IRON_BUTTERFLY"
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
        let iv_rank = inputs.view.iv_rank?;
        if iv_rank <= MIN_IV_RANK || (price - poc).abs() >= MAX_POC_DISTANCE {
            return None;
        }

        Some(SignalIntent {
            symbol: inputs.view.symbol.clone(),
            bias: Bias::Neutral,
            structure: Structure::IronButterfly,
            dte_target: 0,
            signal: "BUTTERFLY_PIN",
            origin: "IRON_BUTTERFLY",
        })
    }
}
