//! Ratio hedge. Buys cheap convexity with a 1x2 put backspread when implied
//! vol is near the floor. Checked on the half hour only.

use chrono::Timelike;

use condor_core::session::to_eastern;
use condor_core::types::{Bias, OptionType, Regime};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const MAX_IV_RANK: f64 = 20.0;

pub struct RatioHedgeGate;

impl StrategyGate for RatioHedgeGate {
    fn name(&self) -> &'static str {
        "RATIO_HEDGE"
    }

    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
        // Any regime qualifies; the engine has already excluded the unknown
        // regime before gates run.
        let _ = inputs.regime;
        if to_eastern(inputs.now).minute() != 30 {
            return None;
        }
        let iv_rank = inputs.view.iv_rank?;
        if iv_rank >= MAX_IV_RANK {
            return None;
        }

        Some(SignalIntent {
            symbol: inputs.view.symbol.clone(),
            bias: Bias::Neutral,
            structure: Structure::RatioSpread(OptionType::Put),
            dte_target: 30,
            signal: "RATIO_HEDGE_CHEAP_VOL",
            origin: "RATIO_HEDGE",
        })
    }
}
