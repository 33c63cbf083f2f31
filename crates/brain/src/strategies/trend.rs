//! Trend engine. Sells ~30 DTE credit spreads on pullbacks with structure
//! and flow confirmation.

use condor_core::types::{Bias, FlowState, OptionType, Regime};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const RSI_PULLBACK: f64 = 30.0;
const RSI_RALLY: f64 = 70.0;

pub struct TrendEngineGate;

impl StrategyGate for TrendEngineGate {
    fn name(&self) -> &'static str {
        "TREND_ENGINE"
    }

    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
        if inputs.regime != Regime::Trending {
            return None;
        }
        let view = inputs.view;
        let price = view.price?;
        let poc = view.poc?;
        let rsi = view.rsi_14?;
        if matches!(view.flow_state, FlowState::Neutral | FlowState::Unknown) {
            return None;
        }

        if rsi < RSI_PULLBACK && price > poc {
            Some(SignalIntent {
                symbol: view.symbol.clone(),
                bias: Bias::Bullish,
                structure: Structure::CreditSpread(OptionType::Put),
                dte_target: 30,
                signal: "TREND_BULL_PUT",
                origin: "TREND_ENGINE",
            })
        } else if rsi > RSI_RALLY && price < poc {
            Some(SignalIntent {
                symbol: view.symbol.clone(),
                bias: Bias::Bearish,
                structure: Structure::CreditSpread(OptionType::Call),
                dte_target: 30,
                signal: "TREND_BEAR_CALL",
                origin: "TREND_ENGINE",
            })
        } else {
            None
        }
    }
}
