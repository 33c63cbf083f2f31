//! 0DTE scalper. Fades RSI(2) extremes while the tape is moving.

use condor_core::types::{Bias, OptionType, Regime};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const RSI2_OVERSOLD: f64 = 5.0;
const RSI2_OVERBOUGHT: f64 = 95.0;

pub struct ScalperGate;

impl StrategyGate for ScalperGate {
    fn name(&self) -> &'static str {
        "SCALPER_0DTE"
    }

    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
        if !matches!(inputs.regime, Regime::Trending | Regime::HighVolExpansion) {
            return None;
        }
        let rsi2 = inputs.view.rsi_2?;

        if rsi2 < RSI2_OVERSOLD {
            Some(SignalIntent {
                symbol: inputs.view.symbol.clone(),
                bias: Bias::Bullish,
                structure: Structure::CreditSpread(OptionType::Put),
                dte_target: 0,
                signal: "SCALP_OVERSOLD",
                origin: "SCALPER_0DTE",
            })
        } else if rsi2 > RSI2_OVERBOUGHT {
            Some(SignalIntent {
                symbol: inputs.view.symbol.clone(),
                bias: Bias::Bearish,
                structure: Structure::CreditSpread(OptionType::Call),
                dte_target: 0,
                signal: "SCALP_OVERBOUGHT",
                origin: "SCALPER_0DTE",
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{inputs, utc, view};
    use super::*;

    const MIDDAY: &str = "2026-01-16 17:00:00";

    #[test]
    fn fades_oversold_in_trend() {
        let mut v = view();
        v.rsi_2 = Some(3.0);
        let intent = ScalperGate.evaluate(&inputs(&v, Regime::Trending, utc(MIDDAY))).unwrap();
        assert_eq!(intent.bias, Bias::Bullish);
        assert_eq!(intent.structure, Structure::CreditSpread(OptionType::Put));
    }

    #[test]
    fn fades_overbought_in_expansion() {
        let mut v = view();
        v.rsi_2 = Some(97.0);
        let intent = ScalperGate
            .evaluate(&inputs(&v, Regime::HighVolExpansion, utc(MIDDAY)))
            .unwrap();
        assert_eq!(intent.bias, Bias::Bearish);
    }

    #[test]
    fn silent_in_chop_and_mid_range() {
        let mut v = view();
        v.rsi_2 = Some(3.0);
        assert!(ScalperGate.evaluate(&inputs(&v, Regime::LowVolChop, utc(MIDDAY))).is_none());
        v.rsi_2 = Some(50.0);
        assert!(ScalperGate.evaluate(&inputs(&v, Regime::Trending, utc(MIDDAY))).is_none());
    }

    #[test]
    fn needs_rsi2() {
        let mut v = view();
        v.rsi_2 = None;
        assert!(ScalperGate.evaluate(&inputs(&v, Regime::Trending, utc(MIDDAY))).is_none());
    }
}
