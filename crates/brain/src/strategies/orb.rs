//! Opening range breakout. Trades a 0DTE credit spread in the direction of
//! a high-volume break of the 09:30 to 10:00 range.

use chrono::NaiveTime;

use condor_core::session::within_et_window;
use condor_core::types::{Bias, OptionType, Regime};

use super::{GateInputs, SignalIntent, StrategyGate, Structure};

const WINDOW_START: NaiveTime = match NaiveTime::from_hms_opt(10, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const WINDOW_END: NaiveTime = match NaiveTime::from_hms_opt(11, 30, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const MIN_VOLUME_VELOCITY: f64 = 1.5;

pub struct OrbGate;

impl StrategyGate for OrbGate {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn evaluate(&self, inputs: &GateInputs<'_>) -> Option<SignalIntent> {
        if inputs.regime == Regime::EventRisk {
            return None;
        }
        if !within_et_window(inputs.now, WINDOW_START, WINDOW_END) {
            return None;
        }
        let price = inputs.view.price?;
        let (range_high, range_low) = inputs.view.opening_range?;
        if inputs.view.volume_velocity <= MIN_VOLUME_VELOCITY {
            return None;
        }

        if price > range_high {
            Some(SignalIntent {
                symbol: inputs.view.symbol.clone(),
                bias: Bias::Bullish,
                structure: Structure::CreditSpread(OptionType::Put),
                dte_target: 0,
                signal: "ORB_BREAK_UP",
                origin: "ORB",
            })
        } else if price < range_low {
            Some(SignalIntent {
                symbol: inputs.view.symbol.clone(),
                bias: Bias::Bearish,
                structure: Structure::CreditSpread(OptionType::Call),
                dte_target: 0,
                signal: "ORB_BREAK_DOWN",
                origin: "ORB",
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

    // 15:30 UTC in January is 10:30 ET.
    const IN_WINDOW: &str = "2026-01-16 15:30:00";

    #[test]
    fn fires_on_upside_break_with_volume() {
        let mut v = view();
        v.price = Some(431.5);
        v.volume_velocity = 2.0;
        let intent = OrbGate.evaluate(&inputs(&v, Regime::Trending, utc(IN_WINDOW))).unwrap();
        assert_eq!(intent.bias, Bias::Bullish);
        assert_eq!(intent.structure, Structure::CreditSpread(OptionType::Put));
        assert_eq!(intent.dte_target, 0);
    }

    #[test]
    fn fires_bearish_on_downside_break() {
        let mut v = view();
        v.price = Some(428.5);
        v.volume_velocity = 2.0;
        let intent = OrbGate.evaluate(&inputs(&v, Regime::Trending, utc(IN_WINDOW))).unwrap();
        assert_eq!(intent.bias, Bias::Bearish);
        assert_eq!(intent.signal, "ORB_BREAK_DOWN");
    }

    #[test]
    fn requires_volume_velocity() {
        let mut v = view();
        v.price = Some(431.5);
        v.volume_velocity = 1.4;
        assert!(OrbGate.evaluate(&inputs(&v, Regime::Trending, utc(IN_WINDOW))).is_none());
    }

    #[test]
    fn silent_inside_the_range() {
        let mut v = view();
        v.price = Some(430.0);
        v.volume_velocity = 2.0;
        assert!(OrbGate.evaluate(&inputs(&v, Regime::Trending, utc(IN_WINDOW))).is_none());
    }

    #[test]
    fn respects_window_and_event_risk() {
        let mut v = view();
        v.price = Some(431.5);
        v.volume_velocity = 2.0;
        // 14:30 UTC is 09:30 ET, before the window opens.
        assert!(OrbGate
            .evaluate(&inputs(&v, Regime::Trending, utc("2026-01-16 14:30:00")))
            .is_none());
        assert!(OrbGate
            .evaluate(&inputs(&v, Regime::EventRisk, utc(IN_WINDOW)))
            .is_none());
    }

    #[test]
    fn needs_a_completed_opening_range() {
        let mut v = view();
        v.price = Some(431.5);
        v.volume_velocity = 2.0;
        v.opening_range = None;
        assert!(OrbGate.evaluate(&inputs(&v, Regime::Trending, utc(IN_WINDOW))).is_none());
    }
}
