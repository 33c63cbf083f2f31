//! Market-hours awareness and the heartbeat task.
//!
//! The feed only runs inside a 09:25 to 16:05 ET weekday window; outside it
//! the supervisor logic says how long to sleep. The heartbeat posts the
//! brain's view of the world to the gate once a minute and is expendable:
//! failures never touch trading.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use condor_core::session::{eastern_date, to_eastern};
use condor_core::types::PortfolioGreeks;
use condor_indicators::regime::classify;
use condor_indicators::IndicatorStore;

use crate::gate_client::GateClient;

const FEED_WINDOW_START: NaiveTime = match NaiveTime::from_hms_opt(9, 25, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const FEED_WINDOW_END: NaiveTime = match NaiveTime::from_hms_opt(16, 5, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const HEARTBEAT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    /// Inside the feed window on a weekday.
    Open,
    PreMarket,
    PostMarket,
    Weekend,
}

#[must_use]
pub fn market_phase(now: DateTime<Utc>) -> MarketPhase {
    let et = to_eastern(now);
    if et.weekday().number_from_monday() > 5 {
        return MarketPhase::Weekend;
    }
    let t = et.time();
    if t < FEED_WINDOW_START {
        MarketPhase::PreMarket
    } else if t <= FEED_WINDOW_END {
        MarketPhase::Open
    } else {
        MarketPhase::PostMarket
    }
}

/// How long to sleep before re-checking the market phase.
#[must_use]
pub fn phase_sleep(phase: MarketPhase) -> Duration {
    match phase {
        MarketPhase::Open => Duration::from_secs(0),
        MarketPhase::PreMarket => Duration::from_secs(5 * 60),
        // Long sleeps are re-checked hourly so clock drift and restarts
        // cannot strand the feed.
        MarketPhase::PostMarket | MarketPhase::Weekend => Duration::from_secs(60 * 60),
    }
}

/// Sends the brain state to the gate every minute: current regime, each
/// symbol's market view and the live portfolio greeks.
pub async fn heartbeat_loop(
    gate: Arc<GateClient>,
    store: Arc<RwLock<IndicatorStore>>,
    symbols: Vec<String>,
    greeks_rx: watch::Receiver<PortfolioGreeks>,
    restricted_dates: Vec<NaiveDate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
    info!("heartbeat task started");
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let state = build_state(&store, &symbols, &greeks_rx, &restricted_dates, Utc::now());
                gate.send_heartbeat(&state).await;
                debug!("heartbeat sent");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("heartbeat task stopped");
}

fn build_state(
    store: &RwLock<IndicatorStore>,
    symbols: &[String],
    greeks_rx: &watch::Receiver<PortfolioGreeks>,
    restricted_dates: &[NaiveDate],
    now: DateTime<Utc>,
) -> serde_json::Value {
    let guard = store.read();
    let vix = guard.vix(now);
    let adx_spy = guard.adx("SPY");
    let views: serde_json::Map<String, serde_json::Value> = symbols
        .iter()
        .map(|s| {
            let view = guard.view(s, now);
            (s.clone(), serde_json::to_value(view).unwrap_or_default())
        })
        .collect();
    drop(guard);

    let regime = classify(vix, adx_spy, restricted_dates.contains(&eastern_date(now)));
    let greeks = *greeks_rx.borrow();
    json!({
        "regime": regime,
        "vix": vix,
        "symbols": views,
        "greeks": greeks,
    })
}

/// Sleeps up to `duration`, returning true if shutdown fired first.
pub async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        result = shutdown.changed() => result.is_err() || *shutdown.borrow(),
    }
}

/// Seconds until the next 09:25 ET weekday open, for logging.
#[must_use]
pub fn until_next_window(now: DateTime<Utc>) -> ChronoDuration {
    let mut et = to_eastern(now);
    loop {
        let candidate = et.date_naive().and_time(FEED_WINDOW_START);
        let candidate = candidate
            .and_local_timezone(chrono_tz::America::New_York)
            .earliest();
        if let Some(candidate) = candidate {
            if candidate > to_eastern(now) && candidate.weekday().number_from_monday() <= 5 {
                return candidate.signed_duration_since(to_eastern(now));
            }
        }
        et += ChronoDuration::days(1);
    }
}
