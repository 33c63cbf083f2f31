//! The indicator store: per-symbol 1-minute candle rings plus every derived
//! value the strategies read.
//!
//! The store is the exclusive owner of candle state. The ingest task mutates
//! it under a short lock; strategy gates and heartbeats read cheap
//! [`SymbolView`] copies. Aggregates never leak partial windows: every
//! accessor returns `None` until its full window exists.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

use condor_core::session::{self, SESSION_OPEN};
use condor_core::types::{Candle, FlowState, SymbolView};

use crate::profile::{ProfileLevels, VolumeProfile};
use crate::wilder::{WilderAdx, WilderRsi};

const OPENING_RANGE_END: NaiveTime = match NaiveTime::from_hms_opt(10, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Tuning for the store. Defaults match the index-ETF universe.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Closed bars kept per symbol. Five trading days of minutes.
    pub ring_capacity: usize,
    /// Volume profile bucket width in dollars.
    pub bucket_width: f64,
    /// RSI periods tracked incrementally per symbol.
    pub rsi_periods: Vec<usize>,
    pub adx_period: usize,
    /// Daily ATM IV observations kept for the rank percentile.
    pub iv_history_len: usize,
    /// VIX observations older than this are treated as absent.
    pub vix_stale_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1950,
            bucket_width: 0.25,
            rsi_periods: vec![2, 14],
            adx_period: 14,
            iv_history_len: 252,
            vix_stale_secs: 180,
        }
    }
}

#[derive(Debug, Clone)]
struct CurrentBar {
    open_time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

#[derive(Debug)]
struct SymbolState {
    ring: VecDeque<Candle>,
    current: Option<CurrentBar>,
    last_trade: Option<f64>,
    last_quote: Option<(f64, f64)>,
    session: Option<NaiveDate>,
    cum_pv: f64,
    cum_volume: f64,
    profile: VolumeProfile,
    rsi: BTreeMap<usize, WilderRsi>,
    adx: WilderAdx,
    iv_history: VecDeque<f64>,
}

impl SymbolState {
    fn new(cfg: &StoreConfig) -> Self {
        Self {
            ring: VecDeque::with_capacity(cfg.ring_capacity),
            current: None,
            last_trade: None,
            last_quote: None,
            session: None,
            cum_pv: 0.0,
            cum_volume: 0.0,
            profile: VolumeProfile::new(cfg.bucket_width),
            rsi: cfg
                .rsi_periods
                .iter()
                .map(|&p| (p, WilderRsi::new(p)))
                .collect(),
            adx: WilderAdx::new(cfg.adx_period),
            iv_history: VecDeque::with_capacity(cfg.iv_history_len),
        }
    }

    fn push_closed(&mut self, candle: Candle, capacity: usize) {
        for rsi in self.rsi.values_mut() {
            rsi.push_close(candle.close);
        }
        self.adx.push_bar(candle.high, candle.low, candle.close);
        self.ring.push_back(candle);
        while self.ring.len() > capacity {
            self.ring.pop_front();
        }
    }

    fn roll_session_if_needed(&mut self, ts: DateTime<Utc>) {
        let Some(key) = session::session_key(ts) else {
            return;
        };
        if self.session != Some(key) {
            self.session = Some(key);
            self.cum_pv = 0.0;
            self.cum_volume = 0.0;
            self.profile.clear();
        }
    }

    fn in_session(&self, ts: DateTime<Utc>) -> bool {
        session::session_key(ts).is_some_and(|key| self.session == Some(key))
    }
}

pub struct IndicatorStore {
    cfg: StoreConfig,
    symbols: HashMap<String, SymbolState>,
    vix: Option<(f64, DateTime<Utc>)>,
    warm: bool,
}

impl IndicatorStore {
    #[must_use]
    pub fn new(cfg: StoreConfig) -> Self {
        Self {
            cfg,
            symbols: HashMap::new(),
            vix: None,
            warm: false,
        }
    }

    fn state_mut(&mut self, symbol: &str) -> &mut SymbolState {
        let cfg = &self.cfg;
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolState::new(cfg))
    }

    /// Marks warm-up complete. Until this is set, `price`, `sma` and `rsi`
    /// report absent so no strategy can fire on a cold cache.
    pub fn mark_warm(&mut self) {
        self.warm = true;
    }

    #[must_use]
    pub const fn is_warm(&self) -> bool {
        self.warm
    }

    /// Ingests a trade tick. Aggregates into the current minute bar, rolls
    /// the bar on minute boundaries and keeps session cumulants current.
    pub fn on_trade(&mut self, symbol: &str, price: f64, size: u64, ts: DateTime<Utc>) {
        if price <= 0.0 || !price.is_finite() {
            return;
        }
        let capacity = self.cfg.ring_capacity;
        let state = self.state_mut(symbol);
        state.roll_session_if_needed(ts);
        state.last_trade = Some(price);

        if state.in_session(ts) {
            let vol = size as f64;
            state.cum_pv += price * vol;
            state.cum_volume += vol;
            state.profile.add(price, size);
        }

        let floor = session::minute_floor(ts);
        match &mut state.current {
            None => {
                state.current = Some(CurrentBar {
                    open_time: floor,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: size,
                });
            }
            Some(bar) if floor > bar.open_time => {
                let closed = Candle {
                    open_time: bar.open_time,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                };
                state.push_closed(closed, capacity);
                state.current = Some(CurrentBar {
                    open_time: floor,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: size,
                });
            }
            Some(bar) => {
                // Same minute, or a late tick: fold into the open bar.
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += size;
            }
        }
    }

    /// Ingests a quote tick. Quotes update the cached bid/ask only; they do
    /// not move bars or the session VWAP.
    pub fn on_quote(&mut self, symbol: &str, bid: f64, ask: f64, ts: DateTime<Utc>) {
        let state = self.state_mut(symbol);
        state.roll_session_if_needed(ts);
        if bid > 0.0 && ask > 0.0 {
            state.last_quote = Some((bid, ask));
        }
    }

    /// Last trade price. Absent until warm-up completes.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<f64> {
        if !self.warm {
            return None;
        }
        let state = self.symbols.get(symbol)?;
        state
            .last_trade
            .or_else(|| state.ring.back().map(|c| c.close))
    }

    /// Arithmetic mean of the last `n` closes, absent with fewer than `n`
    /// closed bars or before warm-up.
    #[must_use]
    pub fn sma(&self, symbol: &str, n: usize) -> Option<f64> {
        if !self.warm || n == 0 {
            return None;
        }
        let state = self.symbols.get(symbol)?;
        if state.ring.len() < n {
            return None;
        }
        let sum: f64 = state.ring.iter().rev().take(n).map(|c| c.close).sum();
        Some(sum / n as f64)
    }

    /// Wilder RSI for a tracked period. Updates only on bar close; the
    /// smoothed averages persist across calls.
    #[must_use]
    pub fn rsi(&self, symbol: &str, n: usize) -> Option<f64> {
        if !self.warm {
            return None;
        }
        self.symbols.get(symbol)?.rsi.get(&n)?.value()
    }

    /// Wilder ADX for the configured period.
    #[must_use]
    pub fn adx(&self, symbol: &str) -> Option<f64> {
        self.symbols.get(symbol)?.adx.value()
    }

    /// Session VWAP since the 09:30 ET open.
    #[must_use]
    pub fn vwap(&self, symbol: &str) -> Option<f64> {
        let state = self.symbols.get(symbol)?;
        if state.cum_volume > 0.0 {
            Some(state.cum_pv / state.cum_volume)
        } else {
            None
        }
    }

    /// Session volume profile levels.
    #[must_use]
    pub fn volume_profile(&self, symbol: &str) -> Option<ProfileLevels> {
        self.symbols.get(symbol)?.profile.levels()
    }

    /// Current accumulating bar volume relative to the 20-bar average.
    /// Defaults to 1.0 when there is not enough history to judge.
    #[must_use]
    pub fn volume_velocity(&self, symbol: &str) -> f64 {
        let Some(state) = self.symbols.get(symbol) else {
            return 1.0;
        };
        if state.ring.len() < 20 {
            return 1.0;
        }
        let avg: f64 = state
            .ring
            .iter()
            .rev()
            .take(20)
            .map(|c| c.volume as f64)
            .sum::<f64>()
            / 20.0;
        if avg <= 0.0 {
            return 1.0;
        }
        let current = state
            .current
            .as_ref()
            .filter(|bar| bar.volume > 0)
            .map_or_else(
                || state.ring.back().map_or(0.0, |c| c.volume as f64),
                |bar| bar.volume as f64,
            );
        current / avg
    }

    /// Records a daily ATM IV observation, bounded at the configured window.
    pub fn record_atm_iv(&mut self, symbol: &str, iv: f64) {
        let len = self.cfg.iv_history_len;
        let state = self.state_mut(symbol);
        state.iv_history.push_back(iv);
        while state.iv_history.len() > len {
            state.iv_history.pop_front();
        }
        debug!(symbol, iv, depth = state.iv_history.len(), "recorded ATM IV");
    }

    /// Percentile rank of the latest ATM IV within the recorded history.
    #[must_use]
    pub fn iv_rank(&self, symbol: &str) -> Option<f64> {
        let history = &self.symbols.get(symbol)?.iv_history;
        let current = *history.back()?;
        if history.len() < 2 {
            return None;
        }
        let below = history.iter().filter(|&&v| v <= current).count();
        Some(below as f64 / history.len() as f64 * 100.0)
    }

    /// Publishes a fresh VIX observation.
    pub fn set_vix(&mut self, value: f64, ts: DateTime<Utc>) {
        self.vix = Some((value, ts));
    }

    /// Current VIX, absent when never fetched or stale beyond the threshold.
    #[must_use]
    pub fn vix(&self, now: DateTime<Utc>) -> Option<f64> {
        let (value, at) = self.vix?;
        if (now - at).num_seconds() > self.cfg.vix_stale_secs {
            None
        } else {
            Some(value)
        }
    }

    /// Seeds a symbol from a batched history fetch. Replays the closes
    /// through the RSI and ADX state machines and rebuilds today's session
    /// cumulants from in-session candles.
    pub fn seed_history(&mut self, symbol: &str, candles: &[Candle]) {
        let capacity = self.cfg.ring_capacity;
        let state = self.state_mut(symbol);
        let mut sorted: Vec<Candle> = candles.to_vec();
        sorted.sort_by_key(|c| c.open_time);
        sorted.dedup_by_key(|c| c.open_time);

        for candle in &sorted {
            state.roll_session_if_needed(candle.open_time);
            if state.in_session(candle.open_time) {
                let vol = candle.volume as f64;
                state.cum_pv += candle.close * vol;
                state.cum_volume += vol;
                state.profile.add(candle.close, candle.volume);
            }
            state.push_closed(*candle, capacity);
        }
        debug!(symbol, bars = state.ring.len(), "seeded candle history");
    }

    #[must_use]
    pub fn candle_count(&self, symbol: &str) -> usize {
        self.symbols.get(symbol).map_or(0, |s| s.ring.len())
    }

    /// High/low of the 09:30 to 10:00 ET opening range for today's session,
    /// available only after the range window has completed.
    #[must_use]
    pub fn opening_range(&self, symbol: &str, now: DateTime<Utc>) -> Option<(f64, f64)> {
        let state = self.symbols.get(symbol)?;
        let today = state.session?;
        let now_et = session::to_eastern(now);
        if now_et.date_naive() != today || now_et.time() < OPENING_RANGE_END {
            return None;
        }
        let mut high = f64::MIN;
        let mut low = f64::MAX;
        let mut seen = false;
        for candle in &state.ring {
            let et = session::to_eastern(candle.open_time);
            if et.date_naive() == today
                && et.time() >= SESSION_OPEN
                && et.time() < OPENING_RANGE_END
            {
                high = high.max(candle.high);
                low = low.min(candle.low);
                seen = true;
            }
        }
        seen.then_some((high, low))
    }

    /// Flow state from price vs VWAP (0.1% buffer) and volume velocity.
    #[must_use]
    pub fn flow_state(&self, symbol: &str) -> FlowState {
        let (Some(price), Some(vwap)) = (
            self.symbols
                .get(symbol)
                .and_then(|s| s.last_trade.or_else(|| s.ring.back().map(|c| c.close))),
            self.vwap(symbol),
        ) else {
            return FlowState::Unknown;
        };
        let velocity = self.volume_velocity(symbol);
        let buffer = 0.001;
        if price > vwap * (1.0 + buffer) && velocity > 1.2 {
            FlowState::RiskOn
        } else if price < vwap * (1.0 - buffer) && velocity > 1.2 {
            FlowState::RiskOff
        } else {
            FlowState::Neutral
        }
    }

    /// A cheap copy of everything the strategy gates and heartbeat need for
    /// one symbol.
    #[must_use]
    pub fn view(&self, symbol: &str, now: DateTime<Utc>) -> SymbolView {
        let levels = self.volume_profile(symbol);
        SymbolView {
            symbol: symbol.to_string(),
            price: self.price(symbol),
            sma_200: self.sma(symbol, 200),
            rsi_14: self.rsi(symbol, 14),
            rsi_2: self.rsi(symbol, 2),
            adx: self.adx(symbol),
            vwap: self.vwap(symbol),
            volume_velocity: self.volume_velocity(symbol),
            poc: levels.map(|l| l.poc),
            vah: levels.map(|l| l.vah),
            val: levels.map(|l| l.val),
            iv_rank: self.iv_rank(symbol),
            candle_count: self.candle_count(symbol),
            flow_state: self.flow_state(symbol),
            opening_range: self.opening_range(symbol, now),
            is_warm: self.warm && self.sma(symbol, 200).is_some(),
        }
    }
}
