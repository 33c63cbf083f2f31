//! Wilder-smoothed RSI and ADX state machines.
//!
//! Both are incremental: state is updated once per closed bar and never
//! recomputed from scratch after initialisation. The first smoothed value is
//! a simple mean over the first `period` inputs; every later value uses
//! `avg = (prev_avg * (period - 1) + new) / period`.

/// Incremental RSI over closed-bar closes.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    // Accumulators for the initial simple mean.
    seed_gain: f64,
    seed_loss: f64,
    seed_count: usize,
    avg_gain: f64,
    avg_loss: f64,
    initialized: bool,
}

impl WilderRsi {
    #[must_use]
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed_gain: 0.0,
            seed_loss: 0.0,
            seed_count: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            initialized: false,
        }
    }

    #[must_use]
    pub const fn period(&self) -> usize {
        self.period
    }

    /// Feeds the close of a newly closed bar.
    pub fn push_close(&mut self, close: f64) {
        let Some(prev) = self.prev_close else {
            self.prev_close = Some(close);
            return;
        };
        self.prev_close = Some(close);

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if self.initialized {
            let p = self.period as f64;
            self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
            self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        } else {
            self.seed_gain += gain;
            self.seed_loss += loss;
            self.seed_count += 1;
            if self.seed_count == self.period {
                let p = self.period as f64;
                self.avg_gain = self.seed_gain / p;
                self.avg_loss = self.seed_loss / p;
                self.initialized = true;
            }
        }
    }

    /// Current RSI, absent until `period + 1` closes have been seen.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        if !self.initialized {
            return None;
        }
        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    /// Smoothed averages, exposed for the update-rule invariant tests.
    #[must_use]
    pub fn averages(&self) -> Option<(f64, f64)> {
        self.initialized.then_some((self.avg_gain, self.avg_loss))
    }
}

/// Incremental ADX over closed-bar high/low/close.
#[derive(Debug, Clone)]
pub struct WilderAdx {
    period: usize,
    prev: Option<(f64, f64, f64)>,
    // Wilder running sums for TR / +DM / -DM.
    tr_n: f64,
    pdm_n: f64,
    ndm_n: f64,
    dm_count: usize,
    // DX seed accumulation, then smoothed ADX.
    dx_sum: f64,
    dx_count: usize,
    adx: Option<f64>,
}

impl WilderAdx {
    #[must_use]
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            tr_n: 0.0,
            pdm_n: 0.0,
            ndm_n: 0.0,
            dm_count: 0,
            dx_sum: 0.0,
            dx_count: 0,
            adx: None,
        }
    }

    /// Feeds a newly closed bar.
    pub fn push_bar(&mut self, high: f64, low: f64, close: f64) {
        let Some((prev_high, prev_low, prev_close)) = self.prev else {
            self.prev = Some((high, low, close));
            return;
        };
        self.prev = Some((high, low, close));

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        let up = high - prev_high;
        let down = prev_low - low;
        let pdm = if up > down && up > 0.0 { up } else { 0.0 };
        let ndm = if down > up && down > 0.0 { down } else { 0.0 };

        let p = self.period as f64;
        if self.dm_count < self.period {
            self.tr_n += tr;
            self.pdm_n += pdm;
            self.ndm_n += ndm;
            self.dm_count += 1;
            if self.dm_count < self.period {
                return;
            }
        } else {
            self.tr_n = self.tr_n - self.tr_n / p + tr;
            self.pdm_n = self.pdm_n - self.pdm_n / p + pdm;
            self.ndm_n = self.ndm_n - self.ndm_n / p + ndm;
        }

        let dx = if self.tr_n > 0.0 {
            let pdi = 100.0 * self.pdm_n / self.tr_n;
            let ndi = 100.0 * self.ndm_n / self.tr_n;
            let denom = pdi + ndi;
            if denom > 0.0 {
                100.0 * (pdi - ndi).abs() / denom
            } else {
                0.0
            }
        } else {
            0.0
        };

        match self.adx {
            Some(adx) => self.adx = Some((adx * (p - 1.0) + dx) / p),
            None => {
                self.dx_sum += dx;
                self.dx_count += 1;
                if self.dx_count == self.period {
                    self.adx = Some(self.dx_sum / p);
                }
            }
        }
    }

    /// Current ADX, absent until roughly `2 * period` bars have been seen.
    #[must_use]
    pub const fn value(&self) -> Option<f64> {
        self.adx
    }
}
