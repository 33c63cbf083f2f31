//! Session volume profile: volume bucketed by price, yielding the point of
//! control and the 70% value area band.

use std::collections::BTreeMap;

/// Structural levels derived from the profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileLevels {
    /// Highest-volume bucket (point of control).
    pub poc: f64,
    /// Value area high.
    pub vah: f64,
    /// Value area low.
    pub val: f64,
}

#[derive(Debug, Clone)]
pub struct VolumeProfile {
    bucket_width: f64,
    buckets: BTreeMap<i64, u64>,
    total: u64,
}

impl VolumeProfile {
    #[must_use]
    pub fn new(bucket_width: f64) -> Self {
        Self {
            bucket_width,
            buckets: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn add(&mut self, price: f64, volume: u64) {
        if volume == 0 || !price.is_finite() {
            return;
        }
        let idx = (price / self.bucket_width).floor() as i64;
        *self.buckets.entry(idx).or_insert(0) += volume;
        self.total += volume;
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.total = 0;
    }

    #[must_use]
    pub const fn total_volume(&self) -> u64 {
        self.total
    }

    fn price_of(&self, idx: i64) -> f64 {
        (idx as f64) * self.bucket_width + self.bucket_width / 2.0
    }

    /// POC and the value area covering 70% of session volume, expanded
    /// outward from the POC by taking the heavier neighbour first.
    #[must_use]
    pub fn levels(&self) -> Option<ProfileLevels> {
        if self.total == 0 {
            return None;
        }
        let (&poc_idx, _) = self
            .buckets
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;

        let target = (self.total as f64) * 0.70;
        let mut covered = *self.buckets.get(&poc_idx)? as f64;
        let (mut lo, mut hi) = (poc_idx, poc_idx);
        let min_idx = *self.buckets.keys().next()?;
        let max_idx = *self.buckets.keys().next_back()?;

        while covered < target && (lo > min_idx || hi < max_idx) {
            let below = (lo > min_idx).then(|| {
                let idx = self.next_below(lo);
                (idx, self.buckets.get(&idx).copied().unwrap_or(0))
            });
            let above = (hi < max_idx).then(|| {
                let idx = self.next_above(hi);
                (idx, self.buckets.get(&idx).copied().unwrap_or(0))
            });
            match (below, above) {
                (Some((bi, bv)), Some((ai, av))) => {
                    if av >= bv {
                        hi = ai;
                        covered += av as f64;
                    } else {
                        lo = bi;
                        covered += bv as f64;
                    }
                }
                (Some((bi, bv)), None) => {
                    lo = bi;
                    covered += bv as f64;
                }
                (None, Some((ai, av))) => {
                    hi = ai;
                    covered += av as f64;
                }
                (None, None) => break,
            }
        }

        Some(ProfileLevels {
            poc: self.price_of(poc_idx),
            vah: self.price_of(hi),
            val: self.price_of(lo),
        })
    }

    fn next_below(&self, idx: i64) -> i64 {
        self.buckets
            .range(..idx)
            .next_back()
            .map_or(idx, |(&i, _)| i)
    }

    fn next_above(&self, idx: i64) -> i64 {
        self.buckets
            .range(idx + 1..)
            .next()
            .map_or(idx, |(&i, _)| i)
    }
}
