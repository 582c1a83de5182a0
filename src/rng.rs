//! Injectable randomness.
//!
//! Every random decision in the crate (persona jitter, cadence, reaction
//! gating, visibility sampling) draws from a [`RandomSource`], so a fixed seed
//! reproduces a whole simulation run.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub struct RandomSource {
    inner: Mutex<StdRng>,
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            inner: Mutex::new(StdRng::from_os_rng()),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Uniform in [0, 1)
    pub fn unit(&self) -> f64 {
        self.with_rng(|rng| rng.random::<f64>())
    }

    /// Uniform integer in [lo, hi]; returns `lo` when the range is empty
    pub fn range_u64(&self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        self.with_rng(|rng| rng.random_range(lo..=hi))
    }

    /// Uniform float in [lo, hi]; returns `lo` when the range is empty
    pub fn range_f64(&self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        self.with_rng(|rng| rng.random_range(lo..=hi))
    }

    /// Uniform in [-amplitude, +amplitude]
    pub fn jitter(&self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.range_f64(-amplitude, amplitude)
    }

    pub fn chance(&self, probability: f64) -> bool {
        self.unit() < probability
    }

    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.with_rng(|rng| rng.random_range(0..items.len()));
        items.get(idx)
    }

    /// Random subset holding `fraction` of the items (at least one when
    /// the input is non-empty), in input order.
    pub fn sample_fraction<T: Clone>(&self, items: &[T], fraction: f64) -> Vec<T> {
        if items.is_empty() {
            return Vec::new();
        }
        let keep = ((items.len() as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let keep = keep.clamp(1, items.len());
        let mut indices: Vec<usize> = (0..items.len()).collect();
        self.with_rng(|rng| indices.shuffle(rng));
        indices.truncate(keep);
        indices.sort_unstable();
        indices.into_iter().map(|i| items[i].clone()).collect()
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}
