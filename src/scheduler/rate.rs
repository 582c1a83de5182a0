use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CadenceConfig, RateLimitConfig};

/// Point-in-time view of the action budget and backpressure state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    pub window_started: DateTime<Utc>,
    pub used: usize,
    pub limit: usize,
    pub tick_interval_ms: u64,
    pub batch_size: usize,
    pub deferred_until: Option<DateTime<Utc>>,
}

/// Fixed-window action budget with platform backpressure.
///
/// A rate-limit signal doubles the tick interval (capped), halves the batch
/// size (floored) and defers the window. Each clean tick moves both halfway
/// back toward their configured values.
#[derive(Debug, Clone)]
pub struct RateBudget {
    limit: usize,
    window: Duration,
    default_backoff: Duration,
    window_started: DateTime<Utc>,
    used: usize,
    deferred_until: Option<DateTime<Utc>>,

    base_interval_ms: u64,
    max_interval_ms: u64,
    interval_ms: u64,
    base_batch: usize,
    min_batch: usize,
    batch: usize,
}

impl RateBudget {
    pub fn new(rate: &RateLimitConfig, cadence: &CadenceConfig, now: DateTime<Utc>) -> Self {
        Self {
            limit: rate.actions_per_window,
            window: Duration::seconds(rate.window_secs as i64),
            default_backoff: Duration::seconds(rate.default_backoff_secs as i64),
            window_started: now,
            used: 0,
            deferred_until: None,
            base_interval_ms: cadence.tick_interval_ms,
            max_interval_ms: cadence.max_tick_interval_ms.max(cadence.tick_interval_ms),
            interval_ms: cadence.tick_interval_ms,
            base_batch: cadence.batch_size,
            min_batch: cadence.min_batch_size.clamp(1, cadence.batch_size.max(1)),
            batch: cadence.batch_size,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.window_started + self.window {
            self.window_started = now;
            self.used = 0;
        }
        if self.deferred_until.is_some_and(|until| now >= until) {
            self.deferred_until = None;
        }
    }

    /// Actions still allowed in the current window; zero while deferred
    pub fn remaining(&mut self, now: DateTime<Utc>) -> usize {
        self.roll(now);
        if self.deferred_until.is_some() {
            return 0;
        }
        self.limit.saturating_sub(self.used)
    }

    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.deferred_until.is_some_and(|until| now < until)
    }

    pub fn consume(&mut self, n: usize) {
        self.used += n;
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }

    pub fn on_rate_limited(&mut self, now: DateTime<Utc>, retry_after: Option<std::time::Duration>) {
        self.interval_ms = (self.interval_ms.saturating_mul(2)).min(self.max_interval_ms);
        self.batch = (self.batch / 2).max(self.min_batch);
        self.extend_deferral(now, retry_after);
        let until = self.deferred_until.unwrap_or(now);
        warn!(
            interval_ms = self.interval_ms,
            batch = self.batch,
            deferred_until = %until,
            "platform rate limited, backing off"
        );
    }

    /// Push an active deferral out without another backoff step
    pub fn extend_deferral(&mut self, now: DateTime<Utc>, retry_after: Option<std::time::Duration>) {
        let defer = retry_after
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or(self.default_backoff);
        let until = now + defer;
        self.deferred_until = Some(self.deferred_until.map_or(until, |prev| prev.max(until)));
    }

    pub fn on_clean_tick(&mut self) {
        if self.interval_ms == self.base_interval_ms && self.batch == self.base_batch {
            return;
        }
        self.interval_ms = self.base_interval_ms
            + (self.interval_ms.saturating_sub(self.base_interval_ms)) / 2;
        self.batch = self.batch + (self.base_batch.saturating_sub(self.batch)).div_ceil(2);
        if self.interval_ms == self.base_interval_ms && self.batch == self.base_batch {
            info!("backpressure fully recovered");
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            window_started: self.window_started,
            used: self.used,
            limit: self.limit,
            tick_interval_ms: self.interval_ms,
            batch_size: self.batch,
            deferred_until: self.deferred_until,
        }
    }
}
