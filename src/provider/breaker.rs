use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: DateTime<Utc> },
    /// Cooldown elapsed; a single trial call is allowed through
    HalfOpen { probe_started: DateTime<Utc> },
}

/// Serializable health view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider circuit breaker.
///
/// `failure_threshold` consecutive failures open the circuit. Each re-open
/// doubles the cooldown up to `max_cooldown_ms`; a success closes the circuit
/// and resets the cooldown ladder.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    /// Opens since the last success
    open_count: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_count: 0,
        }
    }

    /// Whether a call may go through now. In half-open state this claims the
    /// single trial slot.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open { until } => {
                if now >= until {
                    self.state = BreakerState::HalfOpen { probe_started: now };
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen { probe_started } => {
                // A trial that never reported back is presumed lost
                if now - probe_started >= Duration::milliseconds(self.config.probe_stale_ms as i64) {
                    self.state = BreakerState::HalfOpen { probe_started: now };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.open_count = 0;
    }

    /// Returns true when this failure opened the circuit
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::HalfOpen { .. } => {
                self.open(now);
                true
            }
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                    true
                } else {
                    false
                }
            }
            // A call admitted before the circuit opened; already counted
            BreakerState::Open { .. } => false,
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.open_count += 1;
        let cooldown = self.cooldown_ms(self.open_count);
        self.state = BreakerState::Open {
            until: now + Duration::milliseconds(cooldown as i64),
        };
        self.consecutive_failures = 0;
    }

    /// Cooldown for the n-th consecutive open (1-based)
    pub fn cooldown_ms(&self, open_count: u32) -> u64 {
        let exponent = open_count.saturating_sub(1).min(32);
        self.config
            .base_cooldown_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_cooldown_ms)
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn status(&self) -> HealthStatus {
        match self.state {
            BreakerState::Closed => HealthStatus::Closed,
            BreakerState::Open { .. } => HealthStatus::Open,
            BreakerState::HalfOpen { .. } => HealthStatus::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        match self.state {
            BreakerState::Open { until } => Some(until),
            _ => None,
        }
    }
}
