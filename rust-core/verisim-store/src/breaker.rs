// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-peer/store circuit breaker.
//!
//! Closed -> Open on consecutive failures reaching the threshold; Open ->
//! HalfOpen after cool-down; HalfOpen -> Closed on a successful probe, back
//! to Open on a failed one. Every transition is logged.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing.
    pub cool_down_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down_secs: 30,
        }
    }
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_calls: u64,
    pub failure_rate: f64,
    pub opened_at: Option<DateTime<Utc>>,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    total_failures: u64,
    total_calls: u64,
    opened_at: Option<DateTime<Utc>>,
}

/// A circuit breaker shielding the engine from a failing backend.
pub struct CircuitBreaker {
    target: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                total_failures: 0,
                total_calls: 0,
                opened_at: None,
            }),
        }
    }

    pub fn with_defaults(target: impl Into<String>) -> Self {
        Self::new(target, BreakerConfig::default())
    }

    /// Whether a call may proceed. Open breakers transition to HalfOpen once
    /// the cool-down elapses, admitting a single probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| Utc::now() - t >= Duration::seconds(self.config.cool_down_secs))
                    .unwrap_or(true);
                if elapsed {
                    info!(target = %self.target, "circuit breaker half-open: probing");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_calls += 1;
        inner.consecutive_failures = 0;
        if inner.state != BreakerState::Closed {
            info!(target = %self.target, "circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    /// Record a failed call; may trip the breaker.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_calls += 1;
        inner.total_failures += 1;
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            BreakerState::Open => false,
        };
        if trip {
            warn!(
                target = %self.target,
                failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Utc::now());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_calls: inner.total_calls,
            failure_rate: if inner.total_calls > 0 {
                inner.total_failures as f64 / inner.total_calls as f64
            } else {
                0.0
            },
            opened_at: inner.opened_at,
        }
    }
}
