//! Per-target circuit breaker
//!
//! One breaker per target service name, created lazily on first call and
//! kept for the process lifetime. State is a best-effort, per-process view;
//! it is never shared across instances.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::BreakerConfig;
use crate::types::BreakerSnapshot;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Admission decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker is closed; proceed normally
    Proceed,

    /// Breaker is half-open and this caller holds the single trial slot
    Trial,

    /// Breaker is open (or a trial is already in flight); fail fast
    Rejected,
}

/// Circuit breaker for a single target service.
///
/// Tracks the last `sliding_window_size` call outcomes. Once the window is
/// full and its failure rate strictly exceeds `failure_rate_threshold`
/// percent the breaker opens; after `wait_duration_in_open_state` the next
/// caller is admitted as a single half-open trial. All mutation happens
/// under one per-target lock, so concurrent outcomes are recorded
/// linearizably and none is lost or double-counted.
pub struct CircuitBreaker {
    target_service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

struct BreakerInner {
    state: BreakerState,
    /// Ring buffer of outcomes, `true` for success
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Create a new breaker for one target service.
    pub fn new(target_service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target_service: target_service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                opened_at_wall: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Target service this breaker guards.
    pub fn target_service(&self) -> &str {
        &self.target_service
    }

    /// Decide whether a call may attempt the transport.
    ///
    /// Open→HalfOpen is evaluated here, lazily on the incoming call, not by
    /// a background timer.
    pub async fn try_acquire(&self) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Admission::Proceed,
            BreakerState::Open => {
                let waited = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                if waited >= self.config.wait_duration_in_open_state {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(
                        target_service = %self.target_service,
                        "circuit breaker half-open, admitting trial call"
                    );
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Record one call outcome into the window and apply transitions.
    pub async fn record_outcome(&self, success: bool, was_trial: bool) {
        let mut inner = self.inner.lock().await;

        if was_trial {
            inner.trial_in_flight = false;
            if success {
                inner.state = BreakerState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.opened_at_wall = None;
                info!(
                    target_service = %self.target_service,
                    "trial succeeded, circuit breaker closed"
                );
            } else {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.opened_at_wall = Some(Utc::now());
                info!(
                    target_service = %self.target_service,
                    "trial failed, circuit breaker re-opened"
                );
            }
            return;
        }

        inner.window.push_back(success);
        while inner.window.len() > self.config.sliding_window_size {
            inner.window.pop_front();
        }

        if inner.state == BreakerState::Closed
            && inner.window.len() >= self.config.sliding_window_size
        {
            let failures = inner.window.iter().filter(|s| !**s).count();
            let rate = failures as f64 * 100.0 / inner.window.len() as f64;
            if rate > self.config.failure_rate_threshold {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.opened_at_wall = Some(Utc::now());
                info!(
                    target_service = %self.target_service,
                    failure_rate = rate,
                    "failure rate above threshold, circuit breaker opened"
                );
            } else {
                debug!(
                    target_service = %self.target_service,
                    failure_rate = rate,
                    "window full, failure rate within threshold"
                );
            }
        }
    }

    /// Release the trial slot without recording an outcome. Used when a
    /// trial call is abandoned before the transport is attempted.
    pub async fn abort_trial(&self) {
        let mut inner = self.inner.lock().await;
        inner.trial_in_flight = false;
    }

    /// Current state.
    pub async fn current_state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Point-in-time snapshot for diagnostics.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            target_service: self.target_service.clone(),
            state: inner.state,
            recorded_outcomes: inner.window.len(),
            window_failures: inner.window.iter().filter(|s| !**s).count(),
            opened_since: inner.opened_at_wall,
        }
    }
}

/// Map of breakers keyed by target service name.
///
/// Each entry is guarded by its own lock, so unrelated targets never
/// serialize on each other; the outer map lock is held only to look up or
/// insert entries.
pub struct BreakerMap {
    config: BreakerConfig,
    inner: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerMap {
    /// Create an empty map applying `config` to every target.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for a target, creating it on first use.
    pub async fn breaker_for(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.inner.read().await.get(service) {
            return Arc::clone(breaker);
        }

        let mut map = self.inner.write().await;
        Arc::clone(map.entry(service.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(service, self.config.clone()))
        }))
    }

    /// Snapshot of the breaker for a target, if one exists yet.
    pub async fn snapshot(&self, service: &str) -> Option<BreakerSnapshot> {
        let breaker = {
            let map = self.inner.read().await;
            map.get(service).cloned()
        };
        match breaker {
            Some(b) => Some(b.snapshot().await),
            None => None,
        }
    }
}
