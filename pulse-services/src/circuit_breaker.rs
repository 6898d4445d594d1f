//! Per-dependency circuit breaker
//!
//! `CLOSED` passes calls through and counts consecutive failures. Reaching the
//! threshold opens the circuit, after which calls go straight to the supplied
//! fallback. Once the cool-down has elapsed since the last failure, exactly one
//! trial call is let through (`HALF_OPEN`); its outcome closes or re-opens the
//! circuit.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::CircuitState;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(name: &str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

enum Admission {
    Pass,
    Trial,
    Reject,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    short_circuited: AtomicU64,
}

/// Releases the half-open trial slot if the trial call is dropped mid-flight
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            inner.trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
            short_circuited: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, without triggering the open -> half-open transition
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("[CIRCUIT:{}] HALF_OPEN - allowing trial call", self.config.name);
                    Admission::Trial
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Reject
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!("[CIRCUIT:{}] CLOSED - dependency recovered", self.config.name);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self, error: &dyn Display) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(
                    "[CIRCUIT:{}] OPEN - trial call failed: {}",
                    self.config.name, error
                );
            }
            CircuitState::Closed
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                inner.state = CircuitState::Open;
                warn!(
                    "[CIRCUIT:{}] OPEN after {} consecutive failures: {}",
                    self.config.name, inner.consecutive_failures, error
                );
            }
            _ => {
                debug!(
                    "[CIRCUIT:{}] failure {}/{}: {}",
                    self.config.name,
                    inner.consecutive_failures,
                    self.config.failure_threshold,
                    error
                );
            }
        }
    }

    /// Run `primary` through the breaker, returning `fallback()` on rejection or failure
    ///
    /// Errors from `primary` are recorded and logged, never propagated.
    pub async fn call<T, E, F, Fut, FB>(&self, primary: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        FB: FnOnce() -> T,
    {
        let trial = match self.admit() {
            Admission::Pass => false,
            Admission::Trial => true,
            Admission::Reject => {
                self.short_circuited.fetch_add(1, Ordering::Relaxed);
                debug!("[CIRCUIT:{}] short-circuited to fallback", self.config.name);
                return fallback();
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };

        let outcome = primary().await;
        guard.armed = false;

        match outcome {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(e) => {
                self.record_failure(&e);
                fallback()
            }
        }
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            name: self.config.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a breaker for health reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub short_circuited: u64,
}
