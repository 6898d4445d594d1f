//! Token-bucket admission control
//!
//! One limiter guards one upstream. `acquire()` never waits: it lazily
//! refills the bucket from elapsed time, then either takes a token and
//! returns `true` or returns `false` and leaves the decision to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

/// Token count and refill timestamp, mutated only under the limiter's lock
#[derive(Debug, Clone, Copy)]
struct RateBudget {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with capacity `max_tokens` refilling at `refill_per_sec`
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_tokens: f64,
    refill_per_sec: f64,
    budget: Mutex<RateBudget>,
    granted: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket
    pub fn new(name: &str, max_tokens: f64, refill_per_sec: f64) -> Self {
        let max_tokens = max_tokens.max(0.0);
        Self {
            name: name.to_string(),
            max_tokens,
            refill_per_sec: refill_per_sec.max(0.0),
            budget: Mutex::new(RateBudget {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
            granted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    fn refill(&self, budget: &mut RateBudget, now: Instant) {
        let elapsed = now.saturating_duration_since(budget.last_refill).as_secs_f64();
        budget.tokens = (budget.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        budget.last_refill = now;
    }

    /// Take one token if available
    pub fn acquire(&self) -> bool {
        let mut budget = self.budget.lock();
        self.refill(&mut budget, Instant::now());

        if budget.tokens >= 1.0 {
            budget.tokens -= 1.0;
            self.granted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            debug!(
                "[RATE_LIMITER:{}] DENIED - {:.2} tokens available",
                self.name, budget.tokens
            );
            false
        }
    }

    /// Tokens currently available, after refilling
    pub fn available_tokens(&self) -> f64 {
        let mut budget = self.budget.lock();
        self.refill(&mut budget, Instant::now());
        budget.tokens
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            name: self.name.clone(),
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            available_tokens: self.available_tokens(),
            max_tokens: self.max_tokens,
            refill_per_sec: self.refill_per_sec,
        }
    }
}

/// Statistics about limiter usage
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub granted: u64,
    pub denied: u64,
    pub available_tokens: f64,
    pub max_tokens: f64,
    pub refill_per_sec: f64,
}
