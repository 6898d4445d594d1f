//! Guarded upstream access
//!
//! Every upstream call is admitted by a token bucket first; a denial returns
//! `PulseError::RateLimited` without touching the breaker. Admitted calls run
//! under a timeout inside the source's circuit breaker, whose fallback is the
//! degraded value for that source.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::{PulseError, PulseResult};
use pulse_polymarket::{MarketDataSource, RawEvent, RawTrade, SpotPriceSource};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
use crate::config::{LimiterSettings, ResilienceConfig};
use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::transformer::fallback_spot_price;

/// Limiter, breaker, and timeout for one upstream
#[derive(Debug)]
pub struct UpstreamGuard {
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl UpstreamGuard {
    pub fn new(
        name: &str,
        limiter: LimiterSettings,
        breaker: CircuitBreakerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(name, limiter.max_tokens, limiter.refill_per_sec),
            breaker: CircuitBreaker::new(breaker),
            timeout,
        }
    }

    /// Admit, then run `op` through the breaker with `fallback` on failure
    pub async fn run<T, F, Fut, FB>(&self, op: F, fallback: FB) -> PulseResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PulseResult<T>>,
        FB: FnOnce() -> T,
    {
        if !self.limiter.acquire() {
            return Err(PulseError::rate_limited(self.limiter.name()));
        }
        Ok(self.call(op, fallback).await)
    }

    /// Run `op` through the breaker only; admission is the caller's concern
    async fn call<T, F, Fut, FB>(&self, op: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PulseResult<T>>,
        FB: FnOnce() -> T,
    {
        let timeout = self.timeout;
        let name = self.breaker.name();
        self.breaker
            .call(
                move || async move {
                    match tokio::time::timeout(timeout, op()).await {
                        Ok(result) => result,
                        Err(_) => Err(PulseError::upstream(format!(
                            "{} timed out after {:?}",
                            name, timeout
                        ))),
                    }
                },
                fallback,
            )
            .await
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    pub fn limiter_stats(&self) -> RateLimiterStats {
        self.limiter.stats()
    }
}

/// Source label for the last-resort constant price
pub const FALLBACK_SOURCE: &str = "fallback";

/// Source label for a previously observed price
pub const LAST_KNOWN_SOURCE: &str = "last-known";

/// Spot price with the provider that supplied it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    pub price: Decimal,
    pub source: String,
}

impl SpotQuote {
    /// Quote used when no price is known at all
    pub fn fallback(last_known: Option<Decimal>) -> Self {
        match last_known {
            Some(price) if price > Decimal::ZERO => Self {
                price,
                source: LAST_KNOWN_SOURCE.to_string(),
            },
            _ => Self {
                price: fallback_spot_price(),
                source: FALLBACK_SOURCE.to_string(),
            },
        }
    }

    /// True when the price is the fixed constant rather than an observation
    pub fn is_fallback(&self) -> bool {
        self.source == FALLBACK_SOURCE
    }
}

struct SpotProvider {
    source: Arc<dyn SpotPriceSource>,
    breaker: CircuitBreaker,
}

/// Typed accessors for the catalog, the trade feed, and the spot price
pub struct FetchClient {
    markets: Arc<dyn MarketDataSource>,
    catalog: UpstreamGuard,
    trades: UpstreamGuard,
    spot_limiter: RateLimiter,
    spot_providers: Vec<SpotProvider>,
    timeout: Duration,
}

impl FetchClient {
    /// `spot_sources` are consulted in the given order
    pub fn new(
        markets: Arc<dyn MarketDataSource>,
        spot_sources: Vec<Arc<dyn SpotPriceSource>>,
        resilience: &ResilienceConfig,
        timeout: Duration,
    ) -> Self {
        let spot_providers = spot_sources
            .into_iter()
            .map(|source| {
                let config = CircuitBreakerConfig::new(
                    source.name(),
                    resilience.spot_breaker.failure_threshold,
                    resilience.spot_breaker.cooldown,
                );
                SpotProvider {
                    source,
                    breaker: CircuitBreaker::new(config),
                }
            })
            .collect();

        Self {
            markets,
            catalog: UpstreamGuard::new(
                "catalog",
                resilience.catalog_limiter,
                resilience.catalog_breaker.clone(),
                timeout,
            ),
            trades: UpstreamGuard::new(
                "trades",
                resilience.trades_limiter,
                resilience.trades_breaker.clone(),
                timeout,
            ),
            spot_limiter: RateLimiter::new(
                "spot",
                resilience.spot_limiter.max_tokens,
                resilience.spot_limiter.refill_per_sec,
            ),
            spot_providers,
            timeout,
        }
    }

    /// Active catalog events; empty when the upstream is failing
    #[instrument(skip(self))]
    pub async fn fetch_catalog(&self) -> PulseResult<Vec<RawEvent>> {
        let markets = &self.markets;
        let events = self
            .catalog
            .run(|| markets.fetch_events(), Vec::new)
            .await?;
        debug!("Catalog returned {} events", events.len());
        Ok(events)
    }

    /// Recent trades; empty when the upstream is failing
    #[instrument(skip(self))]
    pub async fn fetch_trades(&self, limit: usize) -> PulseResult<Vec<RawTrade>> {
        let markets = &self.markets;
        let trades = self
            .trades
            .run(|| markets.fetch_trades(limit), Vec::new)
            .await?;
        debug!("Trade feed returned {} trades", trades.len());
        Ok(trades)
    }

    /// Spot price from the first provider that answers
    ///
    /// Falls back to `last_known`, then to the fixed last-resort price.
    #[instrument(skip(self))]
    pub async fn fetch_spot_price(&self, last_known: Option<Decimal>) -> PulseResult<SpotQuote> {
        if !self.spot_limiter.acquire() {
            return Err(PulseError::rate_limited(self.spot_limiter.name()));
        }

        let timeout = self.timeout;
        for provider in &self.spot_providers {
            let source = &provider.source;
            let price = provider
                .breaker
                .call(
                    move || async move {
                        match tokio::time::timeout(timeout, source.fetch_spot_price()).await {
                            Ok(Ok(price)) if price > Decimal::ZERO => Ok(Some(price)),
                            Ok(Ok(price)) => Err(PulseError::malformed(format!(
                                "{} returned non-positive price {}",
                                source.name(),
                                price
                            ))),
                            Ok(Err(e)) => Err(e),
                            Err(_) => Err(PulseError::upstream(format!(
                                "{} timed out",
                                source.name()
                            ))),
                        }
                    },
                    || None,
                )
                .await;

            if let Some(price) = price {
                return Ok(SpotQuote {
                    price,
                    source: source.name().to_string(),
                });
            }
            warn!("Spot provider {} unavailable, trying next", source.name());
        }

        let quote = SpotQuote::fallback(last_known);
        info!(
            "All spot providers failed, using {} price {}",
            quote.source, quote.price
        );
        Ok(quote)
    }

    /// Breakers for catalog, trades, and each spot provider, in that order
    pub fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        let mut statuses = vec![self.catalog.breaker_status(), self.trades.breaker_status()];
        statuses.extend(self.spot_providers.iter().map(|p| p.breaker.status()));
        statuses
    }

    pub fn limiter_stats(&self) -> Vec<RateLimiterStats> {
        vec![
            self.catalog.limiter_stats(),
            self.trades.limiter_stats(),
            self.spot_limiter.stats(),
        ]
    }
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field(
                "spot_providers",
                &self
                    .spot_providers
                    .iter()
                    .map(|p| p.source.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}
