//! Service layer for the Bitcoin market pulse pipeline
//!
//! Fetches upstream data behind rate limiters and circuit breakers, turns it
//! into a [`pulse_core::MarketSnapshot`], detects significant changes against
//! the previous snapshot, and serves the result through a two-tier cache.

pub mod cache;
pub mod change_detector;
pub mod circuit_breaker;
pub mod config;
pub mod fetch;
pub mod insight;
pub mod pipeline;
pub mod rate_limiter;
pub mod risk_factors;
pub mod snapshot_sink;
pub mod transformer;

pub use cache::{
    CacheStats, CacheTier, LocalTier, RedisTier, SharedTier, SharedValue, TwoTierCache,
    TwoTierCacheConfig, INSIGHTS_KEY, LIVE_SNAPSHOT_KEY, PREVIOUS_SNAPSHOT_KEY, PRICES_KEY,
};
pub use change_detector::{format_changes, most_significant, ChangeDetector, ChangeThresholds};
pub use circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
pub use config::{
    CacheConfig, InsightConfig, LimiterSettings, PulseConfig, ResilienceConfig, SinkConfig,
    StreamSettings, UpstreamConfig,
};
pub use fetch::{FetchClient, SpotQuote, UpstreamGuard};
pub use insight::InsightOrchestrator;
pub use pipeline::{Freshness, HealthStatus, Pipeline, PipelineDeps, PipelineHealth, Served};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use risk_factors::{default_risk_factors, extract_risk_factors};
pub use snapshot_sink::{SnapshotSink, SnapshotSinkError, SqliteSnapshotSink};
pub use transformer::{summarize_trades, TradeSummary, Transformer};
