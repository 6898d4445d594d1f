//! Pipeline read path
//!
//! Cache hit returns immediately. On a miss the pipeline fetches all three
//! upstreams concurrently, transforms, compares against the previous
//! snapshot, lets the insight orchestrator decide whether to regenerate, and
//! writes both cache tiers before answering. History writes are spawned and
//! never awaited.
//!
//! Every collaborator is constructed explicitly and owned here; nothing is a
//! process-wide singleton.

use std::sync::Arc;

use chrono::Utc;
use pulse_core::{
    ChangeKind, CircuitState, DerivedInsight, MarketSnapshot, PulseResult,
};
use pulse_polymarket::{
    CoinCapClient, CoinGeckoClient, MarketDataSource, PolymarketClient, SpotPriceSource,
};
use pulse_research::{InsightGenerator, OpenAiInsightGenerator};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    CacheStats, CacheTier, RedisTier, SharedTier, TwoTierCache, TwoTierCacheConfig,
    INSIGHTS_KEY, LIVE_SNAPSHOT_KEY, PREVIOUS_SNAPSHOT_KEY, PRICES_KEY,
};
use crate::change_detector::{format_changes, ChangeDetector};
use crate::circuit_breaker::BreakerStatus;
use crate::config::PulseConfig;
use crate::fetch::{FetchClient, SpotQuote, LAST_KNOWN_SOURCE};
use crate::insight::InsightOrchestrator;
use crate::rate_limiter::RateLimiterStats;
use crate::snapshot_sink::{SnapshotSink, SqliteSnapshotSink};
use crate::transformer::Transformer;

/// How fresh a served snapshot is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Freshness {
    /// Built during this call
    Fresh,
    /// Served from a cache tier
    Cached { tier: CacheTier },
}

/// A snapshot plus how it was obtained
#[derive(Debug, Clone)]
pub struct Served {
    pub snapshot: MarketSnapshot,
    pub freshness: Freshness,
    /// Kinds of change detected when this snapshot was built; empty for cache hits
    pub changes: Vec<ChangeKind>,
}

impl Served {
    pub fn is_cache_hit(&self) -> bool {
        matches!(self.freshness, Freshness::Cached { .. })
    }
}

/// External collaborators the pipeline is built from
pub struct PipelineDeps {
    pub markets: Arc<dyn MarketDataSource>,
    /// Consulted in order
    pub spot_providers: Vec<Arc<dyn SpotPriceSource>>,
    pub shared_tier: Option<Arc<dyn SharedTier>>,
    pub generator: Option<Arc<dyn InsightGenerator>>,
    pub sink: Option<Arc<dyn SnapshotSink>>,
}

impl PipelineDeps {
    /// Production collaborators for `config`
    ///
    /// Optional collaborators that fail to initialize are logged and left out:
    /// a Redis outage means local-only caching, a bad database path means no
    /// history.
    pub async fn from_config(config: &PulseConfig) -> PulseResult<Self> {
        let upstream = &config.upstream;

        let markets = PolymarketClient::with_endpoints(
            upstream.gamma_url.as_str(),
            upstream.data_api_url.as_str(),
            upstream.timeout,
        )?;

        let mut spot_providers: Vec<Arc<dyn SpotPriceSource>> = Vec::new();
        if let Some(url) = &upstream.coincap_url {
            spot_providers.push(Arc::new(CoinCapClient::with_base_url(
                url.as_str(),
                upstream.timeout,
            )?));
        }
        if let Some(url) = &upstream.coingecko_url {
            spot_providers.push(Arc::new(CoinGeckoClient::with_base_url(
                url.as_str(),
                upstream.timeout,
            )?));
        }

        let shared_tier: Option<Arc<dyn SharedTier>> = match &config.cache.redis_url {
            Some(url) => match RedisTier::connect(url).await {
                Ok(tier) => {
                    info!("[CACHE] Redis primary tier connected");
                    Some(Arc::new(tier))
                }
                Err(e) => {
                    warn!("[CACHE] Redis unavailable, using local tier only: {}", e);
                    None
                }
            },
            None => {
                info!("[CACHE] REDIS_URL not set, using local tier only");
                None
            }
        };

        let generator: Option<Arc<dyn InsightGenerator>> = if config.insights.is_active() {
            let generator = OpenAiInsightGenerator::new(config.insights.api_key.as_deref())
                .with_model(&config.insights.model);
            info!("Insight generation enabled ({})", config.insights.model);
            Some(Arc::new(generator))
        } else {
            info!("Insight generation disabled - default insights will be served");
            None
        };

        let sink: Option<Arc<dyn SnapshotSink>> = match &config.sink.db_path {
            Some(path) => match SqliteSnapshotSink::new(path) {
                Ok(sink) => {
                    info!("Snapshot history at {}", path);
                    Some(Arc::new(sink))
                }
                Err(e) => {
                    warn!("Snapshot history disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            markets: Arc::new(markets),
            spot_providers,
            shared_tier,
            generator,
            sink,
        })
    }
}

/// Overall pipeline condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHealth {
    pub status: HealthStatus,
    pub breakers: Vec<BreakerStatus>,
    pub limiters: Vec<RateLimiterStats>,
    pub cache: CacheStats,
    pub insight_generator: bool,
    pub snapshot_sink: bool,
}

pub struct Pipeline {
    config: PulseConfig,
    fetch: FetchClient,
    transformer: Transformer,
    cache: Arc<TwoTierCache>,
    detector: ChangeDetector,
    insights: InsightOrchestrator,
    has_generator: bool,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl Pipeline {
    /// Build the pipeline; fails only on unusable configuration
    pub fn new(config: PulseConfig, deps: PipelineDeps) -> PulseResult<Self> {
        config.validate()?;
        if deps.spot_providers.is_empty() {
            info!("No spot price providers configured, the fallback price will be used");
        }

        let transformer = Transformer::new()?;

        let cache = TwoTierCache::new(
            deps.shared_tier,
            TwoTierCacheConfig {
                primary_timeout: config.cache.primary_timeout,
                refresh_ttl: config.cache.live_ttl,
                breaker: config.resilience.cache_breaker.clone(),
            },
        );

        let fetch = FetchClient::new(
            deps.markets,
            deps.spot_providers,
            &config.resilience,
            config.upstream.timeout,
        );

        let has_generator = deps.generator.is_some();
        let insights = InsightOrchestrator::new(
            deps.generator,
            &config.insights,
            config.resilience.insight_limiter,
            config.resilience.insight_breaker.clone(),
        );

        Ok(Self {
            detector: ChangeDetector::new(config.thresholds),
            fetch,
            transformer,
            cache: Arc::new(cache),
            insights,
            has_generator,
            sink: deps.sink,
            config,
        })
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.cache
    }

    /// Start the periodic local-tier sweep
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        self.cache.spawn_sweeper(self.config.cache.sweep_interval)
    }

    /// Current snapshot; never fails
    pub async fn get_snapshot(&self) -> MarketSnapshot {
        self.get_snapshot_with_meta().await.snapshot
    }

    /// Current snapshot with freshness and detected change kinds
    #[instrument(skip(self))]
    pub async fn get_snapshot_with_meta(&self) -> Served {
        if let Some((snapshot, tier)) = self
            .cache
            .get_with_tier::<MarketSnapshot>(LIVE_SNAPSHOT_KEY)
            .await
        {
            debug!("[PIPELINE] Cache hit ({:?})", tier);
            return Served {
                snapshot,
                freshness: Freshness::Cached { tier },
                changes: Vec::new(),
            };
        }

        self.refresh().await
    }

    /// Build a new snapshot, bypassing the live cache entry
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Served {
        let previous: Option<MarketSnapshot> = self.cache.get(PREVIOUS_SNAPSHOT_KEY).await;
        let last_known = previous.as_ref().map(|p| p.current_price);

        let (events, quote, trades) = tokio::join!(
            self.fetch.fetch_catalog(),
            self.resolve_spot(last_known),
            self.fetch.fetch_trades(self.config.trade_limit),
        );

        let events = events.unwrap_or_else(|e| {
            warn!("[PIPELINE] Catalog skipped: {}", e);
            Vec::new()
        });
        let trades = trades.unwrap_or_else(|e| {
            warn!("[PIPELINE] Trades skipped: {}", e);
            Vec::new()
        });
        // zero makes the transformer substitute and record the default price
        let spot_price = if quote.is_fallback() {
            Decimal::ZERO
        } else {
            quote.price
        };

        let snapshot = self
            .transformer
            .transform(&events, spot_price, &trades, Utc::now());

        let changes = self.detector.detect(&snapshot, previous.as_ref());
        if changes.is_empty() {
            debug!("[PIPELINE] No significant changes");
        } else {
            info!(
                "[PIPELINE] {} significant changes\n{}",
                changes.len(),
                format_changes(&changes)
            );
        }

        let insight = match self
            .insights
            .annotate(&snapshot, &changes, previous.is_some())
            .await
        {
            Some(insight) => {
                self.cache
                    .set(INSIGHTS_KEY, &insight, self.config.cache.insights_ttl)
                    .await;
                self.spawn_insight_write(insight.clone());
                Some(insight)
            }
            None => self.cache.get::<DerivedInsight>(INSIGHTS_KEY).await,
        };

        let served = match insight {
            Some(insight) => snapshot.with_insight(insight),
            None => snapshot.clone(),
        };

        self.cache
            .set(LIVE_SNAPSHOT_KEY, &served, self.config.cache.live_ttl)
            .await;
        self.cache
            .set(PREVIOUS_SNAPSHOT_KEY, &snapshot, self.config.cache.previous_ttl)
            .await;
        self.spawn_snapshot_write(served.clone());

        info!(
            "[PIPELINE] Snapshot built: {} markets, {} targets, price {}",
            served.metadata.total_markets,
            served.price_targets.len(),
            served.current_price
        );

        Served {
            snapshot: served,
            freshness: Freshness::Fresh,
            changes: changes.iter().map(|c| c.kind).collect(),
        }
    }

    /// Spot price, cached briefly under the prices key
    pub async fn spot_price(&self) -> SpotQuote {
        if let Some(quote) = self.cache.get::<SpotQuote>(PRICES_KEY).await {
            return quote;
        }
        let last_known = self
            .cache
            .get::<MarketSnapshot>(PREVIOUS_SNAPSHOT_KEY)
            .await
            .map(|p| p.current_price);
        self.resolve_spot(last_known).await
    }

    async fn resolve_spot(&self, last_known: Option<Decimal>) -> SpotQuote {
        let quote = match self.fetch.fetch_spot_price(last_known).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!("[PIPELINE] Spot price skipped: {}", e);
                SpotQuote::fallback(last_known)
            }
        };
        // only live provider answers are cached
        if !quote.is_fallback() && quote.source != LAST_KNOWN_SOURCE {
            self.cache
                .set(PRICES_KEY, &quote, self.config.cache.prices_ttl)
                .await;
        }
        quote
    }

    /// Most recent derived insight, if one is cached
    pub async fn latest_insight(&self) -> Option<DerivedInsight> {
        self.cache.get(INSIGHTS_KEY).await
    }

    pub fn health(&self) -> PipelineHealth {
        let mut breakers = self.fetch.breaker_statuses();
        let upstream_down = breakers.iter().all(|b| b.state == CircuitState::Open);
        breakers.push(self.insights.breaker_status());

        let cache = self.cache.stats();
        if let Some(primary) = &cache.primary_breaker {
            breakers.push(primary.clone());
        }

        let mut limiters = self.fetch.limiter_stats();
        limiters.push(self.insights.limiter_stats());

        let status = if upstream_down {
            HealthStatus::Unavailable
        } else if breakers.iter().any(|b| b.state != CircuitState::Closed) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        PipelineHealth {
            status,
            breakers,
            limiters,
            cache,
            insight_generator: self.has_generator && self.config.insights.enabled,
            snapshot_sink: self.sink.is_some(),
        }
    }

    fn spawn_snapshot_write(&self, snapshot: MarketSnapshot) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = sink.save_snapshot(&snapshot).await {
                warn!("[PIPELINE] {} snapshot write failed: {}", sink.name(), e);
            }
        });
    }

    fn spawn_insight_write(&self, insight: DerivedInsight) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = sink.save_insight(&insight).await {
                warn!("[PIPELINE] {} insight write failed: {}", sink.name(), e);
            }
        });
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("fetch", &self.fetch)
            .field("cache", &self.cache)
            .field("insights", &self.insights)
            .finish()
    }
}
