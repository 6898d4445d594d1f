//! End-to-end pipeline behaviour against in-memory upstreams

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{
    ChangeKind, DerivedInsight, Direction, InsightSource, MarketSnapshot, PulseError, PulseResult,
    Sentiment,
};
use pulse_polymarket::{MarketDataSource, RawEvent, RawTrade, SpotPriceSource};
use pulse_research::{GeneratedInsight, InsightGenerator, InsightRequest};
use pulse_services::{
    CacheTier, Freshness, HealthStatus, Pipeline, PipelineDeps, PulseConfig, SharedTier,
    SharedValue, SnapshotSink, SnapshotSinkError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

// ============================================================================
// Fakes
// ============================================================================

struct FakeMarkets {
    events: Vec<RawEvent>,
    trades: Vec<RawTrade>,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FakeMarkets {
    fn new(events: serde_json::Value, trades: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            events: serde_json::from_value(events).unwrap(),
            trades: serde_json::from_value(trades).unwrap(),
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn spec_example() -> Arc<Self> {
        Self::new(
            json!([
                {"title": "BTC above $100,000 by 2026", "outcomePrices": ["0.12", "0.88"], "volume": 5000000}
            ]),
            json!([
                {"side": "buy", "size": 5},
                {"side": "sell", "size": 1}
            ]),
        )
    }

    fn down() -> Arc<Self> {
        let markets = Self::new(json!([]), json!([]));
        markets.down.store(true, Ordering::SeqCst);
        markets
    }

    fn check(&self) -> PulseResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(PulseError::upstream("503 Service Unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketDataSource for FakeMarkets {
    async fn fetch_events(&self) -> PulseResult<Vec<RawEvent>> {
        self.check()?;
        Ok(self.events.clone())
    }

    async fn fetch_trades(&self, limit: usize) -> PulseResult<Vec<RawTrade>> {
        self.check()?;
        Ok(self.trades.iter().take(limit).cloned().collect())
    }
}

struct FakeSpot {
    price: Mutex<Option<Decimal>>,
}

impl FakeSpot {
    fn at(price: Decimal) -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(Some(price)),
        })
    }

    fn set(&self, price: Option<Decimal>) {
        *self.price.lock() = price;
    }
}

#[async_trait]
impl SpotPriceSource for FakeSpot {
    fn name(&self) -> &str {
        "FakeSpot"
    }

    async fn fetch_spot_price(&self) -> PulseResult<Decimal> {
        (*self.price.lock()).ok_or_else(|| PulseError::upstream("spot offline"))
    }
}

#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl InsightGenerator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, _request: InsightRequest<'_>) -> PulseResult<GeneratedInsight> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GeneratedInsight {
            key_observations: Some(vec![format!("observation #{}", n)]),
            ..GeneratedInsight::default()
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    snapshots: AtomicUsize,
    insights: AtomicUsize,
    broken: bool,
}

#[async_trait]
impl SnapshotSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn save_snapshot(&self, _snapshot: &MarketSnapshot) -> Result<(), SnapshotSinkError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(SnapshotSinkError::Io("disk full".to_string()));
        }
        Ok(())
    }

    async fn save_insight(&self, _insight: &DerivedInsight) -> Result<(), SnapshotSinkError> {
        self.insights.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(SnapshotSinkError::Io("disk full".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryTier {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SharedTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> PulseResult<Option<SharedValue>> {
        Ok(self.entries.lock().get(key).map(|v| SharedValue {
            value: v.clone(),
            ttl: None,
        }))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> PulseResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> PulseResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

fn deps(markets: Arc<FakeMarkets>, spot: Arc<FakeSpot>) -> PipelineDeps {
    PipelineDeps {
        markets,
        spot_providers: vec![spot],
        shared_tier: None,
        generator: None,
        sink: None,
    }
}

fn build_pipeline(deps: PipelineDeps) -> Pipeline {
    Pipeline::new(PulseConfig::default(), deps).unwrap()
}

async fn settle(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_single_event_snapshot() {
    let pipeline = build_pipeline(deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000))));

    let served = pipeline.get_snapshot_with_meta().await;
    assert_eq!(served.freshness, Freshness::Fresh);

    let snapshot = served.snapshot;
    assert_eq!(snapshot.price_targets.len(), 1);
    assert_eq!(snapshot.price_targets[0].label, "↑ $100,000");
    assert_eq!(snapshot.price_targets[0].direction, Direction::Up);
    assert_eq!(snapshot.price_targets[0].probability, dec!(12));
    assert_eq!(snapshot.sentiment, Sentiment::Bullish);
    assert_eq!(snapshot.buy_sell_ratio, dec!(5.0));
    assert_eq!(snapshot.current_price, dec!(95000));
}

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let markets = FakeMarkets::spec_example();
    let pipeline = build_pipeline(deps(markets.clone(), FakeSpot::at(dec!(95000))));

    let first = pipeline.get_snapshot_with_meta().await;
    let calls = markets.calls.load(Ordering::SeqCst);

    let second = pipeline.get_snapshot_with_meta().await;
    assert!(second.is_cache_hit());
    assert_eq!(
        second.freshness,
        Freshness::Cached {
            tier: CacheTier::Local
        }
    );
    assert!(second.changes.is_empty());
    assert_eq!(second.snapshot, first.snapshot);
    assert_eq!(markets.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_shared_tier_serves_other_instances() {
    let tier = Arc::new(MemoryTier::default());

    let mut writer_deps = deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000)));
    writer_deps.shared_tier = Some(tier.clone());
    let writer = build_pipeline(writer_deps);
    let built = writer.get_snapshot().await;

    let reader_markets = FakeMarkets::down();
    let mut reader_deps = deps(reader_markets.clone(), FakeSpot::at(dec!(1)));
    reader_deps.shared_tier = Some(tier);
    let reader = build_pipeline(reader_deps);

    let served = reader.get_snapshot_with_meta().await;
    assert_eq!(
        served.freshness,
        Freshness::Cached {
            tier: CacheTier::Primary
        }
    );
    assert_eq!(served.snapshot, built);
    assert_eq!(reader_markets.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_insight_generated_on_cold_start_then_carried_forward() {
    let generator = Arc::new(CountingGenerator::default());
    let mut deps = deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000)));
    deps.generator = Some(generator.clone());
    let mut config = PulseConfig::default();
    config.insights.api_key = Some("test".to_string());
    let pipeline = Pipeline::new(config, deps).unwrap();

    let first = pipeline.refresh().await;
    let insight = first.snapshot.derived_insight.clone().unwrap();
    assert_eq!(insight.source, InsightSource::Generated);
    assert_eq!(insight.key_observations, vec!["observation #1"]);
    assert!(insight.triggered_by.is_none());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    // unchanged market: no new generation, previous insight reused
    let second = pipeline.refresh().await;
    assert!(second.changes.is_empty());
    assert_eq!(second.snapshot.derived_insight, Some(insight.clone()));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.latest_insight().await, Some(insight));
}

#[tokio::test]
async fn test_price_move_regenerates_insight() {
    let generator = Arc::new(CountingGenerator::default());
    let spot = FakeSpot::at(dec!(95000));
    let mut deps = deps(FakeMarkets::spec_example(), spot.clone());
    deps.generator = Some(generator.clone());
    let mut config = PulseConfig::default();
    config.insights.api_key = Some("test".to_string());
    let pipeline = Pipeline::new(config, deps).unwrap();

    pipeline.refresh().await;
    spot.set(Some(dec!(99000)));
    let served = pipeline.refresh().await;

    assert_eq!(served.freshness, Freshness::Fresh);
    assert_eq!(served.changes, vec![ChangeKind::PriceMove]);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

    let insight = served.snapshot.derived_insight.unwrap();
    assert_eq!(insight.key_observations, vec!["observation #2"]);
    assert!(insight
        .triggered_by
        .as_deref()
        .is_some_and(|t| t.starts_with("[PRICE_MOVE]")));
}

#[tokio::test]
async fn test_disabled_generator_serves_default_insight() {
    let pipeline = build_pipeline(deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000))));

    let snapshot = pipeline.get_snapshot().await;
    let insight = snapshot.derived_insight.unwrap();
    assert_eq!(insight.source, InsightSource::Default);
    assert!(!pipeline.health().insight_generator);
}

#[tokio::test]
async fn test_upstream_outage_serves_defaults() {
    let spot = FakeSpot::at(dec!(0));
    spot.set(None);
    let pipeline = build_pipeline(deps(FakeMarkets::down(), spot));

    let snapshot = pipeline.get_snapshot().await;

    assert_eq!(snapshot.current_price, dec!(95000));
    assert_eq!(snapshot.price_targets.len(), 8);
    assert_eq!(snapshot.sentiment, Sentiment::Neutral);
    let defaults = &snapshot.metadata.defaults_applied;
    assert!(defaults.iter().any(|d| d == "priceTargets"));
    assert!(defaults.iter().any(|d| d == "currentPrice"));
}

#[tokio::test]
async fn test_spot_outage_keeps_last_known_price() {
    let spot = FakeSpot::at(dec!(97000));
    let pipeline = build_pipeline(deps(FakeMarkets::spec_example(), spot.clone()));

    pipeline.refresh().await;
    spot.set(None);
    pipeline.cache().delete(pulse_services::PRICES_KEY).await;

    let served = pipeline.refresh().await;
    assert_eq!(served.snapshot.current_price, dec!(97000));
    assert!(served.snapshot.metadata.defaults_applied.is_empty());

    let quote = pipeline.spot_price().await;
    assert_eq!(quote.price, dec!(97000));
    assert_eq!(quote.source, "last-known");
}

#[tokio::test]
async fn test_history_writes_do_not_block_or_fail_reads() {
    let sink = Arc::new(RecordingSink::default());
    let mut ok_deps = deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000)));
    ok_deps.sink = Some(sink.clone());
    let ok_pipeline = build_pipeline(ok_deps);

    ok_pipeline.refresh().await;
    settle(|| sink.snapshots.load(Ordering::SeqCst) == 1 && sink.insights.load(Ordering::SeqCst) == 1)
        .await;
    assert_eq!(sink.snapshots.load(Ordering::SeqCst), 1);
    assert_eq!(sink.insights.load(Ordering::SeqCst), 1);
    assert!(ok_pipeline.health().snapshot_sink);

    let broken = Arc::new(RecordingSink {
        broken: true,
        ..RecordingSink::default()
    });
    let mut broken_deps = deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000)));
    broken_deps.sink = Some(broken.clone());
    let broken_pipeline = build_pipeline(broken_deps);

    let served = broken_pipeline.refresh().await;
    assert_eq!(served.snapshot.current_price, dec!(95000));
    settle(|| broken.snapshots.load(Ordering::SeqCst) == 1).await;
    assert_eq!(broken.snapshots.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health_reflects_breaker_states() {
    let markets = FakeMarkets::down();
    let spot = FakeSpot::at(dec!(95000));
    let pipeline = build_pipeline(deps(markets, spot.clone()));
    assert_eq!(pipeline.health().status, HealthStatus::Healthy);

    for _ in 0..3 {
        pipeline.refresh().await;
    }
    assert_eq!(pipeline.health().status, HealthStatus::Degraded);

    spot.set(None);
    for _ in 0..3 {
        pipeline.refresh().await;
    }
    let health = pipeline.health();
    assert_eq!(health.status, HealthStatus::Unavailable);
    assert!(health.breakers.iter().any(|b| b.name == "FakeSpot"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = PulseConfig::default();
    config.upstream.timeout = Duration::ZERO;
    let result = Pipeline::new(
        config,
        deps(FakeMarkets::spec_example(), FakeSpot::at(dec!(95000))),
    );
    assert!(result.is_err());
}
