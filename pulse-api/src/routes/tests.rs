use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use pulse_core::{PulseError, PulseResult};
use pulse_polymarket::{MarketDataSource, RawEvent, RawTrade, SpotPriceSource};
use pulse_services::{Pipeline, PipelineDeps, PulseConfig};
use rust_decimal::Decimal;
use tower::ServiceExt;

use super::snapshot::{X_CACHE, X_CHANGES_DETECTED};
use crate::{app, AppState};

struct StaticMarkets {
    down: AtomicBool,
}

#[async_trait]
impl MarketDataSource for StaticMarkets {
    async fn fetch_events(&self) -> PulseResult<Vec<RawEvent>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PulseError::upstream("catalog offline"));
        }
        let events = serde_json::json!([
            {"title": "Will Bitcoin reach $150,000?", "outcomePrices": ["0.05", "0.95"], "volume": 1000000}
        ]);
        serde_json::from_value(events).map_err(|e| PulseError::malformed(e.to_string()))
    }

    async fn fetch_trades(&self, _limit: usize) -> PulseResult<Vec<RawTrade>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PulseError::upstream("trades offline"));
        }
        Ok(Vec::new())
    }
}

struct StaticSpot {
    down: AtomicBool,
}

#[async_trait]
impl SpotPriceSource for StaticSpot {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_spot_price(&self) -> PulseResult<Decimal> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PulseError::upstream("spot offline"));
        }
        Ok(Decimal::from(96_000))
    }
}

fn state(down: bool) -> AppState {
    let deps = PipelineDeps {
        markets: Arc::new(StaticMarkets {
            down: AtomicBool::new(down),
        }),
        spot_providers: vec![Arc::new(StaticSpot {
            down: AtomicBool::new(down),
        })],
        shared_tier: None,
        generator: None,
        sink: None,
    };
    AppState {
        pipeline: Arc::new(Pipeline::new(PulseConfig::default(), deps).unwrap()),
        price_stream: None,
    }
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    router.clone().oneshot(request(Method::GET, uri)).await.unwrap()
}

#[tokio::test]
async fn test_snapshot_cache_headers() {
    let router = app(state(false));

    let first = get(&router, "/api/snapshot").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[X_CACHE], "MISS");
    assert_eq!(first.headers()[X_CHANGES_DETECTED], "0");

    let second = get(&router, "/api/snapshot").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()[X_CACHE], "HIT");
}

#[tokio::test]
async fn test_refresh_is_always_a_miss() {
    let router = app(state(false));
    get(&router, "/api/snapshot").await;

    let response = router
        .clone()
        .oneshot(request(Method::POST, "/api/snapshot/refresh"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[X_CACHE], "MISS");
}

#[tokio::test]
async fn test_insights_available_after_first_snapshot() {
    let router = app(state(false));
    assert_eq!(get(&router, "/api/insights").await.status(), StatusCode::NOT_FOUND);

    get(&router, "/api/snapshot").await;
    assert_eq!(get(&router, "/api/insights").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_price_and_liveness() {
    let router = app(state(false));
    assert_eq!(get(&router, "/api/price").await.status(), StatusCode::OK);
    assert_eq!(get(&router, "/api/health/live").await.status(), StatusCode::OK);
    assert_eq!(get(&router, "/api/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_unavailable_when_every_upstream_breaker_is_open() {
    let state = state(true);
    for _ in 0..3 {
        state.pipeline.refresh().await;
    }
    let router = app(state);

    // snapshots are still served from defaults
    assert_eq!(get(&router, "/api/snapshot").await.status(), StatusCode::OK);
    assert_eq!(
        get(&router, "/api/health").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_price_relay_absent_without_stream() {
    let router = app(state(false));
    let response = get(&router, "/ws/prices").await;
    assert_ne!(response.status(), StatusCode::OK);
}
