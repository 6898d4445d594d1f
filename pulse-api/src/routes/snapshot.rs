//! Snapshot, insight and price endpoints

use axum::{
    extract::State,
    http::{HeaderName, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use pulse_core::{ChangeKind, MarketSnapshot};
use serde::Serialize;
use tracing::info;

use crate::AppState;

/// `HIT` when the snapshot came from either cache tier, `MISS` otherwise
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Number of significant changes detected while building the snapshot
pub const X_CHANGES_DETECTED: HeaderName = HeaderName::from_static("x-changes-detected");

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Response for a forced refresh
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub snapshot: MarketSnapshot,
    pub changes: Vec<ChangeKind>,
}

/// Create snapshot routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/snapshot/refresh", post(refresh_snapshot))
        .route("/insights", get(get_insights))
        .route("/price", get(get_price))
}

/// Current snapshot, cached when possible
async fn get_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let served = state.pipeline.get_snapshot_with_meta().await;
    let cache = if served.is_cache_hit() { "HIT" } else { "MISS" };

    (
        [
            (X_CACHE, cache.to_string()),
            (X_CHANGES_DETECTED, served.changes.len().to_string()),
        ],
        Json(served.snapshot),
    )
}

/// Rebuild the snapshot regardless of the live cache entry
async fn refresh_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    info!("Forced snapshot refresh requested");
    let served = state.pipeline.refresh().await;

    (
        [
            (X_CACHE, "MISS".to_string()),
            (X_CHANGES_DETECTED, served.changes.len().to_string()),
        ],
        Json(RefreshResponse {
            snapshot: served.snapshot,
            changes: served.changes,
        }),
    )
}

/// Latest derived insight
async fn get_insights(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.latest_insight().await {
        Some(insight) => (StatusCode::OK, Json(insight)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No insight generated yet".to_string(),
            }),
        )
            .into_response(),
    }
}

/// Spot price with the provider that supplied it
async fn get_price(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.spot_price().await)
}
