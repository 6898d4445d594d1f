//! Health check endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use pulse_core::ConnectionState;
use pulse_services::{HealthStatus, PipelineHealth};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    #[serde(flatten)]
    pipeline: PipelineHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    price_stream: Option<ConnectionState>,
}

/// Health check handler
///
/// 503 only when every upstream breaker is open; degraded still serves.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pipeline = state.pipeline.health();

    let code = if pipeline.status == HealthStatus::Unavailable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = HealthResponse {
        pipeline,
        price_stream: state.price_stream.as_ref().map(|s| s.state()),
    };

    (code, Json(response))
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}
