//! API route definitions

mod health;
pub mod snapshot;
mod stream;

#[cfg(test)]
mod tests;

use axum::Router;
use crate::AppState;

/// Create all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(snapshot::routes())
        .merge(health::routes())
}

/// Create WebSocket routes (separate from API)
pub fn ws_routes() -> Router<AppState> {
    stream::routes()
}
