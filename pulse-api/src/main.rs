//! Bitcoin Market Pulse API Server
//!
//! Serves the pipeline's snapshot, insight, price and health reads over HTTP.

mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use pulse_polymarket::PriceStream;
use pulse_services::{Pipeline, PipelineDeps, PulseConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Streaming outcome prices (optional - requires PRICE_STREAM_ASSETS)
    pub price_stream: Option<Arc<PriceStream>>,
}

/// Build the router for a given state
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([
            routes::snapshot::X_CACHE,
            routes::snapshot::X_CHANGES_DETECTED,
        ]);

    Router::new()
        .nest("/api", routes::api_routes())
        .merge(routes::ws_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env.local wins over .env; neither has to exist
    for file in [".env.local", ".env"] {
        if let Err(e) = dotenvy::from_filename(file) {
            if !matches!(e, dotenvy::Error::Io(_)) {
                eprintln!("Warning: Failed to load {}: {}", file, e);
            }
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pulse_api=debug")),
        )
        .init();

    info!("Starting Bitcoin Market Pulse API");

    let config = PulseConfig::from_env()?;
    let port = config.server_port;
    let stream_settings = config.stream.clone();

    let deps = PipelineDeps::from_config(&config).await?;
    let pipeline = Arc::new(Pipeline::new(config, deps)?);
    let _sweeper = pipeline.spawn_cache_sweeper();

    // Warm the cache so the first request is a hit
    let warm = Arc::clone(&pipeline);
    tokio::spawn(async move {
        let served = warm.refresh().await;
        info!(
            "Initial snapshot ready: {} targets, price {}",
            served.snapshot.price_targets.len(),
            served.snapshot.current_price
        );
    });

    let price_stream = if stream_settings.is_active() {
        let stream = PriceStream::start(stream_settings.connection.clone());
        match stream.subscribe(stream_settings.assets.clone()).await {
            Ok(()) => info!(
                "[PRICE_STREAM] Subscribed to {} assets",
                stream_settings.assets.len()
            ),
            Err(e) => warn!("[PRICE_STREAM] Initial subscription failed: {}", e),
        }
        Some(Arc::new(stream))
    } else {
        info!("Price stream not configured (PRICE_STREAM_ASSETS not set)");
        None
    };

    let state = AppState {
        pipeline,
        price_stream,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
