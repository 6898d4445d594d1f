//! WebSocket relay for streamed outcome prices

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use pulse_polymarket::PriceStreamEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::AppState;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws/prices", get(ws_handler))
}

/// WebSocket upgrade handler; 404 when no price stream is configured
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let Some(stream) = state.price_stream.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    info!("[PRICE_STREAM] Relay client connected");
    let events = stream.events();
    ws.on_upgrade(move |socket| relay(socket, events))
}

/// Forward stream events to one client until either side goes away
async fn relay(socket: WebSocket, mut events: broadcast::Receiver<PriceStreamEvent>) {
    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[PRICE_STREAM] Relay lagged, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("[PRICE_STREAM] Failed to encode event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Client messages are ignored; we only watch for the close
    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    send_task.abort();
    debug!("[PRICE_STREAM] Relay client disconnected");
}
