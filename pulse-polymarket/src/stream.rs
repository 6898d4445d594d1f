//! Streaming price connection
//!
//! A lazily-started WebSocket connection to the Polymarket market channel.
//! Connection lifecycle is an explicit state machine
//! (`Disconnected -> Connecting -> Connected -> Disconnected`) with bounded
//! exponential backoff and a maximum retry count. Callers interact through
//! `subscribe`/`unsubscribe` and a broadcast receiver of [`PriceStreamEvent`]s.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use pulse_core::{ConnectionState, PulseError, PulseResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Polymarket market-channel WebSocket URL
pub const MARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Keepalive interval expected by the market channel
const PING_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Reconnect policy and state machine
// ============================================================================

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Tracks connection state and consecutive failed attempts
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
    failed_attempts: u32,
    policy: ReconnectPolicy,
}

impl ConnectionTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// `Disconnected -> Connecting`
    pub fn begin_connect(&mut self) -> PulseResult<()> {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            other => Err(PulseError::internal(format!(
                "cannot connect while {}",
                other
            ))),
        }
    }

    /// `Connecting -> Connected`, clearing the failure count
    pub fn connected(&mut self) -> PulseResult<()> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                self.failed_attempts = 0;
                Ok(())
            }
            other => Err(PulseError::internal(format!(
                "cannot complete connection while {}",
                other
            ))),
        }
    }

    /// Any state `-> Disconnected`
    ///
    /// Returns the delay before the next attempt, or `None` when the retry
    /// budget is spent.
    pub fn disconnected(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.policy.delay_for(self.failed_attempts)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Latest traded or quoted price for one outcome token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceTick {
    pub asset_id: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceStreamEvent {
    Price(PriceTick),
    State { state: ConnectionState },
}

#[derive(Debug, Serialize)]
struct MarketSubscribeMessage {
    assets_ids: Vec<String>,
    #[serde(rename = "type")]
    msg_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct MarketMessage {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    price: Option<Value>,
    #[serde(default)]
    best_bid: Option<Value>,
    #[serde(default)]
    best_ask: Option<Value>,
    #[serde(default)]
    changes: Vec<MarketChange>,
}

#[derive(Debug, Deserialize)]
struct MarketChange {
    #[serde(default)]
    price: Option<Value>,
}

fn value_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

impl MarketMessage {
    fn tick(&self, now: DateTime<Utc>) -> Option<PriceTick> {
        let asset_id = self.asset_id.clone()?;
        let price = match self.event_type.as_deref() {
            Some("last_trade_price") => self.price.as_ref().and_then(value_decimal),
            Some("price_change") => {
                let bid = self.best_bid.as_ref().and_then(value_decimal);
                let ask = self.best_ask.as_ref().and_then(value_decimal);
                match (bid, ask) {
                    (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
                    _ => self
                        .changes
                        .first()
                        .and_then(|c| c.price.as_ref())
                        .and_then(value_decimal),
                }
            }
            _ => None,
        }?;

        Some(PriceTick {
            asset_id,
            price,
            timestamp: now,
        })
    }
}

/// Extract price ticks from one text frame (single object or array)
pub fn parse_ticks(text: &str, now: DateTime<Utc>) -> Vec<PriceTick> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<MarketMessage>(item).ok())
        .filter_map(|msg| msg.tick(now))
        .collect()
}

// ============================================================================
// Price stream
// ============================================================================

#[derive(Debug, Clone)]
pub struct PriceStreamConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for PriceStreamConfig {
    fn default() -> Self {
        Self {
            url: MARKET_WS_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug)]
enum StreamCommand {
    Subscribe { asset_ids: Vec<String> },
    Unsubscribe,
}

/// Subscribe/unsubscribe handle over a reconnecting price connection
pub struct PriceStream {
    events_tx: broadcast::Sender<PriceStreamEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    command_tx: mpsc::Sender<StreamCommand>,
}

impl PriceStream {
    /// Spawn the connection task; nothing connects until the first subscription
    pub fn start(config: PriceStreamConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(100);
        let subscriptions = Arc::new(RwLock::new(HashSet::new()));

        tokio::spawn(connection_loop(
            config,
            events_tx.clone(),
            state_tx,
            command_rx,
            Arc::clone(&subscriptions),
        ));

        Self {
            events_tx,
            state_rx,
            subscriptions,
            command_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn events(&self) -> broadcast::Receiver<PriceStreamEvent> {
        self.events_tx.subscribe()
    }

    pub async fn subscribe(&self, asset_ids: Vec<String>) -> PulseResult<()> {
        let fresh: Vec<String> = {
            let mut subs = self.subscriptions.write().await;
            asset_ids.into_iter().filter(|id| subs.insert(id.clone())).collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        self.command_tx
            .send(StreamCommand::Subscribe { asset_ids: fresh })
            .await
            .map_err(|_| PulseError::internal("price stream task stopped"))
    }

    /// Stop forwarding ticks for the given assets
    ///
    /// The market channel has no server-side unsubscribe, so filtering is local.
    pub async fn unsubscribe(&self, asset_ids: Vec<String>) -> PulseResult<()> {
        {
            let mut subs = self.subscriptions.write().await;
            for id in &asset_ids {
                subs.remove(id);
            }
        }

        self.command_tx
            .send(StreamCommand::Unsubscribe)
            .await
            .map_err(|_| PulseError::internal("price stream task stopped"))
    }
}

impl std::fmt::Debug for PriceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceStream")
            .field("state", &self.state())
            .finish()
    }
}

fn publish_state(
    state: ConnectionState,
    state_tx: &watch::Sender<ConnectionState>,
    events_tx: &broadcast::Sender<PriceStreamEvent>,
) {
    state_tx.send_replace(state);
    let _ = events_tx.send(PriceStreamEvent::State { state });
}

async fn connection_loop(
    config: PriceStreamConfig,
    events_tx: broadcast::Sender<PriceStreamEvent>,
    state_tx: watch::Sender<ConnectionState>,
    mut command_rx: mpsc::Receiver<StreamCommand>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
) {
    let mut tracker = ConnectionTracker::new(config.reconnect);

    info!("[PRICE_STREAM] Waiting for subscriptions before connecting");
    loop {
        match command_rx.recv().await {
            Some(StreamCommand::Subscribe { .. }) => break,
            Some(StreamCommand::Unsubscribe) => {}
            None => return,
        }
    }

    loop {
        if let Err(e) = tracker.begin_connect() {
            error!("[PRICE_STREAM] {}", e);
            return;
        }
        publish_state(tracker.state(), &state_tx, &events_tx);
        info!("[PRICE_STREAM] Connecting to {}", config.url);

        match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                if let Err(e) = tracker.connected() {
                    error!("[PRICE_STREAM] {}", e);
                    return;
                }
                publish_state(tracker.state(), &state_tx, &events_tx);
                info!("[PRICE_STREAM] Connected");

                let (mut write, mut read) = ws_stream.split();

                let current: Vec<String> = subscriptions.read().await.iter().cloned().collect();
                if !current.is_empty() {
                    let msg = MarketSubscribeMessage {
                        assets_ids: current,
                        msg_type: "market",
                    };
                    if let Ok(json) = serde_json::to_string(&msg) {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            warn!("[PRICE_STREAM] Failed to subscribe: {}", e);
                        }
                    }
                }

                let mut ping_timer = interval(PING_INTERVAL);

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let subs = subscriptions.read().await;
                                    for tick in parse_ticks(&text, Utc::now()) {
                                        if subs.contains(&tick.asset_id) {
                                            let _ = events_tx.send(PriceStreamEvent::Price(tick));
                                        }
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        warn!("[PRICE_STREAM] Failed to send pong: {}", e);
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    info!("[PRICE_STREAM] Connection closed by server");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("[PRICE_STREAM] Error: {}", e);
                                    break;
                                }
                                None => {
                                    info!("[PRICE_STREAM] Stream ended");
                                    break;
                                }
                                _ => {}
                            }
                        }

                        cmd = command_rx.recv() => {
                            match cmd {
                                Some(StreamCommand::Subscribe { asset_ids }) => {
                                    let msg = MarketSubscribeMessage {
                                        assets_ids: asset_ids,
                                        msg_type: "market",
                                    };
                                    if let Ok(json) = serde_json::to_string(&msg) {
                                        if let Err(e) = write.send(Message::Text(json.into())).await {
                                            warn!("[PRICE_STREAM] Failed to send subscribe: {}", e);
                                            break;
                                        }
                                    }
                                }
                                Some(StreamCommand::Unsubscribe) => {
                                    debug!("[PRICE_STREAM] Unsubscribe applied locally");
                                }
                                None => {
                                    info!("[PRICE_STREAM] Handle dropped, closing connection");
                                    let _ = write.send(Message::Close(None)).await;
                                    tracker.disconnected();
                                    publish_state(tracker.state(), &state_tx, &events_tx);
                                    return;
                                }
                            }
                        }

                        _ = ping_timer.tick() => {
                            if let Err(e) = write.send(Message::Text("PING".to_string().into())).await {
                                warn!("[PRICE_STREAM] Failed to send ping: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!("[PRICE_STREAM] Connection failed: {}", e);
            }
        }

        let next_delay = tracker.disconnected();
        publish_state(tracker.state(), &state_tx, &events_tx);

        match next_delay {
            Some(delay) => {
                info!(
                    "[PRICE_STREAM] Reconnecting in {:?} (attempt {})",
                    delay,
                    tracker.failed_attempts()
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    "[PRICE_STREAM] Max reconnect attempts ({}) reached",
                    config.reconnect.max_attempts
                );
                return;
            }
        }
    }
}
