//! Two-tier cache
//!
//! A primary shared tier (Redis, may be unavailable) backed by a local
//! in-process tier. Reads try the primary first and refresh the local tier on
//! a hit; any primary miss or failure falls through to the local tier. Writes
//! go to both tiers, with primary failures logged rather than raised. The local
//! tier alone is enough to honor TTLs during a primary outage.
//!
//! Values are stored as JSON strings in both tiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use pulse_core::{PulseError, PulseResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};

/// Cache key for the final, annotated snapshot
pub const LIVE_SNAPSHOT_KEY: &str = "polymarket:live";

/// Cache key for the un-annotated snapshot used by change detection
pub const PREVIOUS_SNAPSHOT_KEY: &str = "polymarket:previous";

/// Cache key for the latest derived insight
pub const INSIGHTS_KEY: &str = "polymarket:insights";

/// Cache key for the spot price
pub const PRICES_KEY: &str = "polymarket:prices";

// ============================================================================
// Primary tier
// ============================================================================

/// Value read from the shared tier, with its remaining lifetime when known
#[derive(Debug, Clone, PartialEq)]
pub struct SharedValue {
    pub value: String,
    pub ttl: Option<Duration>,
}

/// Network-backed cache tier shared between processes
#[async_trait]
pub trait SharedTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> PulseResult<Option<SharedValue>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> PulseResult<()>;

    async fn delete(&self, key: &str) -> PulseResult<()>;
}

/// Redis-backed shared tier
#[derive(Clone)]
pub struct RedisTier {
    conn: redis::aio::ConnectionManager,
}

impl RedisTier {
    pub async fn connect(url: &str) -> PulseResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| PulseError::config(format!("Invalid REDIS_URL: {}", e)))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| PulseError::cache(format!("Redis connection failed: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedTier for RedisTier {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> PulseResult<Option<SharedValue>> {
        let mut conn = self.conn.clone();
        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| PulseError::cache(format!("Redis GET {}: {}", key, e)))?;

        Ok(value.map(|value| SharedValue {
            value,
            ttl: u64::try_from(pttl).ok().map(Duration::from_millis),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> PulseResult<()> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(|e| PulseError::cache(format!("Redis SET {}: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> PulseResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| PulseError::cache(format!("Redis DEL {}: {}", key, e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTier").finish()
    }
}

// ============================================================================
// Local tier
// ============================================================================

/// Cached value with its expiry; owned by the local tier
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process fallback tier
#[derive(Debug, Default)]
pub struct LocalTier {
    entries: DashMap<String, CacheEntry<String>>,
}

impl LocalTier {
    /// Unexpired value for `key`; expired entries are dropped on read
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            if entry.is_expired_at(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        };

        if value.is_none() {
            self.entries.remove_if(key, |_, e| e.is_expired_at(now));
        }
        value
    }

    pub fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Evict expired entries, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Two-tier cache
// ============================================================================

/// Which tier served a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Primary,
    Local,
}

#[derive(Debug, Clone)]
pub struct TwoTierCacheConfig {
    /// Per-operation timeout on the primary tier
    pub primary_timeout: Duration,
    /// Local lifetime for primary hits whose remaining TTL is unknown
    pub refresh_ttl: Duration,
    /// Breaker guarding the primary tier
    pub breaker: CircuitBreakerConfig,
}

impl Default for TwoTierCacheConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(2),
            refresh_ttl: Duration::from_secs(60),
            breaker: CircuitBreakerConfig::new("Redis", 5, Duration::from_secs(10)),
        }
    }
}

/// Cache usage counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub primary_configured: bool,
    pub primary_hits: u64,
    pub local_hits: u64,
    pub misses: u64,
    pub primary_errors: u64,
    pub local_entries: usize,
    pub primary_breaker: Option<BreakerStatus>,
}

pub struct TwoTierCache {
    primary: Option<Arc<dyn SharedTier>>,
    local: LocalTier,
    breaker: CircuitBreaker,
    config: TwoTierCacheConfig,
    primary_hits: AtomicU64,
    local_hits: AtomicU64,
    misses: AtomicU64,
    primary_errors: AtomicU64,
}

impl TwoTierCache {
    pub fn new(primary: Option<Arc<dyn SharedTier>>, config: TwoTierCacheConfig) -> Self {
        Self {
            primary,
            local: LocalTier::default(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            config,
            primary_hits: AtomicU64::new(0),
            local_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            primary_errors: AtomicU64::new(0),
        }
    }

    /// Local tier only
    pub fn local_only() -> Self {
        Self::new(None, TwoTierCacheConfig::default())
    }

    fn note_primary_error(&self, op: &str, key: &str, error: &PulseError) {
        self.primary_errors.fetch_add(1, Ordering::Relaxed);
        warn!("[CACHE] primary {} {} failed: {}", op, key, error);
    }

    async fn primary_get(&self, key: &str) -> Option<SharedValue> {
        let primary = self.primary.as_ref()?;
        let timeout = self.config.primary_timeout;

        self.breaker
            .call(
                move || async move {
                    let result = tokio::time::timeout(timeout, primary.get(key))
                        .await
                        .map_err(|_| PulseError::cache("primary tier timed out"))
                        .and_then(|r| r);
                    if let Err(e) = &result {
                        self.note_primary_error("get", key, e);
                    }
                    result
                },
                || None,
            )
            .await
    }

    /// Raw string lookup, reporting which tier answered
    pub async fn get_raw(&self, key: &str) -> Option<(String, CacheTier)> {
        if let Some(shared) = self.primary_get(key).await {
            let ttl = shared.ttl.unwrap_or(self.config.refresh_ttl);
            self.local.set(key, shared.value.clone(), ttl);
            self.primary_hits.fetch_add(1, Ordering::Relaxed);
            return Some((shared.value, CacheTier::Primary));
        }

        match self.local.get(key) {
            Some(value) => {
                self.local_hits.fetch_add(1, Ordering::Relaxed);
                Some((value, CacheTier::Local))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Typed lookup, reporting which tier answered
    ///
    /// A value that no longer deserializes is treated as a miss and evicted.
    pub async fn get_with_tier<T: DeserializeOwned>(&self, key: &str) -> Option<(T, CacheTier)> {
        let (raw, tier) = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some((value, tier)),
            Err(e) => {
                warn!("[CACHE] dropping undecodable entry {}: {}", key, e);
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_tier(key).await.map(|(value, _)| value)
    }

    /// Write to both tiers; primary failures are logged, never raised
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[CACHE] failed to serialize {}: {}", key, e);
                return;
            }
        };

        self.local.set(key, raw.clone(), ttl);

        if let Some(primary) = &self.primary {
            let timeout = self.config.primary_timeout;
            self.breaker
                .call(
                    move || async move {
                        let result = tokio::time::timeout(timeout, primary.set(key, &raw, ttl))
                            .await
                            .map_err(|_| PulseError::cache("primary tier timed out"))
                            .and_then(|r| r);
                        if let Err(e) = &result {
                            self.note_primary_error("set", key, e);
                        }
                        result
                    },
                    || (),
                )
                .await;
        }
        debug!("[CACHE] set {} (ttl {:?})", key, ttl);
    }

    pub async fn delete(&self, key: &str) {
        self.local.delete(key);

        if let Some(primary) = &self.primary {
            let timeout = self.config.primary_timeout;
            self.breaker
                .call(
                    move || async move {
                        let result = tokio::time::timeout(timeout, primary.delete(key))
                            .await
                            .map_err(|_| PulseError::cache("primary tier timed out"))
                            .and_then(|r| r);
                        if let Err(e) = &result {
                            self.note_primary_error("delete", key, e);
                        }
                        result
                    },
                    || (),
                )
                .await;
        }
    }

    /// Evict expired local entries now
    pub fn sweep(&self) -> usize {
        self.local.sweep()
    }

    /// Periodically sweep the local tier until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    debug!("[CACHE] sweeper stopping, cache dropped");
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    info!("[CACHE] swept {} expired entries", removed);
                }
            }
        })
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            primary_configured: self.primary.is_some(),
            primary_hits: self.primary_hits.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            primary_errors: self.primary_errors.load(Ordering::Relaxed),
            local_entries: self.local.len(),
            primary_breaker: self.primary.as_ref().map(|_| self.breaker.status()),
        }
    }
}

impl std::fmt::Debug for TwoTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("primary", &self.primary.as_ref().map(|p| p.name().to_string()))
            .field("local_entries", &self.local.len())
            .finish()
    }
}
