//! Environment-driven configuration
//!
//! Every nested section has a `Default` matching the documented constants, so
//! `PulseConfig::default()` is a working local setup and `from_env()` only
//! overrides what the environment provides.

use std::str::FromStr;
use std::time::Duration;

use pulse_core::{PulseError, PulseResult};
use pulse_polymarket::{
    PriceStreamConfig, COINCAP_API_BASE, COINGECKO_API_BASE, DATA_API_BASE, GAMMA_API_BASE,
};

use crate::change_detector::ChangeThresholds;
use crate::circuit_breaker::CircuitBreakerConfig;

/// Upstream endpoints and request timeout
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub gamma_url: String,
    pub data_api_url: String,
    pub coincap_url: Option<String>,
    pub coingecko_url: Option<String>,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            gamma_url: GAMMA_API_BASE.to_string(),
            data_api_url: DATA_API_BASE.to_string(),
            coincap_url: Some(COINCAP_API_BASE.to_string()),
            coingecko_url: Some(COINGECKO_API_BASE.to_string()),
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Cache lifetimes and the optional shared tier
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: Option<String>,
    pub live_ttl: Duration,
    pub previous_ttl: Duration,
    pub insights_ttl: Duration,
    pub prices_ttl: Duration,
    pub sweep_interval: Duration,
    pub primary_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            live_ttl: Duration::from_secs(60),
            previous_ttl: Duration::from_secs(300),
            insights_ttl: Duration::from_secs(300),
            prices_ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            primary_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl InsightConfig {
    /// Generation is attempted only when enabled and a key is present
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: pulse_research::DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Token bucket parameters
#[derive(Debug, Clone, Copy)]
pub struct LimiterSettings {
    pub max_tokens: f64,
    pub refill_per_sec: f64,
}

impl LimiterSettings {
    pub const fn new(max_tokens: f64, refill_per_sec: f64) -> Self {
        Self {
            max_tokens,
            refill_per_sec,
        }
    }
}

/// Rate limiter and circuit breaker settings per dependency
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub catalog_limiter: LimiterSettings,
    pub trades_limiter: LimiterSettings,
    pub spot_limiter: LimiterSettings,
    pub insight_limiter: LimiterSettings,
    pub catalog_breaker: CircuitBreakerConfig,
    pub trades_breaker: CircuitBreakerConfig,
    pub spot_breaker: CircuitBreakerConfig,
    pub insight_breaker: CircuitBreakerConfig,
    pub cache_breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            catalog_limiter: LimiterSettings::new(10.0, 2.0),
            trades_limiter: LimiterSettings::new(20.0, 5.0),
            spot_limiter: LimiterSettings::new(10.0, 2.0),
            insight_limiter: LimiterSettings::new(3.0, 0.2),
            catalog_breaker: CircuitBreakerConfig::new("Gamma", 3, Duration::from_secs(30)),
            trades_breaker: CircuitBreakerConfig::new("Trades", 3, Duration::from_secs(30)),
            spot_breaker: CircuitBreakerConfig::new("SpotPrice", 3, Duration::from_secs(30)),
            insight_breaker: CircuitBreakerConfig::new("Insight", 2, Duration::from_secs(60)),
            cache_breaker: CircuitBreakerConfig::new("Redis", 5, Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SinkConfig {
    /// SQLite file for snapshot history; `None` disables persistence
    pub db_path: Option<String>,
}

/// Streaming price connection; inactive without asset ids
#[derive(Debug, Clone, Default)]
pub struct StreamSettings {
    pub connection: PriceStreamConfig,
    /// Outcome token ids subscribed at startup
    pub assets: Vec<String>,
}

impl StreamSettings {
    pub fn is_active(&self) -> bool {
        !self.assets.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PulseConfig {
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub insights: InsightConfig,
    pub resilience: ResilienceConfig,
    pub sink: SinkConfig,
    pub stream: StreamSettings,
    pub thresholds: ChangeThresholds,
    pub server_port: u16,
    /// Trades requested per refresh
    pub trade_limit: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            insights: InsightConfig::default(),
            resilience: ResilienceConfig::default(),
            sink: SinkConfig::default(),
            stream: StreamSettings::default(),
            thresholds: ChangeThresholds::default(),
            server_port: 3001,
            trade_limit: 100,
        }
    }
}

impl PulseConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> PulseResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup, for tests and embedding
    pub fn from_lookup<F>(lookup: F) -> PulseResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("GAMMA_API_URL") {
            config.upstream.gamma_url = url;
        }
        if let Some(url) = get("DATA_API_URL") {
            config.upstream.data_api_url = url;
        }
        if let Some(url) = get("COINCAP_API_URL") {
            config.upstream.coincap_url = Some(url);
        }
        if let Some(url) = get("COINGECKO_API_URL") {
            config.upstream.coingecko_url = Some(url);
        }
        if let Some(ms) = parse_var::<u64>("UPSTREAM_TIMEOUT_MS", get("UPSTREAM_TIMEOUT_MS"))? {
            config.upstream.timeout = Duration::from_millis(ms);
        }

        config.cache.redis_url = get("REDIS_URL");

        config.insights.api_key = get("OPENAI_API_KEY");
        if let Some(enabled) = get("ENABLE_AI_INSIGHTS") {
            config.insights.enabled = parse_bool("ENABLE_AI_INSIGHTS", &enabled)?;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            config.insights.model = model;
        }

        config.sink.db_path = get("SNAPSHOT_DB_PATH");

        if let Some(url) = get("PRICE_STREAM_URL") {
            config.stream.connection.url = url;
        }
        if let Some(assets) = get("PRICE_STREAM_ASSETS") {
            config.stream.assets = assets
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(port) = parse_var::<u16>("SERVER_PORT", get("SERVER_PORT"))? {
            config.server_port = port;
        }

        Ok(config)
    }

    /// Reject configurations that can never produce market data
    pub fn validate(&self) -> PulseResult<()> {
        let has_spot = self.upstream.coincap_url.is_some() || self.upstream.coingecko_url.is_some();
        if self.upstream.gamma_url.trim().is_empty() && !has_spot {
            return Err(PulseError::config(
                "no catalog URL and no spot price provider configured",
            ));
        }
        if self.upstream.timeout.is_zero() {
            return Err(PulseError::config("UPSTREAM_TIMEOUT_MS must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, raw: Option<String>) -> PulseResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.parse::<T>()
            .map_err(|e| PulseError::config(format!("{}={:?} is invalid: {}", key, v, e)))
    })
    .transpose()
}

fn parse_bool(key: &str, raw: &str) -> PulseResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PulseError::config(format!(
            "{}={:?} is not a boolean",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PulseConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_port, 3001);
        assert_eq!(config.upstream.timeout, Duration::from_millis(10_000));
        assert_eq!(config.insights.model, "gpt-4o-mini");
        assert!(config.cache.redis_url.is_none());
        assert!(config.sink.db_path.is_none());
        assert!(!config.insights.is_active());
        assert!(!config.stream.is_active());
        assert_eq!(config.resilience.insight_breaker.failure_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = PulseConfig::from_lookup(lookup(&[
            ("SERVER_PORT", "8080"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ENABLE_AI_INSIGHTS", "false"),
            ("UPSTREAM_TIMEOUT_MS", "2500"),
            ("SNAPSHOT_DB_PATH", "data/pulse.db"),
            ("PRICE_STREAM_ASSETS", "111, 222,,"),
        ]))
        .unwrap();

        assert_eq!(config.server_port, 8080);
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.upstream.timeout, Duration::from_millis(2500));
        assert_eq!(config.sink.db_path.as_deref(), Some("data/pulse.db"));
        assert!(!config.insights.is_active());
        assert_eq!(config.stream.assets, vec!["111", "222"]);
        assert!(config.stream.is_active());
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = PulseConfig::from_lookup(lookup(&[("SERVER_PORT", "abc")])).unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));

        let err = PulseConfig::from_lookup(lookup(&[("ENABLE_AI_INSIGHTS", "maybe")])).unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }

    #[test]
    fn test_validate_requires_some_source() {
        let mut config = PulseConfig::default();
        config.upstream.gamma_url = String::new();
        assert!(config.validate().is_ok());

        config.upstream.coincap_url = None;
        config.upstream.coingecko_url = None;
        assert!(matches!(config.validate(), Err(PulseError::Config(_))));
    }
}
