//! Polymarket HTTP client
//!
//! Reads the Gamma catalog and the public Data API trade feed. Neither
//! endpoint requires authentication.

use async_trait::async_trait;
use pulse_core::{PulseError, PulseResult};
use reqwest::{header::CACHE_CONTROL, Client};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::source::MarketDataSource;
use crate::types::{RawEvent, RawTrade, DATA_API_BASE, GAMMA_API_BASE};

/// Upstream-side cache hint for the catalog
const CATALOG_MAX_AGE_SECS: u64 = 60;

/// Upstream-side cache hint for the trade feed
const TRADES_MAX_AGE_SECS: u64 = 30;

/// Catalog page size
const CATALOG_LIMIT: u32 = 100;

/// Which catalog events count as concerning the tracked asset
#[derive(Debug, Clone)]
pub struct AssetFilter {
    /// Lowercase keywords matched against title and description
    pub keywords: Vec<String>,
    /// Tag slugs or labels, matched case-insensitively
    pub tag_slugs: Vec<String>,
}

impl Default for AssetFilter {
    fn default() -> Self {
        Self {
            keywords: vec!["bitcoin".to_string(), "btc".to_string()],
            tag_slugs: vec![
                "crypto".to_string(),
                "bitcoin".to_string(),
                "btc".to_string(),
            ],
        }
    }
}

/// Client for the Polymarket catalog and trade feed
#[derive(Clone)]
pub struct PolymarketClient {
    http: Client,
    gamma_base: String,
    data_api_base: String,
    filter: AssetFilter,
}

impl PolymarketClient {
    /// Create a client against the public endpoints
    pub fn new(timeout: Duration) -> PulseResult<Self> {
        Self::with_endpoints(GAMMA_API_BASE, DATA_API_BASE, timeout)
    }

    /// Create a client against custom base URLs
    pub fn with_endpoints(
        gamma_base: impl Into<String>,
        data_api_base: impl Into<String>,
        timeout: Duration,
    ) -> PulseResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PulseError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            gamma_base: gamma_base.into().trim_end_matches('/').to_string(),
            data_api_base: data_api_base.into().trim_end_matches('/').to_string(),
            filter: AssetFilter::default(),
        })
    }

    pub fn with_filter(mut self, filter: AssetFilter) -> Self {
        self.filter = filter;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, max_age_secs: u64) -> PulseResult<T> {
        debug!("Fetching {}", url);

        let response = self
            .http
            .get(url)
            .header(CACHE_CONTROL, format!("max-age={}", max_age_secs))
            .send()
            .await
            .map_err(|e| PulseError::upstream(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PulseError::upstream(format!(
                "Polymarket API error ({}): {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PulseError::malformed(format!("Failed to parse {}: {}", url, e)))
    }
}

#[async_trait]
impl MarketDataSource for PolymarketClient {
    #[instrument(skip(self))]
    async fn fetch_events(&self) -> PulseResult<Vec<RawEvent>> {
        let url = format!(
            "{}/events?active=true&closed=false&limit={}",
            self.gamma_base, CATALOG_LIMIT
        );
        let events: Vec<RawEvent> = self.get_json(&url, CATALOG_MAX_AGE_SECS).await?;
        let total = events.len();

        let relevant: Vec<RawEvent> = events
            .into_iter()
            .filter(|e| e.mentions_asset(&self.filter.keywords, &self.filter.tag_slugs))
            .collect();

        debug!("Catalog returned {} events, {} relevant", total, relevant.len());
        Ok(relevant)
    }

    #[instrument(skip(self))]
    async fn fetch_trades(&self, limit: usize) -> PulseResult<Vec<RawTrade>> {
        let url = format!("{}/trades?limit={}", self.data_api_base, limit);
        self.get_json(&url, TRADES_MAX_AGE_SECS).await
    }
}

impl std::fmt::Debug for PolymarketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketClient")
            .field("gamma_base", &self.gamma_base)
            .field("data_api_base", &self.data_api_base)
            .finish()
    }
}
