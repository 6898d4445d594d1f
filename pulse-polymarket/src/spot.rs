//! Spot price providers
//!
//! Two independent public endpoints, consulted in a fixed order by the
//! fetch layer. Each returns a single USD price.

use async_trait::async_trait;
use pulse_core::{PulseError, PulseResult};
use reqwest::{header::CACHE_CONTROL, Client};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::instrument;

use crate::source::SpotPriceSource;
use crate::types::{
    decimal_from_value, CoinCapAssetResponse, CoinGeckoSimplePrice, COINCAP_API_BASE,
    COINGECKO_API_BASE,
};

const SPOT_MAX_AGE_SECS: u64 = 30;

fn build_http(timeout: Duration) -> PulseResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PulseError::config(format!("Failed to build HTTP client: {}", e)))
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &Client,
    provider: &str,
    url: &str,
) -> PulseResult<T> {
    let response = http
        .get(url)
        .header(CACHE_CONTROL, format!("max-age={}", SPOT_MAX_AGE_SECS))
        .send()
        .await
        .map_err(|e| PulseError::upstream(format!("{} request failed: {}", provider, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PulseError::upstream(format!(
            "{} API error ({})",
            provider, status
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| PulseError::malformed(format!("{} response: {}", provider, e)))
}

fn positive_price(provider: &str, price: Option<Decimal>) -> PulseResult<Decimal> {
    match price {
        Some(p) if p > Decimal::ZERO => Ok(p.round_dp(2)),
        Some(p) => Err(PulseError::malformed(format!(
            "{} returned non-positive price {}",
            provider, p
        ))),
        None => Err(PulseError::malformed(format!("{} returned no price", provider))),
    }
}

/// CoinCap `assets/bitcoin` endpoint
#[derive(Debug, Clone)]
pub struct CoinCapClient {
    http: Client,
    base_url: String,
}

impl CoinCapClient {
    pub fn new(timeout: Duration) -> PulseResult<Self> {
        Self::with_base_url(COINCAP_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> PulseResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SpotPriceSource for CoinCapClient {
    fn name(&self) -> &str {
        "CoinCap"
    }

    #[instrument(skip(self))]
    async fn fetch_spot_price(&self) -> PulseResult<Decimal> {
        let url = format!("{}/assets/bitcoin", self.base_url);
        let body: CoinCapAssetResponse = get_json(&self.http, self.name(), &url).await?;
        positive_price(
            self.name(),
            body.data.price_usd.as_ref().and_then(decimal_from_value),
        )
    }
}

/// CoinGecko `simple/price` endpoint
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    http: Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(timeout: Duration) -> PulseResult<Self> {
        Self::with_base_url(COINGECKO_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> PulseResult<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SpotPriceSource for CoinGeckoClient {
    fn name(&self) -> &str {
        "CoinGecko"
    }

    #[instrument(skip(self))]
    async fn fetch_spot_price(&self) -> PulseResult<Decimal> {
        let url = format!(
            "{}/simple/price?ids=bitcoin&vs_currencies=usd",
            self.base_url
        );
        let body: CoinGeckoSimplePrice = get_json(&self.http, self.name(), &url).await?;
        positive_price(
            self.name(),
            body.bitcoin.usd.as_ref().and_then(decimal_from_value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_coincap_payload() {
        let body: CoinCapAssetResponse =
            serde_json::from_value(json!({ "data": { "priceUsd": "95123.456789" } })).unwrap();
        let price = positive_price("CoinCap", body.data.price_usd.as_ref().and_then(decimal_from_value));
        assert_eq!(price, Ok(dec!(95123.46)));
    }

    #[test]
    fn test_coingecko_payload() {
        let body: CoinGeckoSimplePrice =
            serde_json::from_value(json!({ "bitcoin": { "usd": 94000 } })).unwrap();
        let price = positive_price("CoinGecko", body.bitcoin.usd.as_ref().and_then(decimal_from_value));
        assert_eq!(price, Ok(dec!(94000)));
    }

    #[test]
    fn test_missing_or_zero_price_is_malformed() {
        assert!(matches!(
            positive_price("X", None),
            Err(PulseError::MalformedPayload(_))
        ));
        assert!(positive_price("X", Some(Decimal::ZERO)).is_err());
    }
}
