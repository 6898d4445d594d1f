//! Raw upstream payload types
//!
//! Upstream JSON is loosely shaped: numbers arrive as strings or numbers,
//! `outcomePrices` is sometimes a JSON-encoded string, and any field may be
//! missing. Everything here is optional and tolerant on the way in. The
//! transformer applies defaults when it reads these values.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Base URL for the Polymarket Gamma API (market catalog)
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Base URL for the public Polymarket Data API (trade feed)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Base URL for the CoinCap v2 API (spot provider A)
pub const COINCAP_API_BASE: &str = "https://api.coincap.io/v2";

/// Base URL for the CoinGecko v3 API (spot provider B)
pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

// ============================================================================
// Lenient value parsing
// ============================================================================

/// Read a decimal from a JSON number or numeric string
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        Value::String(s) => parse_decimal_str(s.trim()),
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Parse an outcome-price pair into (yes, no) fractions
///
/// Accepts a JSON array of strings or numbers, or a string containing such an
/// array (`"[\"0.12\", \"0.88\"]"`), or a bare comma-separated pair.
pub fn parse_outcome_pair(value: &Value) -> Option<(Decimal, Decimal)> {
    match value {
        Value::Array(items) if items.len() >= 2 => {
            let yes = decimal_from_value(&items[0])?;
            let no = decimal_from_value(&items[1]).unwrap_or(Decimal::ONE - yes);
            Some((yes, no))
        }
        Value::String(s) => {
            if let Ok(inner) = serde_json::from_str::<Value>(s) {
                if inner.is_array() {
                    return parse_outcome_pair(&inner);
                }
            }
            let parts: Vec<&str> = s
                .trim_matches(|c| c == '[' || c == ']')
                .split(',')
                .map(|p| p.trim().trim_matches('"'))
                .collect();
            if parts.len() >= 2 {
                let yes = parse_decimal_str(parts[0])?;
                let no = parse_decimal_str(parts[1]).unwrap_or(Decimal::ONE - yes);
                return Some((yes, no));
            }
            None
        }
        _ => None,
    }
}

// ============================================================================
// Gamma catalog
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTag {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// Market nested inside a catalog event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarket {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub group_item_title: Option<String>,
    #[serde(default)]
    pub outcome_prices: Option<Value>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub volume_num: Option<Value>,
}

impl RawMarket {
    /// Display title: group item title, then question
    pub fn title(&self) -> Option<&str> {
        self.group_item_title
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.question.as_deref().filter(|s| !s.trim().is_empty()))
    }

    /// Yes/no fractions, if the pair is present and parseable
    pub fn outcome_pair(&self) -> Option<(Decimal, Decimal)> {
        self.outcome_prices.as_ref().and_then(parse_outcome_pair)
    }

    /// Traded volume, preferring the numeric field
    pub fn volume(&self) -> Option<Decimal> {
        self.volume_num
            .as_ref()
            .and_then(decimal_from_value)
            .or_else(|| self.volume.as_ref().and_then(decimal_from_value))
    }
}

/// Catalog event grouping one or more markets
///
/// Single-market events sometimes carry `outcomePrices` and `volume` at the
/// event level with no nested `markets`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub outcome_prices: Option<Value>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub markets: Vec<RawMarket>,
}

impl RawEvent {
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Event volume, falling back to the sum of its markets
    pub fn volume(&self) -> Option<Decimal> {
        if let Some(v) = self.volume.as_ref().and_then(decimal_from_value) {
            return Some(v);
        }
        let mut any = false;
        let mut total = Decimal::ZERO;
        for v in self.markets.iter().filter_map(RawMarket::volume) {
            any = true;
            total = total.saturating_add(v);
        }
        any.then_some(total)
    }

    /// Nested markets, or the event itself viewed as a single market
    pub fn markets_or_self(&self) -> Vec<RawMarket> {
        if !self.markets.is_empty() {
            return self.markets.clone();
        }
        vec![RawMarket {
            id: self.id.clone(),
            question: self.title.clone(),
            group_item_title: None,
            outcome_prices: self.outcome_prices.clone(),
            volume: self.volume.clone(),
            volume_num: None,
        }]
    }

    /// Whether the event concerns the tracked asset
    pub fn mentions_asset(&self, keywords: &[String], tag_slugs: &[String]) -> bool {
        let text = format!(
            "{} {}",
            self.title.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        if keywords.iter().any(|k| text.contains(k.as_str())) {
            return true;
        }

        self.tags.iter().any(|tag| {
            [tag.slug.as_deref(), tag.label.as_deref()]
                .into_iter()
                .flatten()
                .any(|t| tag_slugs.iter().any(|s| s.eq_ignore_ascii_case(t)))
        })
    }
}

// ============================================================================
// Trade feed
// ============================================================================

/// One trade from the public trade feed
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub size: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    /// Market reference; the data API puts a human title in `title`
    #[serde(default, alias = "title")]
    pub market: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl RawTrade {
    /// True only for an explicit buy side
    pub fn is_buy(&self) -> bool {
        self.side
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("buy"))
            .unwrap_or(false)
    }

    pub fn size(&self) -> Option<Decimal> {
        self.size.as_ref().and_then(decimal_from_value)
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price.as_ref().and_then(decimal_from_value)
    }
}

// ============================================================================
// Spot price providers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CoinCapAssetResponse {
    pub data: CoinCapAsset,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinCapAsset {
    #[serde(default)]
    pub price_usd: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct CoinGeckoSimplePrice {
    pub bitcoin: CoinGeckoQuote,
}

#[derive(Debug, Deserialize)]
pub struct CoinGeckoQuote {
    #[serde(default)]
    pub usd: Option<Value>,
}
