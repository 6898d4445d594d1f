//! Upstream source seams
//!
//! The fetch layer talks to these traits rather than to concrete HTTP
//! clients so each source can be swapped or faked independently.

use async_trait::async_trait;
use pulse_core::PulseResult;
use rust_decimal::Decimal;

use crate::types::{RawEvent, RawTrade};

/// Prediction-market catalog and trade feed
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Active events concerning the tracked asset
    async fn fetch_events(&self) -> PulseResult<Vec<RawEvent>>;

    /// Most recent trades, newest first
    async fn fetch_trades(&self, limit: usize) -> PulseResult<Vec<RawTrade>>;
}

/// One independent spot-price endpoint
#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Current USD price of the tracked asset
    async fn fetch_spot_price(&self) -> PulseResult<Decimal>;
}
