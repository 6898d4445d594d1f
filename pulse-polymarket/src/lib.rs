//! Polymarket and spot-price upstreams for the pulse pipeline
//!
//! Raw payload types, the HTTP sources behind the [`MarketDataSource`] and
//! [`SpotPriceSource`] seams, and the streaming price connection.

pub mod client;
pub mod source;
pub mod spot;
pub mod stream;
pub mod types;

pub use client::{AssetFilter, PolymarketClient};
pub use source::{MarketDataSource, SpotPriceSource};
pub use spot::{CoinCapClient, CoinGeckoClient};
pub use stream::{
    ConnectionTracker, PriceStream, PriceStreamConfig, PriceStreamEvent, PriceTick,
    ReconnectPolicy,
};
pub use types::{
    RawEvent, RawMarket, RawTag, RawTrade, COINCAP_API_BASE, COINGECKO_API_BASE, DATA_API_BASE,
    GAMMA_API_BASE,
};
