//! Core types for the Bitcoin market pulse pipeline
//!
//! This crate defines the canonical snapshot model served to presentation
//! callers, the change events used to decide when analysis is regenerated,
//! and the error taxonomy shared by every other crate in the workspace.

pub mod change;
pub mod error;
pub mod format;
pub mod insight;
pub mod snapshot;
pub mod state;

pub use change::{ChangeEvent, ChangeKind};
pub use error::{PulseError, PulseResult};
pub use insight::{DerivedInsight, InsightSource, RiskAssessment, RiskLevel, RiskNote};
pub use snapshot::{
    Direction, MarketCategory, MarketSnapshot, NetFlow, PriceConsensus, PriceTarget, RecentTrade,
    RiskFactor, RiskKind, Sentiment, SnapshotMetadata, TradeFlow, TradeSide, VolumeCategory,
    SNAPSHOT_ASSET, SNAPSHOT_SOURCE,
};
pub use state::{CircuitState, ConnectionState};
