//! Significant snapshot-to-snapshot changes

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Kind of significant change detected between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    PriceMove,
    SentimentShift,
    ProbabilityChange,
    VolumeSpike,
}

impl ChangeKind {
    /// Rank used when picking the single most significant change (lower wins)
    pub fn priority(self) -> u8 {
        match self {
            ChangeKind::PriceMove => 0,
            ChangeKind::VolumeSpike => 1,
            ChangeKind::SentimentShift => 2,
            ChangeKind::ProbabilityChange => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::PriceMove => "PRICE_MOVE",
            ChangeKind::SentimentShift => "SENTIMENT_SHIFT",
            ChangeKind::ProbabilityChange => "PROBABILITY_CHANGE",
            ChangeKind::VolumeSpike => "VOLUME_SPIKE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One triggered significance check
///
/// Produced fresh on every detection cycle. Only its description text is
/// ever carried forward (into a derived insight's trigger line).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Tracked market the change applies to, for per-market checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub previous_value: Decimal,
    pub current_value: Decimal,
    /// Relative change in percent, absolute change in points, or `(ratio - 1) * 100`
    /// for volume spikes
    pub percent_or_point_change: Decimal,
    pub description: String,
}

impl ChangeEvent {
    /// `[KIND] description` line used in prompts and trigger labels
    pub fn summary_line(&self) -> String {
        format!("[{}] {}", self.kind, self.description)
    }
}
