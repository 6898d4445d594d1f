//! Canonical market snapshot model
//!
//! A [`MarketSnapshot`] is built once per pipeline cycle from raw upstream
//! payloads, may be annotated once with a [`DerivedInsight`], and is treated
//! as immutable after it has been cached. The next cycle builds a new one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::format::{format_thousands, format_volume};
use crate::insight::{DerivedInsight, InsightSource, RiskAssessment, RiskLevel, RiskNote};

/// Source label carried in every snapshot's metadata
pub const SNAPSHOT_SOURCE: &str = "Polymarket Direct API";

/// Asset the pipeline tracks
pub const SNAPSHOT_ASSET: &str = "Bitcoin (BTC)";

// ============================================================================
// Sentiment
// ============================================================================

/// Trade-flow sentiment derived from the buy/sell ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    /// Ratio above which flow is bullish
    pub fn bullish_threshold() -> Decimal {
        Decimal::new(15, 1)
    }

    /// Ratio below which flow is bearish
    pub fn bearish_threshold() -> Decimal {
        Decimal::new(67, 2)
    }

    /// Classify a buy/sell ratio
    pub fn from_ratio(ratio: Decimal) -> Self {
        if ratio > Self::bullish_threshold() {
            Sentiment::Bullish
        } else if ratio < Self::bearish_threshold() {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }

    /// Parse a free-form sentiment label
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "BULLISH" => Some(Sentiment::Bullish),
            "BEARISH" => Some(Sentiment::Bearish),
            "NEUTRAL" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Bullish => write!(f, "BULLISH"),
            Sentiment::Bearish => write!(f, "BEARISH"),
            Sentiment::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

// ============================================================================
// Price Targets
// ============================================================================

/// Direction of a price-target market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn glyph(self) -> char {
        match self {
            Direction::Up => '↑',
            Direction::Down => '↓',
        }
    }
}

/// One price-level prediction market ("BTC above $100,000")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTarget {
    /// Display label, e.g. `↑ $100,000`
    pub label: String,
    pub direction: Direction,
    /// Extracted price level in USD
    pub price: Decimal,
    /// Yes-probability in percent, within [0, 100]
    pub probability: Decimal,
    pub volume: Decimal,
}

impl PriceTarget {
    pub fn new(direction: Direction, price: Decimal, probability: Decimal, volume: Decimal) -> Self {
        Self {
            label: Self::label_for(direction, price),
            direction,
            price,
            probability: probability.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED),
            volume: volume.max(Decimal::ZERO),
        }
    }

    /// Canonical label for a direction and price level
    pub fn label_for(direction: Direction, price: Decimal) -> String {
        format!("{} ${}", direction.glyph(), format_thousands(price))
    }
}

// ============================================================================
// Volume Breakdown
// ============================================================================

/// Category bucket every upstream event is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    #[serde(rename = "BTC Price Targets")]
    PriceTargets,
    #[serde(rename = "MicroStrategy")]
    CorporateHolder,
    #[serde(rename = "Government/Reserve")]
    Policy,
    #[serde(rename = "Technical/Protocol")]
    Protocol,
    #[serde(rename = "Exotic/Other")]
    Other,
}

impl MarketCategory {
    pub const ALL: [MarketCategory; 5] = [
        MarketCategory::PriceTargets,
        MarketCategory::CorporateHolder,
        MarketCategory::Policy,
        MarketCategory::Protocol,
        MarketCategory::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MarketCategory::PriceTargets => "BTC Price Targets",
            MarketCategory::CorporateHolder => "MicroStrategy",
            MarketCategory::Policy => "Government/Reserve",
            MarketCategory::Protocol => "Technical/Protocol",
            MarketCategory::Other => "Exotic/Other",
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Aggregate volume for one category
///
/// `percentage` is always derived from the aggregate total, never set on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeCategory {
    pub category: MarketCategory,
    pub volume: Decimal,
    pub percentage: Decimal,
}

// ============================================================================
// Trade Flow
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetFlow {
    Accumulation,
    Distribution,
}

/// A normalized recent trade (newest first in the snapshot)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentTrade {
    pub side: TradeSide,
    pub market: String,
    pub outcome: String,
    pub size: Decimal,
    pub price: Decimal,
    /// size x price
    pub value: Decimal,
}

/// Buy/sell activity over the fetched trade window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFlow {
    pub total_trades: usize,
    pub buy_orders: usize,
    pub sell_orders: usize,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    /// Share of trades that were buys, in percent
    pub buy_ratio: Decimal,
    pub sell_ratio: Decimal,
    pub net_flow: NetFlow,
}

// ============================================================================
// Risk Factors
// ============================================================================

/// Named sub-markets tracked outside the price ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    MicrostrategySells,
    MicrostrategyLiquidation,
    MicrostrategyMarginCall,
    UsNationalReserve,
    TexasReserve,
    SenateBill,
    SatoshiMovement,
    ChinaUnban,
}

impl RiskKind {
    pub fn category(self) -> MarketCategory {
        match self {
            RiskKind::MicrostrategySells
            | RiskKind::MicrostrategyLiquidation
            | RiskKind::MicrostrategyMarginCall => MarketCategory::CorporateHolder,
            RiskKind::UsNationalReserve | RiskKind::TexasReserve | RiskKind::SenateBill => {
                MarketCategory::Policy
            }
            RiskKind::SatoshiMovement | RiskKind::ChinaUnban => MarketCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub kind: RiskKind,
    pub category: MarketCategory,
    pub market_name: String,
    /// Yes-probability in percent, within [0, 100]
    pub probability: Decimal,
    pub volume: Decimal,
    /// False when the value is the documented default rather than a live quote
    pub live: bool,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Most-likely targets on each side of the current price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceConsensus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_likely_up: Option<PriceTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_likely_down: Option<PriceTarget>,
    /// Price of the most likely up target, or the current price
    pub implied_high: Decimal,
    /// Price of the most likely down target, or the current price
    pub implied_low: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub source: String,
    pub asset: String,
    pub fetched_at: DateTime<Utc>,
    pub total_markets: usize,
    pub total_volume: Decimal,
    /// Sections that were filled from documented defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defaults_applied: Vec<String>,
}

/// One fully transformed unit of market state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub metadata: SnapshotMetadata,
    pub current_price: Decimal,
    pub sentiment: Sentiment,
    pub buy_sell_ratio: Decimal,
    /// Sorted by probability descending, unique by label
    pub price_targets: Vec<PriceTarget>,
    /// Sorted by volume descending, unique by category
    pub volume_by_category: Vec<VolumeCategory>,
    pub trade_flow: TradeFlow,
    /// Newest first, bounded length
    pub recent_trades: Vec<RecentTrade>,
    pub risk_factors: Vec<RiskFactor>,
    pub consensus: PriceConsensus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_insight: Option<DerivedInsight>,
}

impl MarketSnapshot {
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.metadata.fetched_at
    }

    pub fn total_volume(&self) -> Decimal {
        self.metadata.total_volume
    }

    /// Targets in one direction, keeping the probability ordering
    pub fn targets(&self, direction: Direction) -> impl Iterator<Item = &PriceTarget> {
        self.price_targets
            .iter()
            .filter(move |t| t.direction == direction)
    }

    /// Highest-probability target in one direction
    pub fn top_target(&self, direction: Direction) -> Option<&PriceTarget> {
        self.targets(direction).next()
    }

    pub fn risk_factor(&self, kind: RiskKind) -> Option<&RiskFactor> {
        self.risk_factors.iter().find(|r| r.kind == kind)
    }

    pub fn category_volume(&self, category: MarketCategory) -> Decimal {
        self.volume_by_category
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.volume)
            .unwrap_or(Decimal::ZERO)
    }

    /// A copy of this snapshot carrying the given insight
    pub fn with_insight(&self, insight: DerivedInsight) -> Self {
        Self {
            derived_insight: Some(insight),
            ..self.clone()
        }
    }

    /// Deterministic trading insight computed from the snapshot alone
    ///
    /// Fills any field the external generator leaves out.
    pub fn baseline_insight(&self) -> DerivedInsight {
        let ratio = self.buy_sell_ratio;
        let accumulating = ratio > Decimal::ONE;

        let (rationale, recommendation) = match self.sentiment {
            Sentiment::Bullish => (
                "Market participants are ACCUMULATING positions. Strong bullish sentiment.",
                "Consider bullish positioning based on accumulation pattern.",
            ),
            Sentiment::Bearish => (
                "Market participants are DISTRIBUTING positions. Sellers dominate recent flow.",
                "Reduce exposure and watch downside targets closely.",
            ),
            Sentiment::Neutral => (
                "Market participants showing mixed sentiment.",
                "Exercise caution. Monitor sentiment closely.",
            ),
        };

        let up = self.top_target(Direction::Up);
        let down = self.top_target(Direction::Down);

        let up_line = match up {
            Some(t) => format!(
                "{} is most likely upside target at {}%",
                t.label,
                t.probability.normalize()
            ),
            None => "No active upside targets".to_string(),
        };
        let down_line = match down {
            Some(t) => format!(
                "{} downside probability at {}%",
                t.label,
                t.probability.normalize()
            ),
            None => "No active downside targets".to_string(),
        };

        let key_observations = vec![
            up_line,
            down_line,
            format!(
                "{:.2}:1 buy/sell ratio indicates {}",
                ratio,
                if accumulating { "accumulation" } else { "distribution" }
            ),
            format!("Current BTC price: ${}", format_thousands(self.current_price)),
            format!("Total market volume: {}", format_volume(self.total_volume())),
        ];

        let up_label = up.map(|t| t.label.clone()).unwrap_or_else(|| "upside".to_string());
        let down_label = down
            .map(|t| t.label.clone())
            .unwrap_or_else(|| "downside".to_string());

        let lead_strategy = match self.sentiment {
            Sentiment::Bullish => "Consider bullish options strategies (calls, bull spreads)",
            Sentiment::Bearish => "Consider protective puts or reduced position sizing",
            Sentiment::Neutral => "Favor range-bound strategies until flow picks a side",
        };

        let suggested_strategies = vec![
            lead_strategy.to_string(),
            format!("Watch for {} breakout", up_label),
            format!("Set downside alerts at {}", down_label),
            "Monitor MicroStrategy holdings for institutional sentiment".to_string(),
        ];

        DerivedInsight {
            generated_at: self.fetched_at(),
            source: InsightSource::Baseline,
            triggered_by: None,
            key_observations,
            sentiment: self.sentiment,
            rationale: rationale.to_string(),
            recommendation: recommendation.to_string(),
            suggested_strategies,
            risk_assessment: self.baseline_risk_assessment(),
            confidence: 50.0,
        }
    }

    fn baseline_risk_assessment(&self) -> RiskAssessment {
        let level_for = |p: Decimal| {
            if p < Decimal::from(5) {
                RiskLevel::Low
            } else if p < Decimal::from(20) {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            }
        };

        let corporate_risk = match self.risk_factor(RiskKind::MicrostrategySells) {
            Some(r) => RiskNote {
                level: level_for(r.probability),
                explanation: format!(
                    "Market prices a {}% chance that MicroStrategy sells Bitcoin",
                    r.probability.normalize()
                ),
            },
            None => RiskNote {
                level: RiskLevel::Unknown,
                explanation: "No corporate holder markets found".to_string(),
            },
        };

        let government_risk = match self.risk_factor(RiskKind::UsNationalReserve) {
            Some(r) => RiskNote {
                level: level_for(r.probability),
                explanation: format!(
                    "US national reserve adoption priced at {}%",
                    r.probability.normalize()
                ),
            },
            None => RiskNote {
                level: RiskLevel::Unknown,
                explanation: "No government reserve markets found".to_string(),
            },
        };

        RiskAssessment {
            corporate_risk,
            government_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(ratio: Decimal, targets: Vec<PriceTarget>) -> MarketSnapshot {
        MarketSnapshot {
            metadata: SnapshotMetadata {
                source: SNAPSHOT_SOURCE.to_string(),
                asset: SNAPSHOT_ASSET.to_string(),
                fetched_at: Utc::now(),
                total_markets: 1,
                total_volume: dec!(5000000),
                defaults_applied: Vec::new(),
            },
            current_price: dec!(95000),
            sentiment: Sentiment::from_ratio(ratio),
            buy_sell_ratio: ratio,
            price_targets: targets,
            volume_by_category: Vec::new(),
            trade_flow: TradeFlow {
                total_trades: 0,
                buy_orders: 0,
                sell_orders: 0,
                buy_volume: Decimal::ZERO,
                sell_volume: Decimal::ZERO,
                buy_ratio: Decimal::ZERO,
                sell_ratio: Decimal::ZERO,
                net_flow: NetFlow::Distribution,
            },
            recent_trades: Vec::new(),
            risk_factors: Vec::new(),
            consensus: PriceConsensus {
                most_likely_up: None,
                most_likely_down: None,
                implied_high: dec!(95000),
                implied_low: dec!(95000),
            },
            derived_insight: None,
        }
    }

    #[test]
    fn test_sentiment_thresholds() {
        assert_eq!(Sentiment::from_ratio(dec!(1.51)), Sentiment::Bullish);
        assert_eq!(Sentiment::from_ratio(dec!(1.5)), Sentiment::Neutral);
        assert_eq!(Sentiment::from_ratio(dec!(0.67)), Sentiment::Neutral);
        assert_eq!(Sentiment::from_ratio(dec!(0.66)), Sentiment::Bearish);
    }

    #[test]
    fn test_price_target_label_and_clamp() {
        let t = PriceTarget::new(Direction::Up, dec!(100000), dec!(120), dec!(-5));
        assert_eq!(t.label, "↑ $100,000");
        assert_eq!(t.probability, dec!(100));
        assert_eq!(t.volume, Decimal::ZERO);

        let d = PriceTarget::new(Direction::Down, dec!(80000), dec!(14.6), dec!(1));
        assert_eq!(d.label, "↓ $80,000");
    }

    #[test]
    fn test_baseline_insight_uses_top_targets() {
        let snap = snapshot(
            dec!(2),
            vec![
                PriceTarget::new(Direction::Up, dec!(100000), dec!(12), dec!(1)),
                PriceTarget::new(Direction::Down, dec!(80000), dec!(9), dec!(1)),
            ],
        );

        let insight = snap.baseline_insight();
        assert_eq!(insight.source, InsightSource::Baseline);
        assert_eq!(insight.sentiment, Sentiment::Bullish);
        assert_eq!(insight.key_observations.len(), 5);
        assert!(insight.key_observations[0].starts_with("↑ $100,000"));
        assert!(insight.suggested_strategies[1].contains("↑ $100,000"));
        assert_eq!(insight.risk_assessment.corporate_risk.level, RiskLevel::Unknown);
    }

    #[test]
    fn test_with_insight_leaves_original_untouched() {
        let snap = snapshot(dec!(1), Vec::new());
        let annotated = snap.with_insight(DerivedInsight::unavailable(Utc::now()));
        assert!(snap.derived_insight.is_none());
        assert!(annotated.derived_insight.is_some());
    }
}
