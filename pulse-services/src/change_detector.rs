//! Snapshot-to-snapshot significance checks
//!
//! `detect` compares a freshly transformed snapshot with the previous one and
//! reports every check whose threshold was crossed. The orchestrator uses the
//! result to decide whether a new insight is worth generating.

use pulse_core::format::{format_thousands, format_volume};
use pulse_core::{ChangeEvent, ChangeKind, Direction, MarketSnapshot};
use rust_decimal::{Decimal, RoundingStrategy};

/// Thresholds above which a delta counts as significant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeThresholds {
    /// Relative spot price move (0.02 = 2%)
    pub price_move: Decimal,
    /// Relative buy/sell ratio change
    pub sentiment_shift: Decimal,
    /// Absolute probability change, in percentage points
    pub probability_points: Decimal,
    /// Current / previous total volume
    pub volume_spike: Decimal,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            price_move: Decimal::new(2, 2),
            sentiment_shift: Decimal::new(15, 2),
            probability_points: Decimal::TEN,
            volume_spike: Decimal::TWO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    thresholds: ChangeThresholds,
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Relative change `|current - previous| / previous`, `None` if it cannot be computed
fn relative_change(current: Decimal, previous: Decimal) -> Option<Decimal> {
    current.saturating_sub(previous).abs().checked_div(previous)
}

impl ChangeDetector {
    pub fn new(thresholds: ChangeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ChangeThresholds {
        &self.thresholds
    }

    /// Every triggered check between `previous` and `current`
    ///
    /// A missing previous snapshot is a cold start and never counts as a change.
    pub fn detect(
        &self,
        current: &MarketSnapshot,
        previous: Option<&MarketSnapshot>,
    ) -> Vec<ChangeEvent> {
        let Some(previous) = previous else {
            return Vec::new();
        };

        let mut events = Vec::new();
        events.extend(self.check_price(current, previous));
        events.extend(self.check_ratio(current, previous));
        self.check_probabilities(current, previous, &mut events);
        events.extend(self.check_volume(current, previous));
        events
    }

    fn check_price(&self, current: &MarketSnapshot, previous: &MarketSnapshot) -> Option<ChangeEvent> {
        let (cur, prev) = (current.current_price, previous.current_price);
        if prev <= Decimal::ZERO {
            return None;
        }
        let change = relative_change(cur, prev)?;
        if change <= self.thresholds.price_move {
            return None;
        }

        let percent = round2(change.saturating_mul(Decimal::ONE_HUNDRED));
        Some(ChangeEvent {
            kind: ChangeKind::PriceMove,
            subject: None,
            previous_value: prev,
            current_value: cur,
            percent_or_point_change: percent,
            description: format!(
                "BTC price moved {:.2}% from ${} to ${}",
                percent,
                format_thousands(prev),
                format_thousands(cur)
            ),
        })
    }

    fn check_ratio(&self, current: &MarketSnapshot, previous: &MarketSnapshot) -> Option<ChangeEvent> {
        let (cur, prev) = (current.buy_sell_ratio, previous.buy_sell_ratio);
        let change = if prev.is_zero() {
            if cur > Decimal::ZERO {
                Decimal::ONE
            } else {
                return None;
            }
        } else {
            relative_change(cur, prev)?
        };
        if change <= self.thresholds.sentiment_shift {
            return None;
        }

        let percent = round2(change.saturating_mul(Decimal::ONE_HUNDRED));
        Some(ChangeEvent {
            kind: ChangeKind::SentimentShift,
            subject: None,
            previous_value: prev,
            current_value: cur,
            percent_or_point_change: percent,
            description: format!(
                "Buy/sell ratio shifted {:.1}% from {:.2} to {:.2} ({} -> {})",
                percent, prev, cur, previous.sentiment, current.sentiment
            ),
        })
    }

    fn check_probabilities(
        &self,
        current: &MarketSnapshot,
        previous: &MarketSnapshot,
        events: &mut Vec<ChangeEvent>,
    ) {
        for (direction, side) in [(Direction::Up, "upside"), (Direction::Down, "downside")] {
            if let (Some(cur), Some(prev)) =
                (current.top_target(direction), previous.top_target(direction))
            {
                let subject = format!("Top {} target", side);
                events.extend(self.probability_event(&subject, &cur.label, prev.probability, cur.probability));
            }
        }

        for factor in &current.risk_factors {
            if let Some(prev) = previous.risk_factor(factor.kind) {
                events.extend(self.probability_event(
                    &factor.market_name,
                    &factor.market_name,
                    prev.probability,
                    factor.probability,
                ));
            }
        }
    }

    fn probability_event(
        &self,
        subject: &str,
        label: &str,
        prev: Decimal,
        cur: Decimal,
    ) -> Option<ChangeEvent> {
        let points = cur.saturating_sub(prev).abs();
        if points <= self.thresholds.probability_points {
            return None;
        }

        Some(ChangeEvent {
            kind: ChangeKind::ProbabilityChange,
            subject: Some(label.to_string()),
            previous_value: prev,
            current_value: cur,
            percent_or_point_change: round2(points),
            description: format!(
                "{} probability changed {:.1}pp from {:.1}% to {:.1}%",
                subject, points, prev, cur
            ),
        })
    }

    fn check_volume(&self, current: &MarketSnapshot, previous: &MarketSnapshot) -> Option<ChangeEvent> {
        let (cur, prev) = (current.total_volume(), previous.total_volume());
        let ratio = cur.checked_div(prev.max(Decimal::ONE))?;
        if ratio <= self.thresholds.volume_spike {
            return None;
        }

        Some(ChangeEvent {
            kind: ChangeKind::VolumeSpike,
            subject: None,
            previous_value: prev,
            current_value: cur,
            percent_or_point_change: round2(
                ratio
                    .saturating_sub(Decimal::ONE)
                    .saturating_mul(Decimal::ONE_HUNDRED),
            ),
            description: format!(
                "Volume spiked {:.1}x from {} to {}",
                ratio,
                format_volume(prev),
                format_volume(cur)
            ),
        })
    }
}

/// Highest-priority event: price move, then volume spike, then sentiment shift,
/// then probability change. Ties keep detection order.
pub fn most_significant(events: &[ChangeEvent]) -> Option<&ChangeEvent> {
    events.iter().min_by_key(|e| e.kind.priority())
}

/// One `[KIND] description` line per event
pub fn format_changes(events: &[ChangeEvent]) -> String {
    if events.is_empty() {
        return "No significant changes detected".to_string();
    }
    events
        .iter()
        .map(ChangeEvent::summary_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::{
        MarketCategory, NetFlow, PriceConsensus, PriceTarget, RiskFactor, RiskKind, Sentiment,
        SnapshotMetadata, TradeFlow,
    };
    use rust_decimal_macros::dec;

    fn snapshot(price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            metadata: SnapshotMetadata {
                source: "test".to_string(),
                asset: "BTC".to_string(),
                fetched_at: Utc::now(),
                total_markets: 0,
                total_volume: dec!(1_000_000),
                defaults_applied: Vec::new(),
            },
            current_price: price,
            sentiment: Sentiment::Neutral,
            buy_sell_ratio: dec!(1),
            price_targets: Vec::new(),
            volume_by_category: Vec::new(),
            trade_flow: TradeFlow {
                total_trades: 0,
                buy_orders: 0,
                sell_orders: 0,
                buy_volume: Decimal::ZERO,
                sell_volume: Decimal::ZERO,
                buy_ratio: dec!(50),
                sell_ratio: dec!(50),
                net_flow: NetFlow::Distribution,
            },
            recent_trades: Vec::new(),
            risk_factors: Vec::new(),
            consensus: PriceConsensus {
                most_likely_up: None,
                most_likely_down: None,
                implied_high: Decimal::ZERO,
                implied_low: Decimal::ZERO,
            },
            derived_insight: None,
        }
    }

    fn event(kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            kind,
            subject: None,
            previous_value: Decimal::ZERO,
            current_value: Decimal::ZERO,
            percent_or_point_change: Decimal::ZERO,
            description: String::new(),
        }
    }

    #[test]
    fn test_cold_start_is_never_a_change() {
        let detector = ChangeDetector::default();
        assert!(detector.detect(&snapshot(dec!(100)), None).is_empty());
    }

    #[test]
    fn test_price_move_over_threshold() {
        let detector = ChangeDetector::default();
        let events = detector.detect(&snapshot(dec!(100)), Some(&snapshot(dec!(97))));

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, ChangeKind::PriceMove);
        assert_eq!(e.previous_value, dec!(97));
        assert_eq!(e.current_value, dec!(100));
        assert_eq!(e.percent_or_point_change, dec!(3.09));
    }

    #[test]
    fn test_small_moves_are_ignored() {
        let detector = ChangeDetector::default();
        let mut current = snapshot(dec!(100));
        current.buy_sell_ratio = dec!(1.1);
        current.metadata.total_volume = dec!(2_000_000);

        assert!(detector
            .detect(&current, Some(&snapshot(dec!(99))))
            .is_empty());
    }

    #[test]
    fn test_zero_previous_price_skips_price_check() {
        let detector = ChangeDetector::default();
        let events = detector.detect(&snapshot(dec!(95000)), Some(&snapshot(Decimal::ZERO)));
        assert!(events.iter().all(|e| e.kind != ChangeKind::PriceMove));
    }

    #[test]
    fn test_ratio_shift_and_from_zero() {
        let detector = ChangeDetector::default();
        let mut current = snapshot(dec!(100));
        current.buy_sell_ratio = dec!(1.5);
        let events = detector.detect(&current, Some(&snapshot(dec!(100))));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::SentimentShift);
        assert_eq!(events[0].percent_or_point_change, dec!(50));

        let mut previous = snapshot(dec!(100));
        previous.buy_sell_ratio = Decimal::ZERO;
        let events = detector.detect(&current, Some(&previous));
        assert_eq!(events[0].kind, ChangeKind::SentimentShift);
        assert_eq!(events[0].percent_or_point_change, dec!(100));
    }

    #[test]
    fn test_probability_shift_per_tracked_market() {
        let detector = ChangeDetector::default();

        let mut previous = snapshot(dec!(100));
        previous.price_targets = vec![PriceTarget::new(
            Direction::Up,
            dec!(100000),
            dec!(12),
            dec!(5000000),
        )];
        previous.risk_factors = vec![RiskFactor {
            kind: RiskKind::TexasReserve,
            category: MarketCategory::Policy,
            market_name: "Texas reserve".to_string(),
            probability: dec!(1),
            volume: Decimal::ZERO,
            live: true,
        }];

        let mut current = previous.clone();
        current.price_targets[0].probability = dec!(30);
        current.risk_factors[0].probability = dec!(11.5);

        let events = detector.detect(&current, Some(&previous));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == ChangeKind::ProbabilityChange));
        assert_eq!(events[0].subject.as_deref(), Some("↑ $100,000"));
        assert_eq!(events[0].percent_or_point_change, dec!(18));
        assert_eq!(events[1].subject.as_deref(), Some("Texas reserve"));

        // exactly 10pp is not over the threshold
        current.risk_factors[0].probability = dec!(11);
        current.price_targets[0].probability = dec!(12);
        assert!(detector.detect(&current, Some(&previous)).is_empty());
    }

    #[test]
    fn test_volume_spike() {
        let detector = ChangeDetector::default();
        let mut current = snapshot(dec!(100));
        current.metadata.total_volume = dec!(2_500_000);

        let events = detector.detect(&current, Some(&snapshot(dec!(100))));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::VolumeSpike);
        assert_eq!(events[0].percent_or_point_change, dec!(150));
        assert!(events[0].description.contains("2.5x"));
    }

    #[test]
    fn test_extreme_volume_and_price_saturate() {
        let detector = ChangeDetector::default();

        let mut previous = snapshot(dec!(1));
        previous.metadata.total_volume = Decimal::ZERO;
        let mut current = snapshot(dec!(1_000_000_000_000_000_000_000_000_000));
        current.metadata.total_volume = dec!(1_000_000_000_000_000_000_000_000_000);

        let events = detector.detect(&current, Some(&previous));
        let kinds: Vec<ChangeKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::PriceMove, ChangeKind::VolumeSpike]);
        assert_eq!(events[0].percent_or_point_change, Decimal::MAX);
        assert_eq!(events[1].percent_or_point_change, Decimal::MAX);
    }

    #[test]
    fn test_all_triggered_events_are_returned() {
        let detector = ChangeDetector::default();
        let mut current = snapshot(dec!(110));
        current.buy_sell_ratio = dec!(3);
        current.metadata.total_volume = dec!(5_000_000);

        let kinds: Vec<_> = detector
            .detect(&current, Some(&snapshot(dec!(100))))
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::PriceMove, ChangeKind::SentimentShift, ChangeKind::VolumeSpike]
        );
    }

    #[test]
    fn test_most_significant_priority() {
        assert!(most_significant(&[]).is_none());

        let events = vec![event(ChangeKind::ProbabilityChange), event(ChangeKind::VolumeSpike)];
        assert_eq!(
            most_significant(&events).map(|e| e.kind),
            Some(ChangeKind::VolumeSpike)
        );

        let events = vec![
            event(ChangeKind::SentimentShift),
            event(ChangeKind::VolumeSpike),
            event(ChangeKind::PriceMove),
        ];
        assert_eq!(
            most_significant(&events).map(|e| e.kind),
            Some(ChangeKind::PriceMove)
        );
    }

    #[test]
    fn test_format_changes() {
        assert_eq!(format_changes(&[]), "No significant changes detected");

        let mut e = event(ChangeKind::PriceMove);
        e.description = "moved".to_string();
        assert_eq!(format_changes(&[e]), "[PRICE_MOVE] moved");
    }
}
