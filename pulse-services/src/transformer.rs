//! Raw upstream payloads to `MarketSnapshot`
//!
//! `Transformer::transform` is total: missing or garbled upstream fields fall
//! back to documented defaults, and markets that cannot be interpreted as a
//! price target are excluded rather than guessed at.

use chrono::{DateTime, Utc};
use pulse_core::{
    Direction, MarketCategory, MarketSnapshot, NetFlow, PriceConsensus, PriceTarget, PulseError,
    PulseResult, RecentTrade, Sentiment, SnapshotMetadata, TradeFlow, TradeSide, VolumeCategory,
    SNAPSHOT_ASSET, SNAPSHOT_SOURCE,
};
use pulse_polymarket::{RawEvent, RawMarket, RawTrade};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

use crate::risk_factors::extract_risk_factors;

/// Recent trades kept on a snapshot
pub const RECENT_TRADE_LIMIT: usize = 10;

/// Spot price used when no provider returned a usable value
pub fn fallback_spot_price() -> Decimal {
    Decimal::from(95_000)
}

/// Sections recorded in `defaults_applied`
pub const DEFAULT_PRICE_TARGETS: &str = "priceTargets";
pub const DEFAULT_TRADE_FLOW: &str = "tradeFlow";
pub const DEFAULT_CURRENT_PRICE: &str = "currentPrice";

const DEFAULT_UP_TARGETS: [(i64, i64, i64); 5] = [
    (95_000, 235, 4_100_000),
    (100_000, 75, 6_800_000),
    (105_000, 25, 2_300_000),
    (110_000, 14, 4_500_000),
    (150_000, 2, 14_200_000),
];

const DEFAULT_DOWN_TARGETS: [(i64, i64, i64); 3] = [
    (80_000, 146, 6_100_000),
    (75_000, 36, 1_500_000),
    (70_000, 14, 7_500_000),
];

fn default_targets(direction: Direction) -> Vec<PriceTarget> {
    let table: &[(i64, i64, i64)] = match direction {
        Direction::Up => &DEFAULT_UP_TARGETS,
        Direction::Down => &DEFAULT_DOWN_TARGETS,
    };
    table
        .iter()
        .map(|&(price, probability, volume)| {
            PriceTarget::new(
                direction,
                Decimal::from(price),
                Decimal::new(probability, 1),
                Decimal::from(volume),
            )
        })
        .collect()
}

/// Documented targets substituted when the catalog section is empty
pub fn default_price_targets() -> Vec<PriceTarget> {
    let mut targets = default_targets(Direction::Up);
    targets.extend(default_targets(Direction::Down));
    sort_targets(&mut targets);
    targets
}

fn sort_targets(targets: &mut [PriceTarget]) {
    targets.sort_by(|a, b| {
        b.probability
            .cmp(&a.probability)
            .then_with(|| b.volume.cmp(&a.volume))
            .then_with(|| a.label.cmp(&b.label))
    });
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Title heuristics, compiled once per transformer
#[derive(Debug)]
struct TitlePatterns {
    price_market: Regex,
    corporate: Regex,
    policy: Regex,
    protocol: Regex,
    dollar_amount: Regex,
    thousands_suffix: Regex,
    millions_suffix: Regex,
    grouped_digits: Regex,
    up_words: Regex,
    down_words: Regex,
}

impl TitlePatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            price_market: Regex::new(r"(?i)\b(price|reach(es|ed)?|hits?|above|below)\b")?,
            corporate: Regex::new(r"(?i)\b(microstrategy|mstr|saylor)\b")?,
            policy: Regex::new(r"(?i)\b(reserve|government|senate|congress|texas|treasury)\b")?,
            protocol: Regex::new(r"(?i)\b(protocol|upgrade|sha-?256|fork)\b")?,
            dollar_amount: Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+|\d{4,})(?:\.\d+)?")?,
            thousands_suffix: Regex::new(r"(?i)\$?(\d+(?:\.\d+)?)\s?k\b")?,
            millions_suffix: Regex::new(r"(?i)\$?(\d+(?:\.\d+)?)\s?m\b")?,
            grouped_digits: Regex::new(r"\b(\d{1,3}(?:,\d{3})+)\b")?,
            up_words: Regex::new(
                r"(?i)\b(reach(es|ed)?|hits?|above|exceeds?|surpass(es)?|higher)\b",
            )?,
            down_words: Regex::new(r"(?i)\b(below|drops?|falls?|dips?|crash(es)?)\b")?,
        })
    }
}

/// Maps raw catalog events, a spot price, and raw trades into one snapshot
#[derive(Debug)]
pub struct Transformer {
    patterns: TitlePatterns,
}

impl Transformer {
    pub fn new() -> PulseResult<Self> {
        let patterns = TitlePatterns::compile()
            .map_err(|e| PulseError::internal(format!("title pattern failed to compile: {}", e)))?;
        Ok(Self { patterns })
    }

    /// Category bucket for an event title; missing titles are `Other`
    pub fn classify(&self, title: Option<&str>) -> MarketCategory {
        let Some(title) = title else {
            return MarketCategory::Other;
        };
        let p = &self.patterns;
        if p.price_market.is_match(title) {
            MarketCategory::PriceTargets
        } else if p.corporate.is_match(title) {
            MarketCategory::CorporateHolder
        } else if p.policy.is_match(title) {
            MarketCategory::Policy
        } else if p.protocol.is_match(title) {
            MarketCategory::Protocol
        } else {
            MarketCategory::Other
        }
    }

    /// First price level found in `text`, trying each rule in order
    pub fn extract_price(&self, text: &str) -> Option<Decimal> {
        let p = &self.patterns;

        let parse = |digits: &str| digits.replace(',', "").parse::<Decimal>().ok();

        let price = p
            .dollar_amount
            .captures(text)
            .and_then(|c| parse(c.get(1)?.as_str()))
            .or_else(|| {
                p.thousands_suffix
                    .captures(text)
                    .and_then(|c| parse(c.get(1)?.as_str()))
                    .and_then(|v| v.checked_mul(Decimal::from(1_000)))
            })
            .or_else(|| {
                p.millions_suffix
                    .captures(text)
                    .and_then(|c| parse(c.get(1)?.as_str()))
                    .and_then(|v| v.checked_mul(Decimal::from(1_000_000)))
            })
            .or_else(|| {
                p.grouped_digits
                    .captures(text)
                    .and_then(|c| parse(c.get(1)?.as_str()))
            })?;

        (price > Decimal::ZERO).then_some(price)
    }

    /// Direction from glyphs first, then directional keywords
    pub fn direction(&self, text: &str) -> Option<Direction> {
        if text.contains('↑') {
            return Some(Direction::Up);
        }
        if text.contains('↓') {
            return Some(Direction::Down);
        }
        if self.patterns.up_words.is_match(text) {
            return Some(Direction::Up);
        }
        if self.patterns.down_words.is_match(text) {
            return Some(Direction::Down);
        }
        None
    }

    fn target_for(&self, event: &RawEvent, market: &RawMarket) -> Option<PriceTarget> {
        let texts: Vec<&str> = [market.title(), market.question.as_deref(), event.title()]
            .into_iter()
            .flatten()
            .collect();

        let price = texts.iter().find_map(|t| self.extract_price(t))?;
        let direction = texts.iter().find_map(|t| self.direction(t))?;

        let probability = market
            .outcome_pair()
            .map(|(yes, _)| yes.saturating_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO);
        let volume = market.volume().unwrap_or(Decimal::ZERO);

        Some(PriceTarget::new(direction, price, round2(probability), volume))
    }

    /// Deduplicated, sorted price targets from price-target events
    pub fn extract_price_targets(&self, events: &[RawEvent]) -> Vec<PriceTarget> {
        let mut by_label: HashMap<String, PriceTarget> = HashMap::new();

        for event in events {
            if self.classify(event.title()) != MarketCategory::PriceTargets {
                continue;
            }
            for market in event.markets_or_self() {
                let Some(target) = self.target_for(event, &market) else {
                    continue;
                };
                match by_label.get(&target.label) {
                    Some(existing) if existing.volume >= target.volume => {}
                    _ => {
                        by_label.insert(target.label.clone(), target);
                    }
                }
            }
        }

        let mut targets: Vec<PriceTarget> = by_label.into_values().collect();
        sort_targets(&mut targets);
        targets
    }

    /// Per-category volume with percentages derived from the aggregate
    pub fn volume_by_category(&self, events: &[RawEvent]) -> (Vec<VolumeCategory>, Decimal) {
        let mut totals: HashMap<MarketCategory, Decimal> = HashMap::new();
        for event in events {
            let volume = event.volume().unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
            let bucket = totals
                .entry(self.classify(event.title()))
                .or_insert(Decimal::ZERO);
            *bucket = bucket.saturating_add(volume);
        }

        let total = totals
            .values()
            .fold(Decimal::ZERO, |acc, v| acc.saturating_add(*v));

        let mut categories: Vec<VolumeCategory> = MarketCategory::ALL
            .iter()
            .filter_map(|category| {
                let volume = totals.get(category).copied()?;
                if volume <= Decimal::ZERO {
                    return None;
                }
                let percentage = volume
                    .checked_div(total)
                    .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
                    .map(|p| p.round_dp_with_strategy(2, RoundingStrategy::ToZero))
                    .unwrap_or(Decimal::ZERO);
                Some(VolumeCategory {
                    category: *category,
                    volume,
                    percentage,
                })
            })
            .collect();

        // stable sort keeps MarketCategory::ALL order for equal volumes
        categories.sort_by(|a, b| b.volume.cmp(&a.volume));
        (categories, total)
    }

    /// Build the snapshot for one fetch cycle
    pub fn transform(
        &self,
        events: &[RawEvent],
        spot_price: Decimal,
        trades: &[RawTrade],
        fetched_at: DateTime<Utc>,
    ) -> MarketSnapshot {
        let mut defaults_applied = Vec::new();

        let current_price = if spot_price > Decimal::ZERO {
            spot_price
        } else {
            defaults_applied.push(DEFAULT_CURRENT_PRICE.to_string());
            fallback_spot_price()
        };

        let price_targets = if events.is_empty() {
            defaults_applied.push(DEFAULT_PRICE_TARGETS.to_string());
            default_price_targets()
        } else {
            self.extract_price_targets(events)
        };

        let (volume_by_category, total_volume) = self.volume_by_category(events);

        let flow = summarize_trades(trades);
        if trades.is_empty() {
            defaults_applied.push(DEFAULT_TRADE_FLOW.to_string());
        }

        let most_likely_up = price_targets
            .iter()
            .find(|t| t.direction == Direction::Up)
            .cloned();
        let most_likely_down = price_targets
            .iter()
            .find(|t| t.direction == Direction::Down)
            .cloned();

        let consensus = PriceConsensus {
            implied_high: most_likely_up
                .as_ref()
                .map(|t| t.price)
                .unwrap_or(current_price),
            implied_low: most_likely_down
                .as_ref()
                .map(|t| t.price)
                .unwrap_or(current_price),
            most_likely_up,
            most_likely_down,
        };

        MarketSnapshot {
            metadata: SnapshotMetadata {
                source: SNAPSHOT_SOURCE.to_string(),
                asset: SNAPSHOT_ASSET.to_string(),
                fetched_at,
                total_markets: events.len(),
                total_volume,
                defaults_applied,
            },
            current_price,
            sentiment: flow.sentiment,
            buy_sell_ratio: flow.ratio,
            price_targets,
            volume_by_category,
            trade_flow: flow.trade_flow,
            recent_trades: recent_trades(trades),
            risk_factors: extract_risk_factors(events),
            consensus,
            derived_insight: None,
        }
    }
}

/// Trade-flow aggregate plus the derived ratio and sentiment
///
/// `ratio` weighs volume rather than trade count when both sides traded, so
/// a burst of small buys cannot outweigh one large sell.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSummary {
    pub trade_flow: TradeFlow,
    pub ratio: Decimal,
    pub sentiment: Sentiment,
}

/// Buy/sell counts, volumes, and sentiment from raw trades
///
/// The ratio is buy volume over sell volume when both sides traded, and
/// buy count over `max(sell count, 1)` otherwise. Any side other than an
/// explicit buy counts as a sell.
pub fn summarize_trades(trades: &[RawTrade]) -> TradeSummary {
    let mut buy_orders = 0usize;
    let mut sell_orders = 0usize;
    let mut buy_volume = Decimal::ZERO;
    let mut sell_volume = Decimal::ZERO;

    for trade in trades {
        let size = trade.size().unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
        if trade.is_buy() {
            buy_orders += 1;
            buy_volume = buy_volume.saturating_add(size);
        } else {
            sell_orders += 1;
            sell_volume = sell_volume.saturating_add(size);
        }
    }

    let total = buy_orders + sell_orders;

    let ratio = if total == 0 {
        Decimal::ONE
    } else if buy_volume > Decimal::ZERO && sell_volume > Decimal::ZERO {
        buy_volume.checked_div(sell_volume).unwrap_or(Decimal::ONE)
    } else {
        Decimal::from(buy_orders) / Decimal::from(sell_orders.max(1))
    };
    let ratio = round2(ratio);

    let buy_ratio = if total == 0 {
        Decimal::from(50)
    } else {
        round2(Decimal::from(buy_orders) * Decimal::ONE_HUNDRED / Decimal::from(total))
    };

    TradeSummary {
        trade_flow: TradeFlow {
            total_trades: total,
            buy_orders,
            sell_orders,
            buy_volume,
            sell_volume,
            buy_ratio,
            sell_ratio: Decimal::ONE_HUNDRED - buy_ratio,
            net_flow: if ratio > Decimal::ONE {
                NetFlow::Accumulation
            } else {
                NetFlow::Distribution
            },
        },
        ratio,
        sentiment: Sentiment::from_ratio(ratio),
    }
}

/// The first trades in upstream (newest-first) order
pub fn recent_trades(trades: &[RawTrade]) -> Vec<RecentTrade> {
    trades
        .iter()
        .take(RECENT_TRADE_LIMIT)
        .map(|trade| {
            let size = trade.size().unwrap_or(Decimal::ZERO);
            let price = trade.price().unwrap_or(Decimal::ZERO);
            RecentTrade {
                side: if trade.is_buy() {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                market: trade
                    .market
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Unknown Market".to_string()),
                outcome: trade
                    .outcome
                    .clone()
                    .filter(|o| !o.trim().is_empty())
                    .unwrap_or_else(|| "Yes".to_string()),
                size,
                price,
                value: size.saturating_mul(price),
            }
        })
        .collect()
}
