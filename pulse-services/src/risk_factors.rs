//! Named risk sub-markets
//!
//! Each risk factor starts from a documented default and is overridden by the
//! highest-volume live market whose event and question match it.

use pulse_core::{RiskFactor, RiskKind};
use pulse_polymarket::{RawEvent, RawMarket};
use rust_decimal::Decimal;

struct RiskDefault {
    kind: RiskKind,
    market_name: &'static str,
    /// Percent, scale 1
    probability: i64,
    volume: i64,
}

const RISK_DEFAULTS: [RiskDefault; 8] = [
    RiskDefault {
        kind: RiskKind::MicrostrategySells,
        market_name: "MicroStrategy sells any Bitcoin by year end?",
        probability: 11,
        volume: 4_700_000,
    },
    RiskDefault {
        kind: RiskKind::MicrostrategyLiquidation,
        market_name: "MicroStrategy forced to liquidate Bitcoin?",
        probability: 4,
        volume: 425_200,
    },
    RiskDefault {
        kind: RiskKind::MicrostrategyMarginCall,
        market_name: "MicroStrategy margin call?",
        probability: 0,
        volume: 0,
    },
    RiskDefault {
        kind: RiskKind::UsNationalReserve,
        market_name: "US national Bitcoin reserve?",
        probability: 9,
        volume: 5_300_000,
    },
    RiskDefault {
        kind: RiskKind::TexasReserve,
        market_name: "Texas Strategic Bitcoin Reserve Act signed?",
        probability: 8,
        volume: 205_300,
    },
    RiskDefault {
        kind: RiskKind::SenateBill,
        market_name: "Senate passes bill to purchase 1m Bitcoin?",
        probability: 7,
        volume: 60_500,
    },
    RiskDefault {
        kind: RiskKind::SatoshiMovement,
        market_name: "Satoshi's Bitcoin wallet moves?",
        probability: 5,
        volume: 21_000_000,
    },
    RiskDefault {
        kind: RiskKind::ChinaUnban,
        market_name: "China unbans Bitcoin?",
        probability: 20,
        volume: 0,
    },
];

/// Default risk factors, in fixed order
pub fn default_risk_factors() -> Vec<RiskFactor> {
    RISK_DEFAULTS
        .iter()
        .map(|d| RiskFactor {
            kind: d.kind,
            category: d.kind.category(),
            market_name: d.market_name.to_string(),
            probability: Decimal::new(d.probability, 1),
            volume: Decimal::from(d.volume),
            live: false,
        })
        .collect()
}

fn lower(text: Option<&str>) -> String {
    text.unwrap_or_default().to_lowercase()
}

/// Which risk factor a market question feeds, given its event title
fn match_market(event_title: &str, question: &str) -> Option<RiskKind> {
    if event_title.contains("microstrategy") || event_title.contains("mstr") {
        if question.contains("liquidat") {
            return Some(RiskKind::MicrostrategyLiquidation);
        }
        if question.contains("margin") {
            return Some(RiskKind::MicrostrategyMarginCall);
        }
        if question.contains("sell") {
            return Some(RiskKind::MicrostrategySells);
        }
        return None;
    }

    if ["reserve", "government", "senate", "texas"]
        .iter()
        .any(|k| event_title.contains(k))
    {
        if question.contains("national") || question.contains("us ") {
            return Some(RiskKind::UsNationalReserve);
        }
        if question.contains("texas") {
            return Some(RiskKind::TexasReserve);
        }
        if question.contains("senate") {
            return Some(RiskKind::SenateBill);
        }
        return None;
    }

    if event_title.contains("satoshi") {
        return Some(RiskKind::SatoshiMovement);
    }

    if event_title.contains("china") && event_title.contains("ban") {
        return Some(RiskKind::ChinaUnban);
    }

    None
}

fn yes_percent(market: &RawMarket) -> Decimal {
    market
        .outcome_pair()
        .map(|(yes, _)| yes.saturating_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

/// Risk factors with live markets applied over the defaults
pub fn extract_risk_factors(events: &[RawEvent]) -> Vec<RiskFactor> {
    let mut factors = default_risk_factors();

    for event in events {
        let event_title = lower(event.title());
        for market in event.markets_or_self() {
            let question = lower(market.question.as_deref());
            let Some(kind) = match_market(&event_title, &question) else {
                continue;
            };
            let Some(factor) = factors.iter_mut().find(|f| f.kind == kind) else {
                continue;
            };

            let volume = market.volume().unwrap_or(Decimal::ZERO).max(Decimal::ZERO);
            if factor.live && volume <= factor.volume {
                continue;
            }

            factor.probability = yes_percent(&market);
            factor.volume = volume;
            factor.live = true;
            if let Some(name) = market.question.as_deref().filter(|q| !q.trim().is_empty()) {
                factor.market_name = name.to_string();
            }
        }
    }

    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn events(value: serde_json::Value) -> Vec<RawEvent> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_when_nothing_matches() {
        let factors = extract_risk_factors(&[]);
        assert_eq!(factors.len(), 8);
        assert!(factors.iter().all(|f| !f.live));

        let sells = &factors[0];
        assert_eq!(sells.kind, RiskKind::MicrostrategySells);
        assert_eq!(sells.probability, dec!(1.1));
        assert_eq!(sells.volume, dec!(4700000));

        let china = factors.iter().find(|f| f.kind == RiskKind::ChinaUnban).unwrap();
        assert_eq!(china.probability, dec!(2.0));
    }

    #[test]
    fn test_live_markets_override_defaults() {
        let raw = events(json!([
            {
                "title": "MicroStrategy Bitcoin decisions",
                "markets": [
                    {"question": "Will MicroStrategy sell Bitcoin by June?", "outcomePrices": "[\"0.05\",\"0.95\"]", "volume": "100000"},
                    {"question": "Will MicroStrategy sell Bitcoin by December?", "outcomePrices": "[\"0.09\",\"0.91\"]", "volume": "900000"},
                    {"question": "MicroStrategy forced liquidation?", "outcomePrices": ["0.01", "0.99"], "volume": 5000}
                ]
            },
            {
                "title": "Texas Bitcoin reserve",
                "markets": [
                    {"question": "Texas reserve signed into law?", "outcomePrices": ["0.3", "0.7"], "volume": "12345"}
                ]
            }
        ]));

        let factors = extract_risk_factors(&raw);

        let sells = factors
            .iter()
            .find(|f| f.kind == RiskKind::MicrostrategySells)
            .unwrap();
        assert!(sells.live);
        assert_eq!(sells.probability, dec!(9));
        assert_eq!(sells.volume, dec!(900000));
        assert_eq!(sells.market_name, "Will MicroStrategy sell Bitcoin by December?");

        let liquidation = factors
            .iter()
            .find(|f| f.kind == RiskKind::MicrostrategyLiquidation)
            .unwrap();
        assert_eq!(liquidation.probability, dec!(1));

        let texas = factors.iter().find(|f| f.kind == RiskKind::TexasReserve).unwrap();
        assert!(texas.live);
        assert_eq!(texas.probability, dec!(30));

        let us = factors
            .iter()
            .find(|f| f.kind == RiskKind::UsNationalReserve)
            .unwrap();
        assert!(!us.live);
    }

    #[test]
    fn test_missing_outcomes_default_to_zero_probability() {
        let raw = events(json!([
            {"title": "Satoshi coins move this year?", "volume": 42}
        ]));
        let factors = extract_risk_factors(&raw);
        let satoshi = factors
            .iter()
            .find(|f| f.kind == RiskKind::SatoshiMovement)
            .unwrap();
        assert!(satoshi.live);
        assert_eq!(satoshi.probability, Decimal::ZERO);
        assert_eq!(satoshi.volume, dec!(42));
    }
}
