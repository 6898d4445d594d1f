//! Prompt construction for market analysis

use pulse_core::format::{format_thousands, format_volume};
use pulse_core::{Direction, MarketSnapshot, RiskKind};

use crate::generator::InsightRequest;

pub const SYSTEM_PROMPT: &str = r#"You are a senior crypto market analyst specializing in Bitcoin prediction markets. Your role is to:

1. Analyze Polymarket data and extract actionable insights
2. Identify key market trends and sentiment shifts
3. Provide clear, data-driven observations
4. Offer trading recommendations based on market probabilities

Always respond with valid JSON matching the specified schema. Be concise but thorough.
Focus on the most significant data points and avoid generic statements."#;

const RESPONSE_SCHEMA: &str = r#"Generate a JSON response with this exact structure:
{
  "keyObservations": ["5-7 data-driven, actionable bullet points with specific numbers"],
  "tradingInsight": {
    "sentiment": "BULLISH" | "BEARISH" | "NEUTRAL",
    "rationale": "2-3 sentences explaining the current market state",
    "recommendation": "1-2 sentences of specific, actionable advice",
    "suggestedStrategies": ["3-4 concrete strategies"]
  },
  "riskAssessment": {
    "corporateRisk": { "level": "LOW" | "MEDIUM" | "HIGH", "explanation": "one sentence" },
    "governmentRisk": { "level": "LOW" | "MEDIUM" | "HIGH", "explanation": "one sentence" }
  },
  "confidence": 0-100
}"#;

fn trigger_block(request: &InsightRequest<'_>) -> String {
    let Some(trigger) = request.trigger else {
        return "TRIGGERED BY: Scheduled refresh".to_string();
    };

    let mut block = format!(
        "TRIGGERED BY: {}\n- Previous: {}\n- Current: {}\n- Change: {:.2}\n- Description: {}",
        trigger.kind,
        trigger.previous_value.normalize(),
        trigger.current_value.normalize(),
        trigger.percent_or_point_change,
        trigger.description
    );

    let others: Vec<String> = request
        .changes
        .iter()
        .filter(|c| *c != trigger)
        .map(|c| c.summary_line())
        .collect();
    if !others.is_empty() {
        block.push_str("\n\nOTHER CHANGES:\n");
        block.push_str(&others.join("\n"));
    }
    block
}

fn target_lines(snapshot: &MarketSnapshot, direction: Direction, limit: usize) -> String {
    let lines: Vec<String> = snapshot
        .targets(direction)
        .take(limit)
        .map(|t| format!("- {}: {:.1}%", t.label, t.probability))
        .collect();
    if lines.is_empty() {
        "- none".to_string()
    } else {
        lines.join("\n")
    }
}

fn risk_line(snapshot: &MarketSnapshot, kind: RiskKind, label: &str) -> String {
    match snapshot.risk_factor(kind) {
        Some(r) => format!("- {}: {}%", label, r.probability.normalize()),
        None => format!("- {}: N/A", label),
    }
}

/// User prompt describing the snapshot and what triggered the refresh
pub fn build_analysis_prompt(request: &InsightRequest<'_>) -> String {
    let s = request.snapshot;
    let flow = &s.trade_flow;

    format!(
        "Analyze this Polymarket Bitcoin data and generate insights.

CURRENT MARKET STATE:
- BTC Price: ${price}
- Sentiment: {sentiment} ({ratio:.2}:1 buy/sell ratio)
- Buy Orders: {buys}
- Sell Orders: {sells}
- Total Volume: {volume}
- Markets Tracked: {markets}

{trigger}

TOP PRICE TARGETS:
Upside:
{up}

Downside:
{down}

CORPORATE RISK (MicroStrategy):
{mstr_sells}
{mstr_liq}

GOVERNMENT MARKETS:
{us_reserve}
{texas}

{schema}",
        price = format_thousands(s.current_price),
        sentiment = s.sentiment,
        ratio = s.buy_sell_ratio,
        buys = flow.buy_orders,
        sells = flow.sell_orders,
        volume = format_volume(s.total_volume()),
        markets = s.metadata.total_markets,
        trigger = trigger_block(request),
        up = target_lines(s, Direction::Up, 5),
        down = target_lines(s, Direction::Down, 3),
        mstr_sells = risk_line(s, RiskKind::MicrostrategySells, "Sells Bitcoin by year end"),
        mstr_liq = risk_line(s, RiskKind::MicrostrategyLiquidation, "Forced Liquidation"),
        us_reserve = risk_line(s, RiskKind::UsNationalReserve, "US National Reserve"),
        texas = risk_line(s, RiskKind::TexasReserve, "Texas Reserve Act"),
        schema = RESPONSE_SCHEMA,
    )
}

/// Pull the JSON object out of a completion, tolerating markdown fences
pub fn extract_json(content: &str) -> Option<&str> {
    if let Some(start) = content.find("```json") {
        let start = start + 7;
        if let Some(end) = content[start..].find("```") {
            return Some(content[start..start + end].trim());
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}
