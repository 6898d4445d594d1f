//! Insight generator seam and its partially-populated output

use async_trait::async_trait;
use pulse_core::{
    ChangeEvent, DerivedInsight, InsightSource, MarketSnapshot, PulseResult, RiskLevel, RiskNote,
    Sentiment,
};
use serde::Deserialize;

/// Input handed to a generator
#[derive(Debug, Clone, Copy)]
pub struct InsightRequest<'a> {
    pub snapshot: &'a MarketSnapshot,
    /// The single most significant change, if any
    pub trigger: Option<&'a ChangeEvent>,
    /// Every change detected this cycle
    pub changes: &'a [ChangeEvent],
}

/// External text-insight generator
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    async fn generate(&self, request: InsightRequest<'_>) -> PulseResult<GeneratedInsight>;
}

// ============================================================================
// Generator output
// ============================================================================

/// Generator reply; any field may be missing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedInsight {
    #[serde(default)]
    pub key_observations: Option<Vec<String>>,
    #[serde(default)]
    pub trading_insight: Option<GeneratedTradingInsight>,
    #[serde(default)]
    pub risk_assessment: Option<GeneratedRiskAssessment>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTradingInsight {
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub suggested_strategies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRiskAssessment {
    #[serde(default)]
    pub corporate_risk: Option<GeneratedRiskNote>,
    #[serde(default)]
    pub government_risk: Option<GeneratedRiskNote>,
}

/// Risk notes arrive either as bare text or as `{level, explanation}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GeneratedRiskNote {
    Text(String),
    Detailed {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        explanation: Option<String>,
    },
}

fn non_empty_text(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn non_empty_list(items: Option<Vec<String>>) -> Option<Vec<String>> {
    items
        .map(|v| {
            v.into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
}

impl GeneratedRiskNote {
    fn merge_over(self, fallback: RiskNote) -> RiskNote {
        match self {
            GeneratedRiskNote::Text(text) => RiskNote {
                level: fallback.level,
                explanation: non_empty_text(Some(text)).unwrap_or(fallback.explanation),
            },
            GeneratedRiskNote::Detailed { level, explanation } => RiskNote {
                level: level
                    .as_deref()
                    .and_then(RiskLevel::parse_label)
                    .unwrap_or(fallback.level),
                explanation: non_empty_text(explanation).unwrap_or(fallback.explanation),
            },
        }
    }
}

/// Generators report confidence as 0-1 or 0-100; store 0-100
fn normalize_confidence(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let scaled = if raw <= 1.0 { raw * 100.0 } else { raw };
    Some(scaled.min(100.0))
}

impl GeneratedInsight {
    /// Overlay this reply on a baseline insight
    ///
    /// Every field the generator left out, emptied, or mislabeled keeps the
    /// baseline value, so the result is always fully populated.
    pub fn merge_over(self, baseline: DerivedInsight) -> DerivedInsight {
        let trading = self.trading_insight.unwrap_or_default();
        let risk = self.risk_assessment.unwrap_or_default();

        let corporate_risk = match risk.corporate_risk {
            Some(note) => note.merge_over(baseline.risk_assessment.corporate_risk.clone()),
            None => baseline.risk_assessment.corporate_risk.clone(),
        };
        let government_risk = match risk.government_risk {
            Some(note) => note.merge_over(baseline.risk_assessment.government_risk.clone()),
            None => baseline.risk_assessment.government_risk.clone(),
        };

        DerivedInsight {
            generated_at: baseline.generated_at,
            source: InsightSource::Generated,
            triggered_by: baseline.triggered_by,
            key_observations: non_empty_list(self.key_observations)
                .unwrap_or(baseline.key_observations),
            sentiment: trading
                .sentiment
                .as_deref()
                .and_then(Sentiment::parse_label)
                .unwrap_or(baseline.sentiment),
            rationale: non_empty_text(trading.rationale).unwrap_or(baseline.rationale),
            recommendation: non_empty_text(trading.recommendation)
                .unwrap_or(baseline.recommendation),
            suggested_strategies: non_empty_list(trading.suggested_strategies)
                .unwrap_or(baseline.suggested_strategies),
            risk_assessment: pulse_core::RiskAssessment {
                corporate_risk,
                government_risk,
            },
            confidence: self
                .confidence
                .and_then(normalize_confidence)
                .unwrap_or(baseline.confidence),
        }
    }
}
