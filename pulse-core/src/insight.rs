//! Derived analysis attached to a snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Sentiment;

/// Where a derived insight came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSource {
    /// Produced by the external generator (missing fields backfilled)
    Generated,
    /// Computed deterministically from the snapshot itself
    Baseline,
    /// Static payload used when generation is disabled or failed
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    /// Parse a free-form level label, tolerating case and whitespace
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" | "MODERATE" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            "UNKNOWN" => Some(RiskLevel::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskNote {
    pub level: RiskLevel,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub corporate_risk: RiskNote,
    pub government_risk: RiskNote,
}

/// Textual observations and strategies attached to a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedInsight {
    pub generated_at: DateTime<Utc>,
    pub source: InsightSource,
    /// `[KIND] description` of the change that prompted generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    pub key_observations: Vec<String>,
    pub sentiment: Sentiment,
    pub rationale: String,
    pub recommendation: String,
    pub suggested_strategies: Vec<String>,
    pub risk_assessment: RiskAssessment,
    /// 0-100
    pub confidence: f64,
}

impl DerivedInsight {
    /// The static payload served when the generator is disabled or failing
    pub fn unavailable(generated_at: DateTime<Utc>) -> Self {
        let unknown = || RiskNote {
            level: RiskLevel::Unknown,
            explanation: "Unable to assess".to_string(),
        };

        Self {
            generated_at,
            source: InsightSource::Default,
            triggered_by: None,
            key_observations: vec![
                "AI insights temporarily unavailable".to_string(),
                "Using cached market data".to_string(),
                "Manual analysis recommended".to_string(),
            ],
            sentiment: Sentiment::Neutral,
            rationale: "Unable to generate AI analysis at this time.".to_string(),
            recommendation: "Review market data manually and monitor for changes.".to_string(),
            suggested_strategies: vec![
                "Monitor price action".to_string(),
                "Wait for AI insights to restore".to_string(),
            ],
            risk_assessment: RiskAssessment {
                corporate_risk: unknown(),
                government_risk: unknown(),
            },
            confidence: 0.0,
        }
    }

    pub fn with_trigger(mut self, trigger: Option<String>) -> Self {
        self.triggered_by = trigger;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_payload_is_fully_populated() {
        let insight = DerivedInsight::unavailable(Utc::now());
        assert_eq!(insight.source, InsightSource::Default);
        assert_eq!(insight.key_observations.len(), 3);
        assert_eq!(insight.suggested_strategies.len(), 2);
        assert_eq!(insight.sentiment, Sentiment::Neutral);
        assert_eq!(insight.risk_assessment.corporate_risk.level, RiskLevel::Unknown);
        assert_eq!(insight.confidence, 0.0);
    }

    #[test]
    fn test_risk_level_labels() {
        assert_eq!(RiskLevel::parse_label(" high "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse_label("Moderate"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse_label("severe"), None);
    }
}
