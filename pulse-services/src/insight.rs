//! Insight orchestration
//!
//! Decides whether a snapshot deserves a fresh insight and, if so, asks the
//! external generator through its own rate limiter and circuit breaker. The
//! generator never surfaces an error here: failures, denials, and disabled
//! configuration all resolve to the static default insight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_core::{ChangeEvent, DerivedInsight, MarketSnapshot, PulseError};
use pulse_research::{InsightGenerator, InsightRequest};
use tracing::{debug, info, warn};

use crate::change_detector::most_significant;
use crate::circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
use crate::config::{InsightConfig, LimiterSettings};
use crate::rate_limiter::{RateLimiter, RateLimiterStats};

pub struct InsightOrchestrator {
    generator: Option<Arc<dyn InsightGenerator>>,
    enabled: bool,
    timeout: Duration,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl InsightOrchestrator {
    pub fn new(
        generator: Option<Arc<dyn InsightGenerator>>,
        config: &InsightConfig,
        limiter: LimiterSettings,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            generator,
            enabled: config.enabled,
            timeout: config.timeout,
            limiter: RateLimiter::new("insight", limiter.max_tokens, limiter.refill_per_sec),
            breaker: CircuitBreaker::new(breaker),
        }
    }

    /// Generation is warranted on any change, or on a cold start
    pub fn should_generate(changes: &[ChangeEvent], has_previous: bool) -> bool {
        !changes.is_empty() || !has_previous
    }

    /// A new insight for `snapshot`, or `None` when nothing warrants one
    pub async fn annotate(
        &self,
        snapshot: &MarketSnapshot,
        changes: &[ChangeEvent],
        has_previous: bool,
    ) -> Option<DerivedInsight> {
        if !Self::should_generate(changes, has_previous) {
            debug!("No significant changes, keeping previous insight");
            return None;
        }
        Some(self.generate(snapshot, changes).await)
    }

    /// Always returns an insight; the static default stands in for any failure
    pub async fn generate(&self, snapshot: &MarketSnapshot, changes: &[ChangeEvent]) -> DerivedInsight {
        let trigger = most_significant(changes);
        let trigger_line = trigger.map(ChangeEvent::summary_line);

        let fallback = || DerivedInsight::unavailable(Utc::now()).with_trigger(trigger_line.clone());

        let Some(generator) = self.generator.as_ref().filter(|_| self.enabled) else {
            debug!("Insight generation disabled, using default insight");
            return fallback();
        };

        if !self.limiter.acquire() {
            warn!("Insight generation rate limited, using default insight");
            return fallback();
        }

        match &trigger_line {
            Some(line) => info!("Generating insight ({} changes), trigger {}", changes.len(), line),
            None => info!("Generating insight on cold start"),
        }

        let request = InsightRequest {
            snapshot,
            trigger,
            changes,
        };
        let timeout = self.timeout;

        let generated = self
            .breaker
            .call(
                move || async move {
                    match tokio::time::timeout(timeout, generator.generate(request)).await {
                        Ok(Ok(generated)) => Ok(Some(generated)),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(PulseError::insight(format!(
                            "{} timed out after {:?}",
                            generator.name(),
                            timeout
                        ))),
                    }
                },
                || None,
            )
            .await;

        match generated {
            Some(generated) => {
                let baseline = snapshot.baseline_insight().with_trigger(trigger_line.clone());
                let mut insight = generated.merge_over(baseline);
                insight.generated_at = Utc::now();
                insight
            }
            None => fallback(),
        }
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    pub fn limiter_stats(&self) -> RateLimiterStats {
        self.limiter.stats()
    }
}

impl std::fmt::Debug for InsightOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightOrchestrator")
            .field("generator", &self.generator.as_ref().map(|g| g.name().to_string()))
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_detector::ChangeDetector;
    use async_trait::async_trait;
    use pulse_core::{ChangeKind, InsightSource, PulseResult, RiskLevel, Sentiment};
    use pulse_research::GeneratedInsight;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::transformer::Transformer;

    struct ScriptedGenerator {
        reply: Option<&'static str>,
        calls: AtomicU32,
        last_trigger: parking_lot::Mutex<Option<ChangeKind>>,
    }

    impl ScriptedGenerator {
        fn new(reply: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicU32::new(0),
                last_trigger: parking_lot::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl InsightGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: InsightRequest<'_>) -> PulseResult<GeneratedInsight> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_trigger.lock() = request.trigger.map(|t| t.kind);
            match self.reply {
                Some(json) => pulse_research::openai::parse_completion(json),
                None => Err(PulseError::insight("generator offline")),
            }
        }
    }

    fn orchestrator(generator: Option<Arc<dyn InsightGenerator>>) -> InsightOrchestrator {
        let config = InsightConfig {
            enabled: true,
            api_key: Some("test".to_string()),
            ..InsightConfig::default()
        };
        InsightOrchestrator::new(
            generator,
            &config,
            LimiterSettings::new(3.0, 0.2),
            CircuitBreakerConfig::new("Insight", 2, Duration::from_secs(60)),
        )
    }

    fn snapshot(price: i64) -> MarketSnapshot {
        Transformer::new()
            .unwrap()
            .transform(&[], Decimal::from(price), &[], Utc::now())
    }

    fn changes() -> Vec<ChangeEvent> {
        ChangeDetector::default().detect(&snapshot(100), Some(&snapshot(90)))
    }

    #[test]
    fn test_should_generate() {
        assert!(InsightOrchestrator::should_generate(&[], false));
        assert!(!InsightOrchestrator::should_generate(&[], true));
        assert!(InsightOrchestrator::should_generate(&changes(), true));
    }

    #[tokio::test]
    async fn test_no_changes_keeps_previous_insight() {
        let generator = ScriptedGenerator::new(Some("{}"));
        let orch = orchestrator(Some(generator.clone()));
        assert!(orch.annotate(&snapshot(100), &[], true).await.is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generated_fields_merge_over_baseline() {
        let generator = ScriptedGenerator::new(Some(
            r#"```json
            {"keyObservations": ["Flow turned"], "tradingInsight": {"sentiment": "BEARISH"}, "confidence": 0.8}
            ```"#,
        ));
        let orch = orchestrator(Some(generator.clone()));
        let current = snapshot(100);

        let insight = orch.annotate(&current, &changes(), true).await.unwrap();

        assert_eq!(insight.source, InsightSource::Generated);
        assert_eq!(insight.key_observations, vec!["Flow turned"]);
        assert_eq!(insight.sentiment, Sentiment::Bearish);
        assert_eq!(insight.rationale, current.baseline_insight().rationale);
        assert_eq!(insight.suggested_strategies.len(), 4);
        assert_eq!(insight.confidence, 80.0);
        assert!(insight
            .triggered_by
            .as_deref()
            .is_some_and(|t| t.starts_with("[PRICE_MOVE]")));
        assert_eq!(*generator.last_trigger.lock(), Some(ChangeKind::PriceMove));
    }

    #[tokio::test]
    async fn test_cold_start_generates_without_trigger() {
        let generator = ScriptedGenerator::new(Some("{}"));
        let orch = orchestrator(Some(generator.clone()));

        let insight = orch.annotate(&snapshot(100), &[], false).await.unwrap();
        assert_eq!(insight.source, InsightSource::Generated);
        assert!(insight.triggered_by.is_none());
        assert_eq!(*generator.last_trigger.lock(), None);
    }

    #[tokio::test]
    async fn test_failures_resolve_to_default_and_open_breaker() {
        let generator = ScriptedGenerator::new(None);
        let orch = orchestrator(Some(generator.clone()));

        for _ in 0..3 {
            let insight = orch.annotate(&snapshot(100), &changes(), true).await.unwrap();
            assert_eq!(insight.source, InsightSource::Default);
            assert_eq!(insight.risk_assessment.corporate_risk.level, RiskLevel::Unknown);
            assert!(insight.triggered_by.is_some());
        }
        // breaker opened after two failures, third call never reached the generator
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_or_missing_generator_returns_default() {
        let orch = orchestrator(None);
        let insight = orch.annotate(&snapshot(100), &[], false).await.unwrap();
        assert_eq!(insight.source, InsightSource::Default);

        let generator = ScriptedGenerator::new(Some("{}"));
        let config = InsightConfig {
            enabled: false,
            ..InsightConfig::default()
        };
        let orch = InsightOrchestrator::new(
            Some(generator.clone()),
            &config,
            LimiterSettings::new(3.0, 0.2),
            CircuitBreakerConfig::new("Insight", 2, Duration::from_secs(60)),
        );
        let insight = orch.annotate(&snapshot(100), &[], false).await.unwrap();
        assert_eq!(insight.source, InsightSource::Default);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_generation_returns_default() {
        let generator = ScriptedGenerator::new(Some("{}"));
        let orch = orchestrator(Some(generator.clone()));

        for _ in 0..3 {
            let insight = orch.generate(&snapshot(100), &[]).await;
            assert_eq!(insight.source, InsightSource::Generated);
        }
        let insight = orch.generate(&snapshot(100), &[]).await;
        assert_eq!(insight.source, InsightSource::Default);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.limiter_stats().denied, 1);
    }
}
