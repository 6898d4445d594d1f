//! OpenAI-backed insight generator

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use pulse_core::{PulseError, PulseResult};
use tracing::{debug, instrument};

use crate::generator::{GeneratedInsight, InsightGenerator, InsightRequest};
use crate::prompt::{build_analysis_prompt, extract_json, SYSTEM_PROMPT};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAiInsightGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiInsightGenerator {
    /// Build a generator; without an explicit key async-openai reads `OPENAI_API_KEY`
    pub fn new(api_key: Option<&str>) -> Self {
        let config = match api_key {
            Some(key) => OpenAIConfig::new().with_api_key(key),
            None => OpenAIConfig::default(),
        };

        Self {
            client: Client::with_config(config),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Parse a raw completion into a partial insight
pub fn parse_completion(content: &str) -> PulseResult<GeneratedInsight> {
    let json = extract_json(content)
        .ok_or_else(|| PulseError::insight("No JSON found in completion"))?;

    serde_json::from_str(json)
        .map_err(|e| PulseError::insight(format!("Failed to parse completion: {}", e)))
}

#[async_trait]
impl InsightGenerator for OpenAiInsightGenerator {
    fn name(&self) -> &str {
        "OpenAI"
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: InsightRequest<'_>) -> PulseResult<GeneratedInsight> {
        let user_prompt = build_analysis_prompt(&request);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()
                    .map_err(|e| PulseError::internal(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_prompt)
                    .build()
                    .map_err(|e| PulseError::internal(e.to_string()))?
                    .into(),
            ])
            .temperature(self.temperature)
            .build()
            .map_err(|e| PulseError::internal(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| PulseError::insight(format!("OpenAI API error: {}", e)))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| PulseError::insight("No response from OpenAI"))?;

        debug!("Completion received ({} chars)", content.len());
        parse_completion(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_completion() {
        let content = "Sure!\n```json\n{\"keyObservations\":[\"a\",\"b\"],\"confidence\":70}\n```";
        let parsed = parse_completion(content).unwrap();
        assert_eq!(parsed.key_observations.unwrap().len(), 2);
        assert_eq!(parsed.confidence, Some(70.0));
    }

    #[test]
    fn test_parse_failure_is_insight_error() {
        assert!(matches!(
            parse_completion("I cannot help with that"),
            Err(PulseError::InsightGenerationFailed(_))
        ));
        assert!(matches!(
            parse_completion("{ not json }"),
            Err(PulseError::InsightGenerationFailed(_))
        ));
    }
}
