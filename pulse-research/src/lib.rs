//! Insight generation for the pulse pipeline
//!
//! Defines the [`InsightGenerator`] seam the orchestrator calls, the prompt
//! built from a snapshot and its most significant change, the lenient parser
//! for the generator's JSON reply, and an OpenAI-backed implementation.

pub mod generator;
pub mod openai;
pub mod prompt;

pub use generator::{GeneratedInsight, InsightGenerator, InsightRequest};
pub use openai::{OpenAiInsightGenerator, DEFAULT_MODEL};
