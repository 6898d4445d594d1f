//! Error types for the pulse pipeline

use thiserror::Error;

/// Pipeline-wide error type
///
/// Every variant except [`PulseError::Config`] is recovered locally by the
/// layer that produces it; only configuration errors reach the top-level caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PulseError {
    /// Network failure, timeout or non-2xx response from an upstream
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Local admission denial by a rate limiter
    #[error("Rate limited: {source_name}")]
    RateLimited { source_name: String },

    /// Upstream returned an unexpected shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Primary cache tier down or erroring
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Insight generator call or response parsing failed
    #[error("Insight generation failed: {0}")]
    InsightGenerationFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PulseError {
    pub fn upstream(msg: impl Into<String>) -> Self {
        PulseError::UpstreamUnavailable(msg.into())
    }

    pub fn rate_limited(source_name: impl Into<String>) -> Self {
        PulseError::RateLimited {
            source_name: source_name.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        PulseError::MalformedPayload(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        PulseError::CacheUnavailable(msg.into())
    }

    pub fn insight(msg: impl Into<String>) -> Self {
        PulseError::InsightGenerationFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PulseError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PulseError::Internal(msg.into())
    }

    /// Whether this error was produced locally without touching the network
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PulseError::RateLimited { .. })
    }
}

/// Result type alias for pipeline operations
pub type PulseResult<T> = Result<T, PulseError>;
