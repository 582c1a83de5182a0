use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{HiveError, HiveResult};
use crate::types::*;

/// A single text-generation request, already rendered for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Text returned by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub provider: ProviderKind,
    pub model: String,
    pub usage: TokenUsage,
}

/// Text-generation backend
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Non-streaming completion
    async fn generate(
        &self,
        request: &GenerationRequest,
        auth: &AuthProfile,
    ) -> HiveResult<Generation>;
}

/// What the caller wants generated, independent of any provider
#[derive(Debug, Clone, PartialEq)]
pub struct PromptIntent {
    pub instruction: String,
    /// Multiplies the provider's configured temperature
    pub temperature_scale: f32,
    /// Overrides the provider's configured max tokens
    pub max_tokens: Option<u32>,
}

impl PromptIntent {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            temperature_scale: 1.0,
            max_tokens: None,
        }
    }

    pub fn with_temperature_scale(mut self, scale: f32) -> Self {
        self.temperature_scale = scale;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

const DEFAULT_RETRY_AFTER_MS: u64 = 5000;

/// Map a non-success HTTP status to the matching error
pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> HiveError {
    match status.as_u16() {
        429 => HiveError::RateLimited {
            provider: provider.into(),
            retry_after_ms: retry_after_ms(headers).unwrap_or(DEFAULT_RETRY_AFTER_MS),
        },
        401 | 403 => HiveError::Auth(format!("{provider} auth failed: {body}")),
        _ => HiveError::Provider(format!("{provider} API error {status}: {body}")),
    }
}

/// `Retry-After` in seconds, as sent by all three APIs
pub(crate) fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}
