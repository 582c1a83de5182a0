use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{HiveError, HiveResult};
use crate::types::*;

use super::traits::{status_error, Generation, GenerationRequest, Provider};

const DEFAULT_MAX_TOKENS: u32 = 400;

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: "https://api.anthropic.com".into(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        // max_tokens is mandatory for the messages API
        let max_tokens = if request.max_tokens > 0 {
            request.max_tokens
        } else {
            DEFAULT_MAX_TOKENS
        };
        json!({
            "model": request.model,
            "system": request.system,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": max_tokens,
            "temperature": request.temperature.clamp(0.0, 1.0),
        })
    }

    fn parse_response(data: &serde_json::Value, model: &str) -> HiveResult<Generation> {
        let blocks = data
            .get("content")
            .and_then(|v| v.as_array())
            .ok_or_else(|| HiveError::Provider("Anthropic response has no content".into()))?;
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();

        let usage = data
            .get("usage")
            .map(|u| {
                TokenUsage::new(
                    u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                    u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                )
            })
            .unwrap_or_default();

        Ok(Generation {
            text,
            provider: ProviderKind::Anthropic,
            model: data
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or(model)
                .to_string(),
            usage,
        })
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        auth: &AuthProfile,
    ) -> HiveResult<Generation> {
        let body = self.build_body(request);
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &auth.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("anthropic", status, &headers, &body));
        }

        let data: serde_json::Value = response.json().await?;
        Self::parse_response(&data, &request.model)
    }
}
