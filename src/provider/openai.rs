use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{HiveError, HiveResult};
use crate::types::*;

use super::traits::{status_error, Generation, GenerationRequest, Provider};

pub struct OpenAIProvider {
    client: Client,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: "https://api.openai.com".into(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.temperature,
        });
        if request.max_tokens > 0 {
            body["max_tokens"] = json!(request.max_tokens);
        }
        body
    }

    fn parse_response(data: &serde_json::Value, model: &str) -> HiveResult<Generation> {
        let text = data
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HiveError::Provider("OpenAI response has no message content".into()))?;

        let usage = data
            .get("usage")
            .map(|u| {
                TokenUsage::new(
                    u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                    u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                )
            })
            .unwrap_or_default();

        Ok(Generation {
            text: text.to_string(),
            provider: ProviderKind::OpenAI,
            model: data
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or(model)
                .to_string(),
            usage,
        })
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        auth: &AuthProfile,
    ) -> HiveResult<Generation> {
        let body = self.build_body(request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", auth.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("openai", status, &headers, &body));
        }

        let data: serde_json::Value = response.json().await?;
        Self::parse_response(&data, &request.model)
    }
}
