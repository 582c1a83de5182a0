use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{HiveError, HiveResult};
use crate::types::*;

use super::traits::{status_error, Generation, GenerationRequest, Provider};

/// Google Gemini `generateContent` backend
pub struct GeminiProvider {
    client: Client,
    base_url: String,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: "https://generativelanguage.googleapis.com".into(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut generation_config = json!({
            "temperature": request.temperature,
            "topP": 0.95,
            "topK": 40,
        });
        if request.max_tokens > 0 {
            generation_config["maxOutputTokens"] = json!(request.max_tokens);
        }
        json!({
            "systemInstruction": {"parts": [{"text": request.system}]},
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": generation_config,
        })
    }

    fn parse_response(data: &serde_json::Value, model: &str) -> HiveResult<Generation> {
        let parts = data
            .pointer("/candidates/0/content/parts")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                let reason = data
                    .pointer("/promptFeedback/blockReason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("no candidates");
                HiveError::Provider(format!("Gemini returned no content: {reason}"))
            })?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();

        let usage = data
            .get("usageMetadata")
            .map(|u| {
                TokenUsage::new(
                    u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                    u.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
                )
            })
            .unwrap_or_default();

        Ok(Generation {
            text,
            provider: ProviderKind::Gemini,
            model: model.to_string(),
            usage,
        })
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        auth: &AuthProfile,
    ) -> HiveResult<Generation> {
        let body = self.build_body(request);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &auth.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("gemini", status, &headers, &body));
        }

        let data: serde_json::Value = response.json().await?;
        Self::parse_response(&data, &request.model)
    }
}
