//! Embedding vectors and the backends that produce them.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{HiveError, HiveResult};
use crate::types::AuthProfile;

use super::tokenizer;

/// An embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub magnitude: f32,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        Self { vector, magnitude }
    }

    /// Cosine similarity between two embeddings; 0 for zero vectors or
    /// mismatched dimensions
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.magnitude == 0.0 || other.magnitude == 0.0 || self.dim() != other.dim() {
            return 0.0;
        }
        let dot: f32 = self
            .vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| a * b)
            .sum();
        dot / (self.magnitude * other.magnitude)
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Turns text into an embedding
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> HiveResult<Embedding>;
}

/// Deterministic local embedder: each keyword is hashed into a signed bucket.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dim];
        for word in tokenizer::keywords(text) {
            let digest = Sha256::digest(word.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dim;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        Embedding::new(vector)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> HiveResult<Embedding> {
        Ok(self.embed_sync(text))
    }
}

/// OpenAI `/v1/embeddings` backend
pub struct OpenAIEmbedder {
    client: Client,
    base_url: String,
    model: String,
    auth: AuthProfile,
}

impl OpenAIEmbedder {
    pub fn new(model: impl Into<String>, auth: AuthProfile) -> Self {
        Self::with_base_url("https://api.openai.com", model, auth)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        model: impl Into<String>,
        auth: AuthProfile,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            auth,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> HiveResult<Embedding> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.auth.api_key))
            .json(&json!({"model": self.model, "input": text}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HiveError::Provider(format!(
                "OpenAI embeddings error {status}: {body}"
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let vector: Vec<f32> = data
            .pointer("/data/0/embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| HiveError::Provider("embedding missing from response".into()))?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();
        if vector.is_empty() {
            return Err(HiveError::Provider("empty embedding".into()));
        }
        Ok(Embedding::new(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_and_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let zero = Embedding::new(vec![0.0, 0.0]);
        let other_dim = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.cosine_similarity(&zero), 0.0);
        assert_eq!(a.cosine_similarity(&other_dim), 0.0);
    }

    #[test]
    fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_sync("rust async runtime");
        let b = embedder.embed_sync("Rust, async runtime!");
        assert_eq!(a, b);
        assert_eq!(a.dim(), 64);
    }

    #[test]
    fn hashing_embedder_similar_texts_score_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_sync("guitar concert tonight");
        let close = embedder.embed_sync("amazing guitar concert");
        let far = embedder.embed_sync("tax filing deadline");
        assert!(query.cosine_similarity(&close) > query.cosine_similarity(&far));
    }

    #[tokio::test]
    async fn embedder_trait_object() {
        let embedder: Box<dyn Embedder> = Box::new(HashingEmbedder::new(16));
        let e = embedder.embed("hello world").await.unwrap();
        assert_eq!(e.dim(), 16);
        assert_eq!(embedder.name(), "hashing");
    }
}
