//! Embedding providers
//!
//! Providers are interchangeable behind `EmbeddingProvider`; changing
//! provider requires rebuilding the vector index, so the offline indexer and
//! the server must be configured alike.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use sqlscout_config::constants::{endpoints, timeouts};
use sqlscout_config::EmbeddingsConfig;
use sqlscout_core::{EmbeddingProvider, Error, Result};

use crate::RagError;

/// Deterministic feature-hashing embedder.
///
/// No model required; useful for tests and offline development. Tokens are
/// hashed into a fixed-dimension bag and the vector is L2-normalized.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Gemini embedding provider (REST).
pub struct GeminiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct BatchEmbedContentsResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeouts::EMBEDDING_MS))
            .build()
            .map_err(|e| Error::Configuration(format!("embedding HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoints::GEMINI_DEFAULT.clone(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        })
    }

    fn content_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "content": { "parts": [ { "text": text } ] }
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.endpoint, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::content_body(text))
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!("HTTP {}: {}", status, body)).into());
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if parsed.embedding.values.len() != self.dimension {
            return Err(RagError::Embedding(format!(
                "provider returned dimension {}, expected {}",
                parsed.embedding.values.len(),
                self.dimension
            ))
            .into());
        }

        Ok(parsed.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents",
            self.endpoint, self.model
        );

        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                let mut body = Self::content_body(t);
                body["model"] = serde_json::json!(format!("models/{}", self.model));
                body
            })
            .collect();

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!("HTTP {}: {}", status, body)).into());
        }

        let parsed: BatchEmbedContentsResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create the configured embedding provider.
pub fn create_embedder(config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.to_ascii_lowercase().as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        "gemini" => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .ok_or_else(|| {
                    Error::Configuration("Gemini embeddings require GEMINI_API_KEY".to_string())
                })?;
            Ok(Arc::new(GeminiEmbedder::new(
                api_key,
                config.model.clone(),
                config.dimension,
            )?))
        }
        other => Err(Error::Configuration(format!(
            "Unknown embeddings provider '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_text("top revenue by user");
        let b = embedder.embed_text("top revenue by user");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_similarity_ranks_overlap() {
        let embedder = HashEmbedder::new(256);
        let q = embedder.embed_text("revenue by user");
        let close = embedder.embed_text("top revenue by user last month");
        let far = embedder.embed_text("orchestral horn arrangements");

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&q, &close) > dot(&q, &far));
    }
}
