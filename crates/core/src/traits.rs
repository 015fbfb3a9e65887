//! Provider traits.
//!
//! Embeddings, language models, and the warehouse are capability sets with
//! interchangeable implementations selected by configuration.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Dense embedding provider.
///
/// Implementations must produce vectors of a fixed dimension; changing
/// provider requires rebuilding the vector index.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

/// One LLM generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Model id; empty selects the backend default.
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: String::new(),
            temperature: 0.2,
            max_output_tokens: 2048,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// LLM generation output with token accounting.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Language model provider. Streaming is not required.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// Model id used when the request does not name one.
    fn default_model(&self) -> &str;
}

/// A single warehouse job request.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub sql: String,
    pub dry_run: bool,
    pub max_bytes_billed: Option<u64>,
    pub timeout: Duration,
}

/// Raw warehouse response before executor shaping.
///
/// Column order is preserved from the warehouse; row values are JSON with
/// integers outside the i64 range already stringified by the client.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub total_rows: u64,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cache_hit: bool,
    pub job_id: String,
}

/// Read-only warehouse gateway.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn run(&self, job: &QueryJob) -> Result<QueryOutcome>;
}
