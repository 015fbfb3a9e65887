//! LLM integration
//!
//! Features:
//! - Multiple backend support (Gemini, Claude, OpenAI)
//! - Transient-error retry with exponential backoff
//! - Provider factory with tagged dispatch on configuration

pub mod claude;
pub mod factory;
pub mod gemini;
pub mod openai;
pub mod retry;

pub use claude::{ClaudeBackend, ClaudeConfig};
pub use factory::{LlmFactory, LlmProvider, LlmProviderConfig};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use retry::{with_retries, RetryPolicy};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Transient errors are retried; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited | LlmError::Network(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn from_status(status: u16, message: String) -> Self {
        if status == 429 {
            LlmError::RateLimited
        } else {
            LlmError::Api { status, message }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for sqlscout_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => sqlscout_core::Error::Configuration(msg),
            other => sqlscout_core::Error::GenerationFailure(other.to_string()),
        }
    }
}
