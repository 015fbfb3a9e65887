//! LLM factory - provider abstraction layer
//!
//! Creates LLM backends based on configuration with tagged dispatch on the
//! provider name.

use std::sync::Arc;

use sqlscout_config::GenerationConfig;
use sqlscout_core::LanguageModel;

use crate::{
    claude::{ClaudeBackend, ClaudeConfig},
    gemini::{GeminiBackend, GeminiConfig},
    openai::{OpenAiBackend, OpenAiConfig},
    LlmError,
};

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    Gemini,
    Claude,
    OpenAi,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Some(LlmProvider::Gemini),
            "claude" | "anthropic" => Some(LlmProvider::Claude),
            "openai" | "gpt" => Some(LlmProvider::OpenAi),
            _ => None,
        }
    }
}

/// Unified provider configuration
#[derive(Debug, Clone, Default)]
pub struct LlmProviderConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmProviderConfig {
    pub fn from_settings(config: &GenerationConfig) -> Result<Self, LlmError> {
        let provider = LlmProvider::from_str(&config.provider).ok_or_else(|| {
            LlmError::Configuration(format!("Unknown LLM provider '{}'", config.provider))
        })?;
        Ok(Self {
            provider,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Factory for creating LLM backends
pub struct LlmFactory;

impl LlmFactory {
    pub fn create(config: &LlmProviderConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
        match config.provider {
            LlmProvider::Gemini => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                    .ok_or_else(|| {
                        LlmError::Configuration("Gemini requires GEMINI_API_KEY".to_string())
                    })?;
                let backend = GeminiBackend::new(
                    GeminiConfig::new(api_key).with_model(config.model.clone()),
                )?;
                Ok(Arc::new(backend))
            }
            LlmProvider::Claude => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                    .ok_or_else(|| {
                        LlmError::Configuration("Claude requires ANTHROPIC_API_KEY".to_string())
                    })?;
                let backend = ClaudeBackend::new(
                    ClaudeConfig::new(api_key).with_model(config.model.clone()),
                )?;
                Ok(Arc::new(backend))
            }
            LlmProvider::OpenAi => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .ok_or_else(|| {
                        LlmError::Configuration("OpenAI requires OPENAI_API_KEY".to_string())
                    })?;
                let backend = OpenAiBackend::new(
                    OpenAiConfig::new(api_key).with_model(config.model.clone()),
                )?;
                Ok(Arc::new(backend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(LlmProvider::from_str("gemini"), Some(LlmProvider::Gemini));
        assert_eq!(LlmProvider::from_str("Anthropic"), Some(LlmProvider::Claude));
        assert_eq!(LlmProvider::from_str("gpt"), Some(LlmProvider::OpenAi));
        assert_eq!(LlmProvider::from_str("cohere"), None);
    }

    #[test]
    fn test_create_without_key_fails() {
        let config = LlmProviderConfig {
            provider: LlmProvider::Claude,
            api_key: None,
            model: "claude-3-5-haiku-20241022".to_string(),
        };
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            assert!(LlmFactory::create(&config).is_err());
        }
    }
}
