//! Configuration management for sqlscout
//!
//! Supports loading configuration from:
//! - YAML files (`config/default.yaml`, then `config/{env}.yaml`)
//! - Environment variables (`SQLSCOUT_` prefix, `__` separator)
//! - Dedicated operational variables (`EMBEDDINGS_PROVIDER`, `LLM_PROVIDER`,
//!   `LLM_MODEL_DEFAULT`, `WAREHOUSE_PROJECT`, `VECTOR_INDEX_PATH`,
//!   `SCHEMA_CSV_PATH`, `SAFE_JOIN_MAP_PATH`, `MAX_BYTES_BILLED_DEFAULT`)

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, EmbeddingsConfig, ExecutorConfig, GenerationConfig, PathsConfig,
    RetrievalConfig, RuntimeEnvironment, ServerConfig, Settings, ValidationConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
