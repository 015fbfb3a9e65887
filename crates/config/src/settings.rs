//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{executor, generation, retrieval, timeouts, validator};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Overall per-request budget (ms); the deepest in-flight step is
    /// cancelled when it runs out
    #[serde(default = "default_request_budget_ms")]
    pub request_budget_ms: u64,
    #[serde(default)]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Requests admitted concurrently; beyond this the server sheds load
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent_requests() -> usize {
    64
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_budget_ms() -> u64 {
    timeouts::EMBEDDING_MS
        + timeouts::RETRIEVAL_MS
        + timeouts::LLM_REQUEST_MS * generation::MAX_RETRIES as u64
        + timeouts::DRY_RUN_MS
        + timeouts::WET_RUN_MS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_budget_ms: default_request_budget_ms(),
            cors_enabled: false,
            cors_origins: Vec::new(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    /// Shift to balanced weights when the top raw BM25 score exceeds
    /// `lexical_dominance_threshold`
    #[serde(default = "default_true")]
    pub auto_adjust_weights: bool,
    #[serde(default = "default_lexical_dominance")]
    pub lexical_dominance_threshold: f32,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_top_k() -> usize {
    retrieval::DEFAULT_TOP_K
}

fn default_vector_weight() -> f32 {
    retrieval::VECTOR_WEIGHT
}

fn default_lexical_weight() -> f32 {
    retrieval::LEXICAL_WEIGHT
}

fn default_lexical_dominance() -> f32 {
    retrieval::LEXICAL_DOMINANCE_THRESHOLD
}

fn default_cache_capacity() -> usize {
    retrieval::CACHE_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_top_k(),
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            auto_adjust_weights: true,
            lexical_dominance_threshold: default_lexical_dominance(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Provider tag: "gemini" or "hash" (deterministic local fallback)
    #[serde(default = "default_embeddings_provider")]
    pub provider: String,
    #[serde(default = "default_embeddings_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_embeddings_provider() -> String {
    "gemini".to_string()
}

fn default_embeddings_model() -> String {
    "text-embedding-004".to_string()
}

fn default_embedding_dim() -> usize {
    768
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            model: default_embeddings_model(),
            dimension: default_embedding_dim(),
            api_key: None,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Provider tag: "gemini", "claude", or "openai"
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
    #[serde(default = "default_large_context_tokens")]
    pub large_context_tokens: usize,
    #[serde(default = "default_reserved_completion")]
    pub reserved_completion_tokens: usize,
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_llm_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_temperature() -> f32 {
    generation::TEMPERATURE
}

fn default_context_tokens() -> usize {
    generation::CONTEXT_TOKENS
}

fn default_large_context_tokens() -> usize {
    generation::LARGE_CONTEXT_TOKENS
}

fn default_reserved_completion() -> usize {
    generation::RESERVED_COMPLETION_TOKENS
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
            context_tokens: default_context_tokens(),
            large_context_tokens: default_large_context_tokens(),
            reserved_completion_tokens: default_reserved_completion(),
        }
    }
}

/// SQL validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// "syntax_only" | "read_only" | "schema_loose" | "schema_strict"
    #[serde(default = "default_validation_level")]
    pub level: String,
    #[serde(default = "default_wide_table_threshold")]
    pub wide_table_threshold: usize,
}

fn default_validation_level() -> String {
    "schema_strict".to_string()
}

fn default_wide_table_threshold() -> usize {
    validator::WIDE_TABLE_THRESHOLD
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            level: default_validation_level(),
            wide_table_threshold: default_wide_table_threshold(),
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_max_bytes_billed")]
    pub max_bytes_billed: u64,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_dry_run_timeout_ms")]
    pub dry_run_timeout_ms: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_max_bytes_billed() -> u64 {
    executor::MAX_BYTES_BILLED_DEFAULT
}

fn default_max_rows() -> usize {
    executor::MAX_ROWS
}

fn default_dry_run_timeout_ms() -> u64 {
    timeouts::DRY_RUN_MS
}

fn default_query_timeout_ms() -> u64 {
    timeouts::WET_RUN_MS
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            max_bytes_billed: default_max_bytes_billed(),
            max_rows: default_max_rows(),
            dry_run_timeout_ms: default_dry_run_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

/// Data file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Vector blob path; the sidecar lives next to it with a `.json` suffix
    #[serde(default = "default_index_path")]
    pub vector_index: String,
    #[serde(default = "default_schema_csv")]
    pub schema_csv: String,
    #[serde(default = "default_safe_join_map")]
    pub safe_join_map: String,
}

fn default_index_path() -> String {
    "data/index/vectors.bin".to_string()
}

fn default_schema_csv() -> String {
    "data/schema.csv".to_string()
}

fn default_safe_join_map() -> String {
    "data/safe_joins.json".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            vector_index: default_index_path(),
            schema_csv: default_schema_csv(),
            safe_join_map: default_safe_join_map(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        let r = &self.retrieval;
        for (field, value) in [
            ("retrieval.vector_weight", r.vector_weight),
            ("retrieval.lexical_weight", r.lexical_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 1.0, got {}", value),
                });
            }
        }
        if r.default_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.default_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        let g = &self.generation;
        if g.reserved_completion_tokens >= g.context_tokens {
            return Err(ConfigError::InvalidValue {
                field: "generation.reserved_completion_tokens".to_string(),
                message: format!(
                    "Reserved completion ({}) must be below the context window ({})",
                    g.reserved_completion_tokens, g.context_tokens
                ),
            });
        }

        if self.embeddings.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embeddings.dimension".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        match self.validation.level.as_str() {
            "syntax_only" | "read_only" | "schema_loose" | "schema_strict" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "validation.level".to_string(),
                    message: format!("Unknown level '{}'", other),
                });
            }
        }

        Ok(())
    }

    /// Apply the dedicated operational environment variables on top of the
    /// file/prefix layers.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("EMBEDDINGS_PROVIDER") {
            self.embeddings.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.generation.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL_DEFAULT") {
            self.generation.model = v;
        }
        if let Ok(v) = std::env::var("WAREHOUSE_PROJECT") {
            self.executor.project = v;
        }
        if let Ok(v) = std::env::var("VECTOR_INDEX_PATH") {
            self.paths.vector_index = v;
        }
        if let Ok(v) = std::env::var("SCHEMA_CSV_PATH") {
            self.paths.schema_csv = v;
        }
        if let Ok(v) = std::env::var("SAFE_JOIN_MAP_PATH") {
            self.paths.safe_join_map = v;
        }
        if let Ok(v) = std::env::var("MAX_BYTES_BILLED_DEFAULT") {
            match v.parse() {
                Ok(bytes) => self.executor.max_bytes_billed = bytes,
                Err(_) => {
                    tracing::warn!(value = %v, "Ignoring unparseable MAX_BYTES_BILLED_DEFAULT")
                }
            }
        }
    }
}

/// Load settings.
///
/// Priority: dedicated env vars > `SQLSCOUT_*` env vars > `config/{env}.yaml`
/// > `config/default.yaml` > built-in defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder()
        .add_source(File::from(Path::new("config/default.yaml")).required(false));

    if let Some(env) = env {
        builder = builder
            .add_source(File::from(Path::new(&format!("config/{}.yaml", env))).required(false));
    }

    let raw = builder
        .add_source(Environment::with_prefix("SQLSCOUT").separator("__"))
        .build()?;

    let mut settings: Settings = raw.try_deserialize()?;
    settings.apply_env_overrides();
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.retrieval.default_k, 4);
        assert!((settings.retrieval.vector_weight - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bad_weight_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.vector_weight = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_level_rejected() {
        let mut settings = Settings::default();
        settings.validation.level = "paranoid".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reserved_completion_bound() {
        let mut settings = Settings::default();
        settings.generation.reserved_completion_tokens = settings.generation.context_tokens;
        assert!(settings.validate().is_err());
    }
}
