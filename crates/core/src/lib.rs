//! Core types and traits for the sqlscout engine
//!
//! Everything shared across crates lives here: the request/response data
//! model, the error taxonomy, the provider traits (embeddings, LLM,
//! warehouse), request deadlines, and token estimation.

pub mod deadline;
pub mod tokens;
pub mod traits;
pub mod types;

pub use deadline::Deadline;
pub use tokens::estimate_tokens;
pub use traits::{
    EmbeddingProvider, Generation, GenerationRequest, LanguageModel, QueryJob, QueryOutcome,
    Warehouse,
};
pub use types::{
    AgentKind, ColumnRef, ExecutionResult, Exemplar, Finding, FindingLevel, JoinCardinality,
    JoinEdge, JoinRelationship, RetrievalResult, SafeJoin, ScoredExemplar, UsageCounters,
    ValidatedSql, ValidationStatus,
};

use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// Each variant carries a stable machine code (see [`Error::code`]) that
/// crosses the API boundary; the display string is the human message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("retrieval index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("embedding provider failed: {0}")]
    EmbeddingFailure(String),

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("query rewrite backend unavailable: {0}")]
    RewriteBackendUnavailable(String),

    #[error("SQL was rejected by validation: {0}")]
    ValidationRejected(String),

    #[error("dry-run estimate {estimated_bytes} bytes exceeds cap {max_bytes_billed} bytes")]
    BudgetExceeded {
        estimated_bytes: u64,
        max_bytes_billed: u64,
    },

    #[error("query execution timed out")]
    ExecutionTimeout,

    #[error("warehouse backend error: {0}")]
    Backend(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("server overloaded")]
    Overloaded,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Stable machine-readable code for the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::EmbeddingFailure(_) => "embedding_failure",
            Error::GenerationFailure(_) => "generation_failure",
            Error::RewriteBackendUnavailable(_) => "rewrite_unavailable",
            Error::ValidationRejected(_) => "validation_rejected",
            Error::BudgetExceeded { .. } => "budget_exceeded",
            Error::ExecutionTimeout => "execution_timeout",
            Error::Backend(_) => "backend_error",
            Error::Cancelled => "cancelled",
            Error::Overloaded => "overloaded",
            Error::Configuration(_) => "configuration_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
