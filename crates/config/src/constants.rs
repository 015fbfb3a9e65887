//! Centralized constants
//!
//! Single source of truth for service endpoints, timeouts, and the tuning
//! defaults used across the workspace. Deployment-specific values (paths,
//! project ids, API keys) come from `Settings`, never from here.

/// Service endpoints (loaded from env vars with fallback defaults)
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Gemini API endpoint (env: GEMINI_API_BASE)
    pub static GEMINI_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string())
    });

    /// Anthropic API endpoint (env: ANTHROPIC_API_BASE)
    pub static ANTHROPIC_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("ANTHROPIC_API_BASE")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string())
    });

    /// OpenAI API endpoint (env: OPENAI_API_BASE)
    pub static OPENAI_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    });

    /// BigQuery REST endpoint (env: BIGQUERY_API_BASE)
    pub static BIGQUERY_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("BIGQUERY_API_BASE")
            .unwrap_or_else(|_| "https://bigquery.googleapis.com".to_string())
    });
}

/// Per-step timeouts (milliseconds)
pub mod timeouts {
    /// Embedding call timeout
    pub const EMBEDDING_MS: u64 = 5_000;

    /// Retrieval (dense + lexical + fusion) timeout
    pub const RETRIEVAL_MS: u64 = 1_000;

    /// Single LLM request timeout (retried up to `generation::MAX_RETRIES`)
    pub const LLM_REQUEST_MS: u64 = 30_000;

    /// Warehouse dry-run timeout
    pub const DRY_RUN_MS: u64 = 10_000;

    /// Warehouse wet-run timeout
    pub const WET_RUN_MS: u64 = 60_000;
}

/// Hybrid retrieval defaults
pub mod retrieval {
    /// Weight for dense (semantic) scores in fusion
    pub const VECTOR_WEIGHT: f32 = 0.7;

    /// Weight for lexical (BM25) scores in fusion
    pub const LEXICAL_WEIGHT: f32 = 0.3;

    /// Balanced weight used when a lexical match dominates
    pub const BALANCED_WEIGHT: f32 = 0.5;

    /// Raw BM25 score above which the top lexical hit is considered
    /// dominant and fusion shifts to balanced weights
    pub const LEXICAL_DOMINANCE_THRESHOLD: f32 = 8.0;

    /// Candidate pool floor per stage: each stage retrieves max(k, this)
    pub const MIN_CANDIDATES: usize = 20;

    /// Default top-k returned to the caller
    pub const DEFAULT_TOP_K: usize = 4;

    /// Retrieval cache capacity (entries)
    pub const CACHE_CAPACITY: usize = 256;
}

/// Generation defaults
pub mod generation {
    /// Prompt context window (tokens)
    pub const CONTEXT_TOKENS: usize = 8_192;

    /// Context window when the request asks for the large-context hint
    pub const LARGE_CONTEXT_TOKENS: usize = 32_768;

    /// Tokens reserved for the completion
    pub const RESERVED_COMPLETION_TOKENS: usize = 2_048;

    /// Sampling temperature
    pub const TEMPERATURE: f32 = 0.2;

    /// Retries on transient LLM errors (timeout, 5xx, rate limit)
    pub const MAX_RETRIES: u32 = 3;

    /// Initial retry backoff (doubles each attempt)
    pub const BACKOFF_INITIAL_MS: u64 = 500;

    /// Backoff ceiling
    pub const BACKOFF_CAP_MS: u64 = 4_000;

    /// Token 5-gram Jaccard similarity above which two exemplar SQLs are
    /// merged as near-duplicates
    pub const DEDUP_JACCARD: f64 = 0.85;

    /// N-gram size for near-duplicate detection
    pub const DEDUP_NGRAM: usize = 5;
}

/// Query rewriter defaults
pub mod rewriter {
    /// Completion cap for the rewrite call
    pub const MAX_OUTPUT_TOKENS: usize = 256;

    /// Rewrite sampling temperature
    pub const TEMPERATURE: f32 = 0.1;

    /// A rewrite shorter than the original is kept only if it names at
    /// least this many known schema tables
    pub const MIN_SCHEMA_TOKENS: usize = 2;
}

/// Schema snippet defaults
pub mod schema {
    /// Table cap for the prompt snippet
    pub const MAX_TABLES_IN_PROMPT: usize = 6;

    /// Column description truncation (characters)
    pub const COLUMN_DESC_MAX: usize = 80;

    /// Token budget for the whole snippet
    pub const SNIPPET_TOKEN_BUDGET: usize = 1_200;
}

/// Validator defaults
pub mod validator {
    /// Column count above which `SELECT *` draws a warning and a table is
    /// treated as fact-sized for the missing-LIMIT check
    pub const WIDE_TABLE_THRESHOLD: usize = 30;
}

/// Executor defaults
pub mod executor {
    /// Row payload cap; beyond this the result is truncated
    pub const MAX_ROWS: usize = 10_000;

    /// Default byte-bill cap (1 GiB) when neither request nor env set one
    pub const MAX_BYTES_BILLED_DEFAULT: u64 = 1 << 30;
}
