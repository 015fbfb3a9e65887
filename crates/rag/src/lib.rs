//! Hybrid retrieval over the exemplar corpus
//!
//! Features:
//! - Dense cosine search over a memory-loaded vector blob with a JSON sidecar
//! - Sparse BM25 search via Tantivy over `description + sql`
//! - Weighted-sum fusion with per-query BM25 normalization
//! - Bounded LRU retrieval cache keyed by the index fingerprint
//! - Interchangeable embedding providers (remote Gemini, local hashing)

pub mod cache;
pub mod embeddings;
pub mod retriever;
pub mod sparse_search;
pub mod vector_index;

pub use cache::{CacheStats, RetrievalCache};
pub use embeddings::{create_embedder, GeminiEmbedder, HashEmbedder};
pub use retriever::{HybridRetriever, RetrieverConfig, SearchOptions, Weights};
pub use sparse_search::LexicalIndex;
pub use vector_index::{sidecar_path_for, Sidecar, SidecarRecord, VectorIndex};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Index fingerprint mismatch: sidecar has {sidecar}, blob is {blob}")]
    FingerprintMismatch { sidecar: String, blob: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RagError> for sqlscout_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Embedding(msg) => sqlscout_core::Error::EmbeddingFailure(msg),
            other => sqlscout_core::Error::IndexUnavailable(other.to_string()),
        }
    }
}
