//! Hybrid retriever
//!
//! Fuses dense cosine similarity with normalized BM25 under a weighted sum.
//! Both stages retrieve `max(k, 20)` candidates; lexical scores are
//! normalized per query by the top raw score. When `auto_adjust_weights` is
//! on and the top raw BM25 score clears the dominance threshold, fusion
//! shifts from `(0.7, 0.3)` to balanced `(0.5, 0.5)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlscout_config::constants::{retrieval, timeouts};
use sqlscout_config::RetrievalConfig;
use sqlscout_core::{
    Deadline, EmbeddingProvider, Error, RetrievalResult, Result, ScoredExemplar,
};

use crate::cache::RetrievalCache;
use crate::sparse_search::LexicalIndex;
use crate::vector_index::VectorIndex;
use crate::RagError;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Weight for dense scores in fusion (0.0 - 1.0)
    pub vector_weight: f32,
    /// Weight for lexical scores in fusion (0.0 - 1.0)
    pub lexical_weight: f32,
    /// Shift to balanced weights on a dominant lexical match
    pub auto_adjust_weights: bool,
    /// Raw BM25 score above which the top lexical hit counts as dominant
    pub lexical_dominance_threshold: f32,
    /// Candidate pool floor per stage
    pub min_candidates: usize,
    /// Retrieval cache capacity
    pub cache_capacity: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            vector_weight: retrieval::VECTOR_WEIGHT,
            lexical_weight: retrieval::LEXICAL_WEIGHT,
            auto_adjust_weights: true,
            lexical_dominance_threshold: retrieval::LEXICAL_DOMINANCE_THRESHOLD,
            min_candidates: retrieval::MIN_CANDIDATES,
            cache_capacity: retrieval::CACHE_CAPACITY,
        }
    }
}

impl From<&RetrievalConfig> for RetrieverConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            vector_weight: config.vector_weight,
            lexical_weight: config.lexical_weight,
            auto_adjust_weights: config.auto_adjust_weights,
            lexical_dominance_threshold: config.lexical_dominance_threshold,
            min_candidates: retrieval::MIN_CANDIDATES,
            cache_capacity: config.cache_capacity,
        }
    }
}

/// Effective fusion weights for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub vector: f32,
    pub lexical: f32,
}

/// Per-request retrieval knobs from the API surface.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// `false` runs the dense stage only.
    pub hybrid: bool,
    /// Allow the dominant-lexical weight shift for this request.
    pub auto_adjust_weights: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            hybrid: true,
            auto_adjust_weights: true,
        }
    }
}

/// Hybrid retriever over one index snapshot.
pub struct HybridRetriever {
    config: RetrieverConfig,
    vector: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: RetrievalCache,
}

impl HybridRetriever {
    pub fn new(
        config: RetrieverConfig,
        vector: Arc<VectorIndex>,
        lexical: Arc<LexicalIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let cache = RetrievalCache::new(config.cache_capacity);
        Self {
            config,
            vector,
            lexical,
            embedder,
            cache,
        }
    }

    /// The snapshot is usable: dimensions line up and both stages cover the
    /// same exemplar set.
    pub fn ready(&self) -> bool {
        self.vector.dimension() == self.embedder.dimension()
            && self.vector.len() == self.lexical.doc_count()
    }

    pub fn fingerprint(&self) -> &str {
        self.vector.fingerprint()
    }

    pub fn vector_index(&self) -> &Arc<VectorIndex> {
        &self.vector
    }

    /// Top-`k` exemplars for a retrieval query.
    ///
    /// Identical inputs against an unchanged fingerprint return the cached
    /// result; ordering is fully deterministic (fused score descending, then
    /// dense score, then exemplar id).
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        options: SearchOptions,
        deadline: Deadline,
    ) -> Result<Arc<RetrievalResult>> {
        if k == 0 || self.vector.is_empty() {
            return Ok(Arc::new(RetrievalResult::default()));
        }
        deadline.check()?;

        let key = RetrievalCache::key(
            query,
            k,
            self.config.vector_weight,
            self.config.lexical_weight,
            self.config.auto_adjust_weights && options.auto_adjust_weights,
            options.hybrid,
            self.vector.fingerprint(),
        );
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(k, "Retrieval cache hit");
            return Ok(cached);
        }

        let pool = k.max(self.config.min_candidates);

        // Lexical search is CPU-bound tantivy work; run it off the async
        // executor, concurrently with the embedding call.
        let lexical_handle = options.hybrid.then(|| {
            let lexical = Arc::clone(&self.lexical);
            let lexical_query = query.to_string();
            tokio::task::spawn_blocking(move || lexical.search(&lexical_query, pool))
        });

        let embed_budget = deadline.clamp(Duration::from_millis(timeouts::EMBEDDING_MS));
        let query_vector = match tokio::time::timeout(embed_budget, self.embedder.embed(query))
            .await
        {
            Ok(result) => result?,
            Err(_) if deadline.expired() => return Err(Error::Cancelled),
            Err(_) => {
                return Err(Error::EmbeddingFailure("embedding call timed out".to_string()))
            }
        };

        let dense_hits = self.vector.search(&query_vector, pool);

        let lexical_hits = match lexical_handle {
            Some(handle) => handle
                .await
                .map_err(|e| RagError::Search(format!("lexical task failed: {}", e)))?
                .map_err(Error::from)?,
            None => Vec::new(),
        };

        deadline.check()?;

        let weights = self.effective_weights(&lexical_hits, options);

        let dense_by_id: Vec<(String, f32)> = dense_hits
            .iter()
            .map(|&(row, score)| (self.vector.exemplar(row).id.clone(), score))
            .collect();

        let fused = fuse(&dense_by_id, &normalize(&lexical_hits), weights);

        let mut hits = Vec::with_capacity(k.min(fused.len()));
        let by_id: HashMap<&str, usize> = self
            .vector
            .exemplars()
            .iter()
            .enumerate()
            .map(|(row, e)| (e.id.as_str(), row))
            .collect();

        for scored in fused.into_iter().take(k) {
            let Some(&row) = by_id.get(scored.id.as_str()) else {
                continue;
            };
            hits.push(ScoredExemplar {
                exemplar: Arc::clone(self.vector.exemplar(row)),
                fused_score: scored.fused,
                vector_score: scored.vector,
                lexical_score: scored.lexical,
            });
        }

        let result = Arc::new(RetrievalResult { hits });
        self.cache.put(key, Arc::clone(&result));
        Ok(result)
    }

    fn effective_weights(&self, lexical_hits: &[(String, f32)], options: SearchOptions) -> Weights {
        if !options.hybrid {
            return Weights {
                vector: 1.0,
                lexical: 0.0,
            };
        }
        let top_raw = lexical_hits.first().map(|(_, s)| *s).unwrap_or(0.0);
        if self.config.auto_adjust_weights
            && options.auto_adjust_weights
            && top_raw >= self.config.lexical_dominance_threshold
        {
            tracing::debug!(top_raw, "Dominant lexical match, using balanced weights");
            Weights {
                vector: retrieval::BALANCED_WEIGHT,
                lexical: retrieval::BALANCED_WEIGHT,
            }
        } else {
            Weights {
                vector: self.config.vector_weight,
                lexical: self.config.lexical_weight,
            }
        }
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }
}

/// One fused candidate.
#[derive(Debug, Clone)]
pub struct FusedScore {
    pub id: String,
    pub fused: f32,
    pub vector: f32,
    pub lexical: f32,
}

/// Normalize raw BM25 scores into [0, 1] by the per-query maximum.
fn normalize(lexical_hits: &[(String, f32)]) -> Vec<(String, f32)> {
    let max = lexical_hits
        .iter()
        .map(|(_, s)| *s)
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    lexical_hits
        .iter()
        .map(|(id, s)| (id.clone(), s / max))
        .collect()
}

/// Weighted-sum fusion over the candidate union; missing scores count as 0.
/// Ordering: fused descending, then dense score descending, then id
/// ascending.
fn fuse(dense: &[(String, f32)], lexical: &[(String, f32)], weights: Weights) -> Vec<FusedScore> {
    let mut merged: HashMap<&str, (f32, f32)> = HashMap::new();

    for (id, score) in dense {
        merged.entry(id.as_str()).or_insert((0.0, 0.0)).0 = score.clamp(0.0, 1.0);
    }
    for (id, score) in lexical {
        merged.entry(id.as_str()).or_insert((0.0, 0.0)).1 = score.clamp(0.0, 1.0);
    }

    let mut fused: Vec<FusedScore> = merged
        .into_iter()
        .map(|(id, (vector, lexical))| FusedScore {
            id: id.to_string(),
            fused: weights.vector * vector + weights.lexical * lexical,
            vector,
            lexical,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector
                    .partial_cmp(&a.vector)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}
