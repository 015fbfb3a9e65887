//! Dense vector index
//!
//! On disk the index is two files: a raw little-endian float32 blob
//! (`N x D`) and a JSON sidecar mapping row index to exemplar id and stored
//! metadata. The index fingerprint is the SHA-256 of the blob; a sidecar
//! carrying a different fingerprint is refused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sqlscout_core::Exemplar;

use crate::RagError;

/// Sidecar file: dimension, blob fingerprint, and per-row exemplar records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub dimension: usize,
    pub fingerprint: String,
    pub exemplars: Vec<SidecarRecord>,
}

/// One exemplar with the blob row it was embedded into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarRecord {
    pub row: usize,
    #[serde(flatten)]
    pub exemplar: Exemplar,
}

/// Conventional sidecar location: the blob path with a `.json` extension.
pub fn sidecar_path_for(blob_path: &Path) -> PathBuf {
    blob_path.with_extension("json")
}

/// SHA-256 hex digest of the raw blob bytes.
pub fn fingerprint_of(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// In-memory dense index with brute-force cosine search.
pub struct VectorIndex {
    dimension: usize,
    fingerprint: String,
    vectors: Vec<f32>,
    exemplars: Vec<Arc<Exemplar>>,
}

impl VectorIndex {
    /// Load the blob and its sidecar, verifying shape and fingerprint.
    pub fn load(blob_path: &Path) -> Result<Self, RagError> {
        let bytes = std::fs::read(blob_path)?;
        let sidecar_path = sidecar_path_for(blob_path);
        let sidecar_text = std::fs::read_to_string(&sidecar_path)?;
        let sidecar: Sidecar = serde_json::from_str(&sidecar_text)
            .map_err(|e| RagError::Index(format!("bad sidecar {}: {}", sidecar_path.display(), e)))?;

        let blob_fingerprint = fingerprint_of(&bytes);
        if sidecar.fingerprint != blob_fingerprint {
            return Err(RagError::FingerprintMismatch {
                sidecar: sidecar.fingerprint,
                blob: blob_fingerprint,
            });
        }

        if sidecar.dimension == 0 {
            return Err(RagError::Index("sidecar dimension is 0".to_string()));
        }
        let stride = sidecar.dimension * std::mem::size_of::<f32>();
        if bytes.len() % stride != 0 {
            return Err(RagError::Index(format!(
                "blob length {} is not a multiple of row stride {}",
                bytes.len(),
                stride
            )));
        }
        let rows = bytes.len() / stride;
        if rows != sidecar.exemplars.len() {
            return Err(RagError::Index(format!(
                "blob has {} rows but sidecar lists {} exemplars",
                rows,
                sidecar.exemplars.len()
            )));
        }

        let mut vectors = Vec::with_capacity(rows * sidecar.dimension);
        for chunk in bytes.chunks_exact(4) {
            vectors.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        let mut exemplars = vec![None; rows];
        for record in sidecar.exemplars {
            if record.row >= rows {
                return Err(RagError::Index(format!(
                    "sidecar row {} out of range ({} rows)",
                    record.row, rows
                )));
            }
            exemplars[record.row] = Some(Arc::new(record.exemplar));
        }
        let exemplars: Vec<Arc<Exemplar>> = exemplars
            .into_iter()
            .enumerate()
            .map(|(row, e)| e.ok_or_else(|| RagError::Index(format!("sidecar misses row {}", row))))
            .collect::<Result<_, _>>()?;

        tracing::info!(
            rows,
            dimension = sidecar.dimension,
            fingerprint = %blob_fingerprint,
            "Vector index loaded"
        );

        Ok(Self {
            dimension: sidecar.dimension,
            fingerprint: blob_fingerprint,
            vectors,
            exemplars,
        })
    }

    /// Build an index directly from vectors and exemplars (tests, tooling).
    pub fn from_parts(
        dimension: usize,
        vectors: Vec<Vec<f32>>,
        exemplars: Vec<Exemplar>,
    ) -> Result<Self, RagError> {
        if vectors.len() != exemplars.len() {
            return Err(RagError::Index(format!(
                "{} vectors for {} exemplars",
                vectors.len(),
                exemplars.len()
            )));
        }
        let mut flat = Vec::with_capacity(vectors.len() * dimension);
        for v in &vectors {
            if v.len() != dimension {
                return Err(RagError::Index(format!(
                    "vector of length {} in a dimension-{} index",
                    v.len(),
                    dimension
                )));
            }
            flat.extend_from_slice(v);
        }
        let bytes: Vec<u8> = flat.iter().flat_map(|f| f.to_le_bytes()).collect();
        Ok(Self {
            dimension,
            fingerprint: fingerprint_of(&bytes),
            vectors: flat,
            exemplars: exemplars.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    pub fn exemplar(&self, row: usize) -> &Arc<Exemplar> {
        &self.exemplars[row]
    }

    pub fn exemplars(&self) -> &[Arc<Exemplar>] {
        &self.exemplars
    }

    /// Cosine top-k. Scores are monotone similarity, deterministically
    /// ordered (score descending, exemplar id ascending on ties).
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.is_empty() || query.len() != self.dimension {
            return Vec::new();
        }

        let query_norm = norm(query);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, v)| {
                let n = norm(v);
                let score = if n == 0.0 {
                    0.0
                } else {
                    dot(query, v) / (query_norm * n)
                };
                (row, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.exemplars[a.0].id.cmp(&self.exemplars[b.0].id))
        });
        scored.truncate(k);
        scored
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}
