//! Offline index builder
//!
//! Reads the corpus CSV (`query,description,tables,joins`), embeds every
//! exemplar with the configured provider, and writes the vector blob
//! (little-endian float32, N x D) plus its JSON sidecar. The sidecar
//! carries the SHA-256 fingerprint of the blob; the server refuses a
//! mismatched pair.
//!
//! Exit codes: 0 ok, 2 config error, 3 corpus parse error, 4 embedding
//! backend failure.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use sqlscout_config::EmbeddingsConfig;
use sqlscout_core::{Exemplar, JoinEdge};
use sqlscout_rag::vector_index::{fingerprint_of, sidecar_path_for, Sidecar, SidecarRecord};
use sqlscout_rag::create_embedder;

const EXIT_CONFIG: u8 = 2;
const EXIT_CORPUS: u8 = 3;
const EXIT_EMBEDDING: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "sqlscout-indexer", about = "Build the exemplar vector index")]
struct Cli {
    /// Corpus CSV with columns: query, description, tables, joins
    #[arg(long)]
    corpus: PathBuf,

    /// Output blob path; the sidecar lands next to it with a .json suffix
    #[arg(long, env = "VECTOR_INDEX_PATH", default_value = "data/index/vectors.bin")]
    out: PathBuf,

    /// Embedding provider tag ("gemini" or "hash")
    #[arg(long, env = "EMBEDDINGS_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Embedding model id
    #[arg(long, default_value = "text-embedding-004")]
    model: String,

    /// Embedding dimension
    #[arg(long, default_value_t = 768)]
    dimension: usize,

    /// Embed at most this many corpus rows
    #[arg(long)]
    limit: Option<usize>,

    /// Parse and embed but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Embedding batch size
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct CorpusRow {
    query: String,
    description: String,
    #[serde(default)]
    tables: String,
    #[serde(default)]
    joins: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e.error);
            ExitCode::from(e.exit_code)
        }
    }
}

struct IndexerError {
    exit_code: u8,
    error: anyhow::Error,
}

fn config_err(error: anyhow::Error) -> IndexerError {
    IndexerError {
        exit_code: EXIT_CONFIG,
        error,
    }
}

fn corpus_err(error: anyhow::Error) -> IndexerError {
    IndexerError {
        exit_code: EXIT_CORPUS,
        error,
    }
}

fn embedding_err(error: anyhow::Error) -> IndexerError {
    IndexerError {
        exit_code: EXIT_EMBEDDING,
        error,
    }
}

fn run(cli: Cli) -> Result<(), IndexerError> {
    if cli.dimension == 0 {
        return Err(config_err(anyhow::anyhow!("--dimension must be at least 1")));
    }
    if cli.batch_size == 0 {
        return Err(config_err(anyhow::anyhow!("--batch-size must be at least 1")));
    }

    let embeddings_config = EmbeddingsConfig {
        provider: cli.provider.clone(),
        model: cli.model.clone(),
        dimension: cli.dimension,
        api_key: None,
    };
    let embedder = create_embedder(&embeddings_config)
        .map_err(|e| config_err(anyhow::anyhow!(e.to_string())))?;

    let exemplars = read_corpus(&cli).map_err(corpus_err)?;
    tracing::info!(count = exemplars.len(), "Corpus parsed");

    let texts: Vec<String> = exemplars
        .iter()
        .map(|e| format!("{}\n{}", e.description, e.sql))
        .collect();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| config_err(anyhow::anyhow!("tokio runtime: {}", e)))?;

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(cli.batch_size) {
        let batch = runtime
            .block_on(embedder.embed_batch(chunk))
            .map_err(|e| embedding_err(anyhow::anyhow!(e.to_string())))?;
        if batch.len() != chunk.len() {
            return Err(embedding_err(anyhow::anyhow!(
                "provider returned {} vectors for {} inputs",
                batch.len(),
                chunk.len()
            )));
        }
        for vector in &batch {
            if vector.len() != cli.dimension {
                return Err(embedding_err(anyhow::anyhow!(
                    "provider returned dimension {}, expected {}",
                    vector.len(),
                    cli.dimension
                )));
            }
        }
        vectors.extend(batch);
        tracing::info!(embedded = vectors.len(), total = texts.len(), "Embedding progress");
    }

    if cli.dry_run {
        tracing::info!("Dry run: skipping writes");
        return Ok(());
    }

    write_index(&cli, &exemplars, &vectors).map_err(config_err)
}

fn read_corpus(cli: &Cli) -> Result<Vec<Exemplar>> {
    let mut reader = csv::Reader::from_path(&cli.corpus)
        .with_context(|| format!("opening corpus {}", cli.corpus.display()))?;

    let mut exemplars = Vec::new();
    let mut dropped = 0usize;

    for (line, record) in reader.deserialize().enumerate() {
        if let Some(limit) = cli.limit {
            if exemplars.len() >= limit {
                break;
            }
        }

        let row: CorpusRow = record.with_context(|| format!("corpus row {}", line + 1))?;
        if row.query.trim().is_empty() {
            tracing::warn!(row = line + 1, "Dropping row with empty query");
            dropped += 1;
            continue;
        }

        let tables: Vec<String> = row
            .tables
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        // The joins column is free-form; malformed entries drop with a
        // warning and the runtime never re-parses them.
        let mut joins = Vec::new();
        for raw in row.joins.split(',').map(str::trim).filter(|j| !j.is_empty()) {
            match JoinEdge::parse(raw) {
                Some(edge) => joins.push(edge),
                None => {
                    tracing::warn!(row = line + 1, join = raw, "Dropping malformed join");
                }
            }
        }

        exemplars.push(Exemplar {
            id: format!("ex-{:04}", exemplars.len()),
            sql: row.query.trim().to_string(),
            description: row.description.trim().to_string(),
            tables,
            joins,
        });
    }

    if dropped > 0 {
        tracing::warn!(dropped, "Some corpus rows were dropped");
    }
    if exemplars.is_empty() {
        anyhow::bail!("corpus contains no usable rows");
    }
    Ok(exemplars)
}

fn write_index(cli: &Cli, exemplars: &[Exemplar], vectors: &[Vec<f32>]) -> Result<()> {
    if let Some(parent) = cli.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut blob: Vec<u8> = Vec::with_capacity(vectors.len() * cli.dimension * 4);
    for vector in vectors {
        for value in vector {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut file = std::fs::File::create(&cli.out)
        .with_context(|| format!("creating {}", cli.out.display()))?;
    file.write_all(&blob)?;

    let sidecar = Sidecar {
        dimension: cli.dimension,
        fingerprint: fingerprint_of(&blob),
        exemplars: exemplars
            .iter()
            .enumerate()
            .map(|(row, exemplar)| SidecarRecord {
                row,
                exemplar: exemplar.clone(),
            })
            .collect(),
    };

    let sidecar_path = sidecar_path_for(&cli.out);
    std::fs::write(&sidecar_path, serde_json::to_string_pretty(&sidecar)?)
        .with_context(|| format!("writing {}", sidecar_path.display()))?;

    tracing::info!(
        rows = exemplars.len(),
        blob = %cli.out.display(),
        sidecar = %sidecar_path.display(),
        fingerprint = %sidecar.fingerprint,
        "Index written"
    );
    Ok(())
}
