//! Application state
//!
//! The loaded indices and schema form one immutable `EngineSnapshot` behind
//! an `Arc`; a reload builds a fresh snapshot and swaps the pointer under a
//! write latch while in-flight requests finish on the old one. The
//! retrieval cache lives inside the snapshot's retriever and is keyed by
//! the index fingerprint, so swapped-out entries can never serve a new
//! snapshot.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;

use sqlscout_config::Settings;
use sqlscout_core::{Error, LanguageModel, Result, Warehouse};
use sqlscout_engine::QueryEngine;
use sqlscout_llm::{LlmFactory, LlmProviderConfig};
use sqlscout_rag::{create_embedder, HybridRetriever, LexicalIndex, RetrieverConfig, VectorIndex};
use sqlscout_sqlguard::{SafeJoinMap, SchemaStore, SqlValidator, ValidationLevel};
use sqlscout_warehouse::{BigQueryConfig, BigQueryWarehouse, QueryExecutor};

/// One immutable generation of loaded data and the engine over it.
pub struct EngineSnapshot {
    pub engine: QueryEngine,
    pub fingerprint: String,
}

impl EngineSnapshot {
    /// Load indices, schema, and the safe-join map per the settings.
    pub fn load(settings: &Settings, llm: Arc<dyn LanguageModel>) -> Result<Self> {
        let vector = Arc::new(VectorIndex::load(Path::new(&settings.paths.vector_index))?);
        let lexical = Arc::new(LexicalIndex::build(vector.exemplars())?);
        let embedder = create_embedder(&settings.embeddings)?;

        if vector.dimension() != embedder.dimension() {
            return Err(Error::Configuration(format!(
                "index dimension {} does not match embedding provider dimension {}",
                vector.dimension(),
                embedder.dimension()
            )));
        }

        let schema = Arc::new(
            SchemaStore::load_csv(Path::new(&settings.paths.schema_csv))
                .map_err(sqlscout_core::Error::from)?,
        );
        let joins = SafeJoinMap::load_json(Path::new(&settings.paths.safe_join_map))
            .map_err(sqlscout_core::Error::from)?;
        joins
            .validate_against(&schema)
            .map_err(sqlscout_core::Error::from)?;

        let fingerprint = vector.fingerprint().to_string();
        let retriever = Arc::new(HybridRetriever::new(
            RetrieverConfig::from(&settings.retrieval),
            vector,
            lexical,
            embedder,
        ));

        let level = ValidationLevel::from_str(&settings.validation.level)
            .unwrap_or(ValidationLevel::SchemaStrict);
        let validator = Arc::new(
            SqlValidator::new(schema, Arc::new(joins))
                .with_wide_table_threshold(settings.validation.wide_table_threshold),
        );

        let engine = QueryEngine::new(
            retriever,
            llm,
            validator,
            settings.generation.clone(),
            level,
        );

        Ok(Self {
            engine,
            fingerprint,
        })
    }
}

/// Shared state across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Settings>>,
    snapshot: Arc<RwLock<Arc<EngineSnapshot>>>,
    pub llm: Arc<dyn LanguageModel>,
    pub executor: Arc<QueryExecutor>,
    /// Admission control; exhausted permits shed load with `Overloaded`.
    pub permits: Arc<Semaphore>,
}

impl AppState {
    /// Build the initial state: LLM backend, warehouse client, snapshot.
    pub fn initialize(settings: Settings) -> Result<Self> {
        let provider = LlmProviderConfig::from_settings(&settings.generation)
            .map_err(sqlscout_core::Error::from)?;
        let llm = LlmFactory::create(&provider).map_err(sqlscout_core::Error::from)?;

        let warehouse: Arc<dyn Warehouse> = Arc::new(
            BigQueryWarehouse::new(BigQueryConfig::new(settings.executor.project.clone()))
                .map_err(sqlscout_core::Error::from)?,
        );
        let executor = Arc::new(QueryExecutor::new(warehouse, &settings.executor));

        let snapshot = Arc::new(EngineSnapshot::load(&settings, Arc::clone(&llm))?);
        tracing::info!(fingerprint = %snapshot.fingerprint, "Engine snapshot loaded");

        let permits = Arc::new(Semaphore::new(settings.server.max_concurrent_requests));

        Ok(Self {
            config: Arc::new(RwLock::new(settings)),
            snapshot: Arc::new(RwLock::new(snapshot)),
            llm,
            executor,
            permits,
        })
    }

    /// Build state from pre-constructed parts (tests).
    pub fn from_parts(
        settings: Settings,
        snapshot: EngineSnapshot,
        llm: Arc<dyn LanguageModel>,
        executor: Arc<QueryExecutor>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.server.max_concurrent_requests));
        Self {
            config: Arc::new(RwLock::new(settings)),
            snapshot: Arc::new(RwLock::new(Arc::new(snapshot))),
            llm,
            executor,
            permits,
        }
    }

    /// The current snapshot; requests clone the `Arc` once and keep it for
    /// their whole lifetime.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Rebuild the snapshot from disk and swap it in.
    pub fn reload_snapshot(&self) -> Result<String> {
        let settings = self.config.read().clone();
        let fresh = Arc::new(EngineSnapshot::load(&settings, Arc::clone(&self.llm))?);
        let fingerprint = fresh.fingerprint.clone();
        *self.snapshot.write() = fresh;
        tracing::info!(fingerprint = %fingerprint, "Engine snapshot reloaded");
        Ok(fingerprint)
    }
}
