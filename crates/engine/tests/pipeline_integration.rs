//! End-to-end pipeline tests against in-process fakes: a deterministic hash
//! embedder, a scripted language model, and a static warehouse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sqlscout_config::GenerationConfig;
use sqlscout_core::{
    ColumnRef, Deadline, Error, Exemplar, Generation, GenerationRequest, JoinCardinality,
    JoinRelationship, LanguageModel, Result, SafeJoin,
};
use sqlscout_engine::{EngineRequest, QueryEngine};
use sqlscout_rag::{HashEmbedder, HybridRetriever, LexicalIndex, RetrieverConfig, VectorIndex};
use sqlscout_sqlguard::{SafeJoinMap, SchemaStore, SqlValidator, ValidationLevel};
use sqlscout_warehouse::{ExecuteOptions, QueryExecutor, StaticWarehouse};

/// Language model that replays a fixed response and records every prompt.
struct ScriptedModel {
    response: String,
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl ScriptedModel {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            response: String::new(),
            prompts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.prompts.lock().push(request.prompt.clone());
        if self.fail {
            return Err(Error::GenerationFailure("scripted failure".to_string()));
        }
        Ok(Generation {
            text: self.response.clone(),
            prompt_tokens: 100,
            completion_tokens: 50,
        })
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

fn exemplar(id: &str, description: &str, sql: &str, tables: &[&str]) -> Exemplar {
    Exemplar {
        id: id.to_string(),
        sql: sql.to_string(),
        description: description.to_string(),
        tables: tables.iter().map(|t| t.to_string()).collect(),
        joins: Vec::new(),
    }
}

fn schema() -> Arc<SchemaStore> {
    Arc::new(SchemaStore::from_rows(vec![
        row("ds.users", "id", "INT64", "user id"),
        row("ds.users", "email", "STRING", ""),
        row("ds.orders", "user_id", "INT64", ""),
        row("ds.orders", "amount", "NUMERIC", ""),
    ]))
}

fn row(t: &str, c: &str, d: &str, desc: &str) -> (String, String, String, String) {
    (t.to_string(), c.to_string(), d.to_string(), desc.to_string())
}

fn joins() -> Arc<SafeJoinMap> {
    Arc::new(SafeJoinMap::from_edges(vec![SafeJoin {
        left: ColumnRef::new("users", "id"),
        right: ColumnRef::new("orders", "user_id"),
        relationship: JoinRelationship::OneToMany,
        cardinality: JoinCardinality::Both,
    }]))
}

fn retriever_over(exemplars: Vec<Exemplar>) -> Arc<HybridRetriever> {
    let embedder = Arc::new(HashEmbedder::new(64));
    let vectors = exemplars
        .iter()
        .map(|e| embedder.embed_text(&format!("{}\n{}", e.description, e.sql)))
        .collect();
    let vector = Arc::new(VectorIndex::from_parts(64, vectors, exemplars.clone()).unwrap());
    let lexical = Arc::new(
        LexicalIndex::build(&exemplars.into_iter().map(Arc::new).collect::<Vec<_>>()).unwrap(),
    );
    Arc::new(HybridRetriever::new(
        RetrieverConfig::default(),
        vector,
        lexical,
        embedder,
    ))
}

fn engine_with(model: Arc<ScriptedModel>, exemplars: Vec<Exemplar>) -> QueryEngine {
    let validator = Arc::new(SqlValidator::new(schema(), joins()));
    QueryEngine::new(
        retriever_over(exemplars),
        model,
        validator,
        GenerationConfig::default(),
        ValidationLevel::SchemaStrict,
    )
}

fn request(question: &str) -> EngineRequest {
    EngineRequest {
        question: question.to_string(),
        k: 4,
        agent_type: None,
        conversation_context: None,
        llm_model: None,
        query_rewriting: false,
        sql_validation: true,
        hybrid_search: true,
        auto_adjust_weights: true,
        large_context: false,
    }
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

fn corpus() -> Vec<Exemplar> {
    vec![
        exemplar(
            "rev",
            "top revenue by user",
            "SELECT u.email, SUM(o.amount) AS revenue FROM ds.users u JOIN ds.orders o ON o.user_id = u.id GROUP BY u.email",
            &["ds.users", "ds.orders"],
        ),
        exemplar(
            "count",
            "order counts",
            "SELECT COUNT(*) FROM ds.orders",
            &["ds.orders"],
        ),
    ]
}

#[tokio::test]
async fn test_valid_sql_flows_through() {
    let model = Arc::new(ScriptedModel::new(
        "Here you go:\n```sql\nSELECT u.email FROM ds.users u JOIN ds.orders o ON o.user_id = u.id\n```",
    ));
    let engine = engine_with(Arc::clone(&model), corpus());

    let response = engine
        .answer(&request("revenue by user"), deadline())
        .await
        .unwrap();

    assert!(response.sql.is_some());
    let cleaned = response.cleaned_sql.unwrap();
    assert!(cleaned.contains("ds.users"));
    assert!(response.sources.len() <= 4);
    let mut ids: Vec<&str> = response.sources.iter().map(|s| s.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), response.sources.len());
    assert_eq!(response.usage.total_tokens, 150);
}

#[tokio::test]
async fn test_schema_agent_never_returns_sql() {
    let model = Arc::new(ScriptedModel::new(
        "The users table has id and email.\n```sql\nSELECT 1\n```",
    ));
    let engine = engine_with(Arc::clone(&model), corpus());

    let response = engine
        .answer(&request("@schema what is in users?"), deadline())
        .await
        .unwrap();

    assert!(response.sql.is_none());
    assert!(response.cleaned_sql.is_none());
    assert!(!response.answer.is_empty());

    // The schema agent also keeps examples out of the prompt.
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("Known good examples:"));
    assert!(prompts[0].contains("Schema:"));
}

#[tokio::test]
async fn test_rejected_sql_is_nulled_and_executor_refuses() {
    let model = Arc::new(ScriptedModel::new(
        "```sql\nDELETE FROM ds.orders WHERE 1=1\n```",
    ));
    let engine = engine_with(Arc::clone(&model), corpus());

    let response = engine
        .answer(&request("clean up orders"), deadline())
        .await
        .unwrap();

    assert!(response.sql.is_none());
    assert!(response.cleaned_sql.is_none());
    assert!(response
        .findings
        .iter()
        .any(|f| f.code == "write_verb"));

    // The executor refuses the same statement.
    let validated = engine
        .validator()
        .validate("DELETE FROM ds.orders WHERE 1=1", ValidationLevel::ReadOnly);
    let warehouse = Arc::new(StaticWarehouse::new());
    let executor = QueryExecutor::new(
        Arc::clone(&warehouse) as Arc<dyn sqlscout_core::Warehouse>,
        &sqlscout_config::ExecutorConfig::default(),
    );
    let err = executor
        .execute(
            &validated,
            &ExecuteOptions {
                dry_run: false,
                max_bytes_billed: None,
                deadline: deadline(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationRejected(_)));
    assert_eq!(warehouse.wet_runs(), 0);
}

#[tokio::test]
async fn test_dedup_shapes_prompt_not_sources() {
    let sql = "SELECT u.email FROM ds.users u JOIN ds.orders o ON o.user_id = u.id";
    let exemplars = vec![
        exemplar("a", "revenue one", sql, &["ds.users", "ds.orders"]),
        exemplar("b", "revenue two", sql, &["ds.users", "ds.orders"]),
        exemplar("c", "revenue three", sql, &["ds.users", "ds.orders"]),
    ];
    let model = Arc::new(ScriptedModel::new("ok, no query needed"));
    let engine = engine_with(Arc::clone(&model), exemplars);

    let response = engine
        .answer(&request("revenue"), deadline())
        .await
        .unwrap();

    // All three originals appear in the manifest.
    assert_eq!(response.sources.len(), 3);

    // Exactly one example survives into the prompt.
    let prompts = model.prompts();
    let example_count = prompts[0].matches("-- Example (").count();
    assert_eq!(example_count, 1);
}

#[tokio::test]
async fn test_k_zero_still_answers_from_schema() {
    let model = Arc::new(ScriptedModel::new("The users table holds accounts."));
    let engine = engine_with(Arc::clone(&model), corpus());

    let mut req = request("what does the users table contain?");
    req.k = 0;
    let response = engine.answer(&req, deadline()).await.unwrap();

    assert!(response.sources.is_empty());
    assert!(!response.answer.is_empty());
    // Question-matched tables still reach the prompt without retrieval.
    assert!(model.prompts()[0].contains("TABLE ds.users"));
}

#[tokio::test]
async fn test_empty_corpus_still_answers() {
    let model = Arc::new(ScriptedModel::new("Nothing indexed yet, but users exists."));
    let engine = engine_with(Arc::clone(&model), Vec::new());

    let response = engine
        .answer(&request("describe users"), deadline())
        .await
        .unwrap();
    assert!(response.sources.is_empty());
    assert!(!response.answer.is_empty());
}

#[tokio::test]
async fn test_rewriting_disabled_is_identity() {
    let model = Arc::new(ScriptedModel::new("fine"));
    let engine = engine_with(Arc::clone(&model), corpus());

    let mut req = request("revenue by user");
    req.query_rewriting = false;
    engine.answer(&req, deadline()).await.unwrap();

    // Exactly one LLM call: generation only, no rewrite round-trip.
    assert_eq!(model.prompts().len(), 1);
}

#[tokio::test]
async fn test_rewrite_failure_degrades_to_original() {
    // The same scripted model serves rewriting and generation, so a failing
    // model exercises the rewrite-degrade path and then fails generation;
    // instead, verify the finding with a model that fails only once.
    struct FlakyModel {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl LanguageModel for FlakyModel {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls == 1 {
                Err(Error::GenerationFailure("rewrite backend down".to_string()))
            } else {
                Ok(Generation {
                    text: "answer without sql".to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                })
            }
        }

        fn default_model(&self) -> &str {
            "flaky"
        }
    }

    let model = Arc::new(FlakyModel {
        calls: Mutex::new(0),
    });
    let validator = Arc::new(SqlValidator::new(schema(), joins()));
    let engine = QueryEngine::new(
        retriever_over(corpus()),
        model,
        validator,
        GenerationConfig::default(),
        ValidationLevel::SchemaStrict,
    );

    let mut req = request("revenue by user");
    req.query_rewriting = true;
    let response = engine.answer(&req, deadline()).await.unwrap();

    assert!(response
        .findings
        .iter()
        .any(|f| f.code == "rewrite_unavailable"));
    assert!(!response.answer.is_empty());
}

#[tokio::test]
async fn test_bare_explain_without_context_returns_help() {
    let model = Arc::new(ScriptedModel::new("should never be called"));
    let engine = engine_with(Arc::clone(&model), corpus());

    let response = engine.answer(&request("@explain"), deadline()).await.unwrap();
    assert!(response.answer.contains("@explain"));
    assert!(response.sql.is_none());
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn test_bare_explain_with_context_sql() {
    let model = Arc::new(ScriptedModel::new("This query counts orders."));
    let engine = engine_with(Arc::clone(&model), corpus());

    let mut req = request("@explain");
    req.conversation_context =
        Some("assistant: ```sql\nSELECT COUNT(*) FROM ds.orders\n```".to_string());
    let response = engine.answer(&req, deadline()).await.unwrap();

    assert!(!response.answer.is_empty());
    let prompts = model.prompts();
    assert!(prompts[0].contains("SELECT COUNT(*) FROM ds.orders"));
}

#[tokio::test]
async fn test_empty_question_is_input_error() {
    let model = Arc::new(ScriptedModel::new("x"));
    let engine = engine_with(Arc::clone(&model), corpus());

    let err = engine.answer(&request("   "), deadline()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_generation_failure_surfaces() {
    let model = Arc::new(ScriptedModel::failing());
    let engine = engine_with(Arc::clone(&model), corpus());

    let err = engine
        .answer(&request("revenue"), deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationFailure(_)));
}

#[tokio::test]
async fn test_cancelled_request_returns_no_partial_answer() {
    let model = Arc::new(ScriptedModel::new("never"));
    let engine = engine_with(Arc::clone(&model), corpus());

    let err = engine
        .answer(&request("revenue"), Deadline::after(Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}
