//! HTTP endpoints
//!
//! REST API over the engine. Error payloads carry a stable `code` and a
//! human message; validation failures are never HTTP errors, they surface
//! through `findings` on a 200.

use std::time::Duration;

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sqlscout_core::{Deadline, Error, Finding, UsageCounters};
use sqlscout_engine::{EngineRequest, SourceRecord};
use sqlscout_warehouse::ExecuteOptions;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.read();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    Router::new()
        .route("/query/search", post(query_search))
        .route("/query/quick", post(query_quick))
        .route("/sql/execute", post(sql_execute))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/admin/reload-index", post(reload_index))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// `/query/search` request body.
#[derive(Debug, Deserialize)]
struct SearchRequest {
    question: String,
    #[serde(default = "default_k")]
    k: usize,
    #[serde(default)]
    gemini_mode: bool,
    #[serde(default = "default_true")]
    hybrid_search: bool,
    #[serde(default = "default_true")]
    auto_adjust_weights: bool,
    #[serde(default = "default_true")]
    query_rewriting: bool,
    #[serde(default = "default_true")]
    sql_validation: bool,
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    conversation_context: Option<String>,
    #[serde(default)]
    llm_model: Option<String>,
}

fn default_k() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// `/query/quick` request body: same minus the retrieval knobs.
#[derive(Debug, Deserialize)]
struct QuickRequest {
    question: String,
    #[serde(default)]
    gemini_mode: bool,
    #[serde(default = "default_true")]
    sql_validation: bool,
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    conversation_context: Option<String>,
    #[serde(default)]
    llm_model: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    answer: String,
    sql: Option<String>,
    cleaned_sql: Option<String>,
    sources: Vec<SourceRecord>,
    usage: UsageBody,
    findings: Vec<Finding>,
}

#[derive(Debug, Serialize)]
struct UsageBody {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl From<UsageCounters> for UsageBody {
    fn from(usage: UsageCounters) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Map the error taxonomy onto HTTP statuses.
fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidInput(_) | Error::ValidationRejected(_) => StatusCode::BAD_REQUEST,
        Error::IndexUnavailable(_) | Error::EmbeddingFailure(_) | Error::Overloaded => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::GenerationFailure(_)
        | Error::RewriteBackendUnavailable(_)
        | Error::ExecutionTimeout => StatusCode::GATEWAY_TIMEOUT,
        Error::BudgetExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::Backend(_) => StatusCode::BAD_GATEWAY,
        Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: Error) -> Response {
    let status = status_for(&error);
    let body = ErrorBody {
        code: error.code(),
        message: error.to_string(),
    };
    (status, Json(body)).into_response()
}

fn request_deadline(state: &AppState) -> Deadline {
    let budget_ms = state.config.read().server.request_budget_ms;
    Deadline::after(Duration::from_millis(budget_ms))
}

async fn query_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let engine_request = EngineRequest {
        question: request.question,
        k: request.k,
        agent_type: request.agent_type,
        conversation_context: request.conversation_context,
        llm_model: request.llm_model,
        query_rewriting: request.query_rewriting,
        sql_validation: request.sql_validation,
        hybrid_search: request.hybrid_search,
        auto_adjust_weights: request.auto_adjust_weights,
        large_context: request.gemini_mode,
    };
    run_query(state, engine_request).await
}

/// Quick mode: fixed `k = 4`, concise chat preamble unless the question
/// carries its own directive.
async fn query_quick(
    State(state): State<AppState>,
    Json(request): Json<QuickRequest>,
) -> Response {
    let engine_request = EngineRequest {
        question: request.question,
        k: 4,
        agent_type: request.agent_type.or_else(|| Some("chat".to_string())),
        conversation_context: request.conversation_context,
        llm_model: request.llm_model,
        query_rewriting: false,
        sql_validation: request.sql_validation,
        hybrid_search: true,
        auto_adjust_weights: true,
        large_context: request.gemini_mode,
    };
    run_query(state, engine_request).await
}

async fn run_query(state: AppState, request: EngineRequest) -> Response {
    let _permit = match state.permits.try_acquire() {
        Ok(permit) => permit,
        Err(_) => return error_response(Error::Overloaded),
    };
    let deadline = request_deadline(&state);
    let snapshot = state.snapshot();

    match snapshot.engine.answer(&request, deadline).await {
        Ok(response) => Json(SearchResponse {
            answer: response.answer,
            sql: response.sql,
            cleaned_sql: response.cleaned_sql,
            sources: response.sources,
            usage: response.usage.into(),
            findings: response.findings,
        })
        .into_response(),
        Err(error) => {
            tracing::warn!(code = error.code(), error = %error, "Query failed");
            error_response(error)
        }
    }
}

/// `/sql/execute` request body.
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    sql: String,
    #[serde(default = "default_true")]
    dry_run: bool,
    #[serde(default)]
    max_bytes_billed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ExecuteResponse {
    data: Vec<serde_json::Map<String, serde_json::Value>>,
    total_rows: u64,
    bytes_processed: u64,
    bytes_billed: u64,
    cache_hit: bool,
    dry_run: bool,
    job_id: String,
    execution_time: u64,
}

async fn sql_execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let _permit = match state.permits.try_acquire() {
        Ok(permit) => permit,
        Err(_) => return error_response(Error::Overloaded),
    };
    let deadline = request_deadline(&state);
    let snapshot = state.snapshot();

    // Validation gates execution regardless of what the caller sends.
    let level = {
        let config = state.config.read();
        sqlscout_sqlguard::ValidationLevel::from_str(&config.validation.level)
            .unwrap_or(sqlscout_sqlguard::ValidationLevel::SchemaStrict)
    };
    let validated = snapshot.engine.validator().validate(&request.sql, level);

    let options = ExecuteOptions {
        dry_run: request.dry_run,
        max_bytes_billed: request.max_bytes_billed,
        deadline,
    };

    match state.executor.execute(&validated, &options).await {
        Ok(result) => Json(ExecuteResponse {
            data: result.rows,
            total_rows: result.row_count,
            bytes_processed: result.bytes_processed,
            bytes_billed: result.bytes_billed,
            cache_hit: result.cache_hit,
            dry_run: result.dry_run,
            job_id: result.job_id,
            execution_time: result.execution_time_ms,
        })
        .into_response(),
        Err(error) => {
            tracing::warn!(code = error.code(), error = %error, "Execution failed");
            error_response(error)
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    let snapshot = state.snapshot();
    Json(serde_json::json!({
        "status": "ready",
        "index_fingerprint": snapshot.fingerprint,
    }))
    .into_response()
}

async fn reload_index(State(state): State<AppState>) -> Response {
    match state.reload_snapshot() {
        Ok(fingerprint) => Json(serde_json::json!({
            "status": "reloaded",
            "index_fingerprint": fingerprint,
        }))
        .into_response(),
        Err(error) => error_response(error),
    }
}
