//! Pipeline orchestration
//!
//! One request flows Rewriter -> Retriever -> Schema Injector -> Prompt ->
//! LLM -> Validator, accumulating findings and usage counters. Rewriter
//! failures degrade to the original question; retrieval failures abort;
//! validation failures never raise an error, they set status and null the
//! SQL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use sqlscout_config::constants::timeouts;
use sqlscout_config::GenerationConfig;
use sqlscout_core::{
    AgentKind, Deadline, Error, Finding, GenerationRequest, LanguageModel, Result, UsageCounters,
    ValidationStatus,
};
use sqlscout_rag::{HybridRetriever, SearchOptions};
use sqlscout_sqlguard::{SqlValidator, ValidationLevel};

use crate::agents::{profile, resolve_agent};
use crate::dedup::dedup_for_prompt;
use crate::extract::extract_sql;
use crate::prompt::PromptBuilder;
use crate::rewriter::QueryRewriter;
use crate::schema_injector::SchemaInjector;

/// One engine request, normalized from either HTTP endpoint.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub question: String,
    pub k: usize,
    pub agent_type: Option<String>,
    pub conversation_context: Option<String>,
    pub llm_model: Option<String>,
    pub query_rewriting: bool,
    pub sql_validation: bool,
    /// `false` retrieves with the dense stage only.
    pub hybrid_search: bool,
    /// Allow the dominant-lexical weight shift for this request.
    pub auto_adjust_weights: bool,
    /// Context-budget hint: use the large context window.
    pub large_context: bool,
}

/// One entry of the source manifest.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRecord {
    pub id: String,
    pub score: f32,
    pub sql: String,
    pub description: String,
}

/// The engine's answer for one request.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub answer: String,
    pub sql: Option<String>,
    pub cleaned_sql: Option<String>,
    pub sources: Vec<SourceRecord>,
    pub usage: UsageCounters,
    pub findings: Vec<Finding>,
}

const EXPLAIN_HELP: &str = "Use @explain together with a SQL query (or after a \
question that produced one) and I will walk through what it does.";

pub struct QueryEngine {
    retriever: Arc<HybridRetriever>,
    llm: Arc<dyn LanguageModel>,
    validator: Arc<SqlValidator>,
    injector: SchemaInjector,
    rewriter: QueryRewriter,
    generation: GenerationConfig,
    validation_level: ValidationLevel,
}

impl QueryEngine {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        llm: Arc<dyn LanguageModel>,
        validator: Arc<SqlValidator>,
        generation: GenerationConfig,
        validation_level: ValidationLevel,
    ) -> Self {
        let injector = SchemaInjector::new(
            Arc::clone(validator.schema()),
            Arc::clone(validator.joins()),
        );
        let rewriter = QueryRewriter::new(Arc::clone(&llm));
        Self {
            retriever,
            llm,
            validator,
            injector,
            rewriter,
            generation,
            validation_level,
        }
    }

    pub fn validator(&self) -> &Arc<SqlValidator> {
        &self.validator
    }

    /// Answer one question end to end.
    pub async fn answer(&self, request: &EngineRequest, deadline: Deadline) -> Result<EngineResponse> {
        if request.question.trim().is_empty() {
            return Err(Error::InvalidInput("question must not be empty".to_string()));
        }

        let (kind, question) =
            resolve_agent(&request.question, request.agent_type.as_deref())?;
        let agent = profile(kind);
        let mut findings: Vec<Finding> = Vec::new();
        let mut usage = UsageCounters::default();

        tracing::info!(
            agent = %kind,
            k = request.k,
            question_len = question.len(),
            "Processing query"
        );

        // A bare @explain refers to the last SQL in the conversation; with
        // nothing to explain, answer with usage help and skip the pipeline.
        let question = if kind == AgentKind::Explain && question.is_empty() {
            match request
                .conversation_context
                .as_deref()
                .and_then(extract_sql)
            {
                Some(prior_sql) => format!("Explain this SQL:\n{}", prior_sql),
                None => {
                    return Ok(EngineResponse {
                        answer: EXPLAIN_HELP.to_string(),
                        sql: None,
                        cleaned_sql: None,
                        sources: Vec::new(),
                        usage,
                        findings,
                    });
                }
            }
        } else {
            question
        };

        // Rewrite for retrieval; failures degrade to the original question.
        let retrieval_query = if request.query_rewriting && request.k > 0 {
            match self
                .rewriter
                .rewrite(
                    &question,
                    request.conversation_context.as_deref(),
                    self.validator.schema(),
                    deadline,
                )
                .await
            {
                Ok(rewrite) => rewrite.question,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, "Query rewrite unavailable, using original");
                    findings.push(Finding::info(
                        "rewrite_unavailable",
                        "query rewriting failed; retrieved with the original question",
                    ));
                    question.clone()
                }
            }
        } else {
            question.clone()
        };

        // Retrieval. Errors here abort the request.
        let retrieval_started = Instant::now();
        let search_options = SearchOptions {
            hybrid: request.hybrid_search,
            auto_adjust_weights: request.auto_adjust_weights,
        };
        let retrieval = self
            .retriever
            .search(&retrieval_query, request.k, search_options, deadline)
            .await?;
        usage.retrieval_ms = retrieval_started.elapsed().as_millis() as u64;

        let sources: Vec<SourceRecord> = retrieval
            .hits
            .iter()
            .map(|hit| SourceRecord {
                id: hit.exemplar.id.clone(),
                score: hit.fused_score,
                sql: hit.exemplar.sql.clone(),
                description: hit.exemplar.description.clone(),
            })
            .collect();

        // Schema snippet and prompt assembly.
        let snippet = if agent.include_schema {
            Some(self.injector.inject(&retrieval, &question))
        } else {
            None
        };

        let examples = if agent.include_examples {
            dedup_for_prompt(&retrieval.hits)
        } else {
            Vec::new()
        };

        let context_tokens = if request.large_context {
            self.generation.large_context_tokens
        } else {
            self.generation.context_tokens
        };
        let builder = PromptBuilder::new(
            context_tokens,
            self.generation.reserved_completion_tokens,
        );
        let prompt = builder.build(
            &agent,
            &question,
            snippet.as_ref().map(|s| s.text.as_str()),
            request.conversation_context.as_deref(),
            &examples,
        );

        tracing::debug!(
            prompt_tokens_est = prompt.estimated_tokens,
            examples = prompt.examples_included,
            "Prompt assembled"
        );

        // Generation.
        deadline.check()?;
        let generation_started = Instant::now();
        let generation_request = GenerationRequest::new(prompt.text)
            .with_model(request.llm_model.clone().unwrap_or_default())
            .with_temperature(self.generation.temperature)
            .with_max_output_tokens(self.generation.reserved_completion_tokens);

        let budget = deadline.clamp(Duration::from_millis(timeouts::LLM_REQUEST_MS * 4));
        let generation =
            match tokio::time::timeout(budget, self.llm.generate(&generation_request)).await {
                Ok(result) => result?,
                Err(_) if deadline.expired() => return Err(Error::Cancelled),
                Err(_) => {
                    return Err(Error::GenerationFailure(
                        "generation timed out".to_string(),
                    ))
                }
            };
        usage.generation_ms = generation_started.elapsed().as_millis() as u64;
        usage.prompt_tokens = generation.prompt_tokens;
        usage.completion_tokens = generation.completion_tokens;
        usage.total_tokens = generation.prompt_tokens + generation.completion_tokens;

        // SQL extraction and validation.
        let mut sql = if agent.expects_sql {
            extract_sql(&generation.text)
        } else {
            None
        };
        let mut cleaned_sql = sql.clone();

        if agent.expects_sql && sql.is_none() && kind != AgentKind::Explain {
            findings.push(Finding::info(
                "no_sql",
                "the answer does not contain a SQL statement",
            ));
        }

        if request.sql_validation {
            if let Some(candidate) = &sql {
                let validation_started = Instant::now();
                let validated = self.validator.validate(candidate, self.validation_level);
                usage.validation_ms = validation_started.elapsed().as_millis() as u64;
                findings.extend(validated.findings.iter().cloned());

                if validated.status == ValidationStatus::Error {
                    sql = None;
                    cleaned_sql = None;
                } else {
                    cleaned_sql = Some(validated.normalized_sql);
                }
            }
        }

        Ok(EngineResponse {
            answer: generation.text,
            sql,
            cleaned_sql,
            sources,
            usage,
            findings,
        })
    }
}
