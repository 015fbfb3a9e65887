//! Query rewriter
//!
//! One short LLM call that expands the user's ask into a retrieval-oriented
//! keyword query. The rewrite replaces the original only when it is at least
//! as long or names enough schema tables; a hallucinated narrowing is worse
//! than no rewrite at all.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sqlscout_config::constants::{rewriter as defaults, timeouts};
use sqlscout_core::{Deadline, Error, GenerationRequest, LanguageModel, Result};
use sqlscout_sqlguard::SchemaStore;

/// Outcome of a rewrite attempt.
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub question: String,
    pub was_rewritten: bool,
}

pub struct QueryRewriter {
    llm: Arc<dyn LanguageModel>,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Produce a retrieval-optimized reformulation of `question`.
    ///
    /// Fails with `RewriteBackendUnavailable` only when the LLM call errors;
    /// the caller falls back to the original question and never aborts the
    /// pipeline over a rewrite.
    pub async fn rewrite(
        &self,
        question: &str,
        context: Option<&str>,
        schema: &SchemaStore,
        deadline: Deadline,
    ) -> Result<Rewrite> {
        deadline.check()?;

        let context_text = match context {
            Some(c) if !c.trim().is_empty() => format!("Conversation so far:\n{}\n\n", c),
            _ => String::new(),
        };

        let prompt = format!(
            "Produce a dense retrieval query for a SQL example search engine.\n\
             Enumerate the table names, metrics, and SQL constructs relevant to the \
             user's ask. Output keywords and table names only; no prose, no SQL.\n\n\
             {}User ask: \"{}\"",
            context_text, question
        );

        let request = GenerationRequest::new(prompt)
            .with_temperature(defaults::TEMPERATURE)
            .with_max_output_tokens(defaults::MAX_OUTPUT_TOKENS);

        let budget = deadline.clamp(Duration::from_millis(timeouts::LLM_REQUEST_MS));
        let generation = match tokio::time::timeout(budget, self.llm.generate(&request)).await {
            Ok(Ok(generation)) => generation,
            Ok(Err(e)) => return Err(Error::RewriteBackendUnavailable(e.to_string())),
            Err(_) if deadline.expired() => return Err(Error::Cancelled),
            Err(_) => {
                return Err(Error::RewriteBackendUnavailable(
                    "rewrite call timed out".to_string(),
                ))
            }
        };

        let rewritten = generation.text.trim().to_string();
        if accept(&rewritten, question, schema) {
            tracing::debug!(original = question, rewritten = %rewritten, "Query rewritten");
            Ok(Rewrite {
                question: rewritten,
                was_rewritten: true,
            })
        } else {
            tracing::debug!(original = question, "Rewrite discarded, keeping original");
            Ok(Rewrite {
                question: question.to_string(),
                was_rewritten: false,
            })
        }
    }
}

/// Keep the rewrite only if it expands the ask (at least as long) or names
/// at least `MIN_SCHEMA_TOKENS` known schema tables.
fn accept(rewritten: &str, original: &str, schema: &SchemaStore) -> bool {
    if rewritten.is_empty() {
        return false;
    }
    if rewritten.len() >= original.len() {
        return true;
    }
    schema_tokens(rewritten, schema) >= defaults::MIN_SCHEMA_TOKENS
}

/// Count distinct schema table leaves mentioned in the text.
fn schema_tokens(text: &str, schema: &SchemaStore) -> usize {
    let tokens: HashSet<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    schema
        .tables()
        .filter(|table| tokens.contains(table.leaf()))
        .count()
}
