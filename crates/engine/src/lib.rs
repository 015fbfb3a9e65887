//! The question-to-SQL pipeline
//!
//! Wires the stages together in request order: agent dispatch, query
//! rewriting, hybrid retrieval, schema injection, prompt assembly with
//! context budgeting, generation, SQL extraction, and validation. One
//! request is one logical task with a single deadline propagated through
//! every suspension point.

pub mod agents;
pub mod dedup;
pub mod extract;
pub mod pipeline;
pub mod prompt;
pub mod rewriter;
pub mod schema_injector;

pub use agents::{profile, resolve_agent, AgentProfile};
pub use dedup::{dedup_for_prompt, normalize_sql};
pub use extract::extract_sql;
pub use pipeline::{EngineRequest, EngineResponse, QueryEngine, SourceRecord};
pub use prompt::{Prompt, PromptBuilder};
pub use rewriter::{QueryRewriter, Rewrite};
pub use schema_injector::{SchemaInjector, SchemaSnippet};
