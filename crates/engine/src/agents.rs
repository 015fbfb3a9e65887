//! Agent dispatch
//!
//! An agent binds a system preamble, a response style, and which contexts
//! get injected into the prompt. The first `@explain`/`@create`/`@schema`
//! directive in the question wins over the request's `agent_type` field.

use sqlscout_core::{AgentKind, Error, Result};

/// Prompt-shaping profile for one agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentProfile {
    pub kind: AgentKind,
    pub include_examples: bool,
    pub include_schema: bool,
    pub expects_sql: bool,
    pub preamble: &'static str,
    pub instructions: &'static str,
}

const DEFAULT_PREAMBLE: &str = "You are an analytics assistant for a data warehouse. \
You answer questions about the data and, when useful, produce a single \
BigQuery-dialect SQL query that answers them. Only use tables, columns, and \
joins shown in the schema section.";

const DEFAULT_INSTRUCTIONS: &str = "Answer concisely. When the question calls for data, \
include exactly one SQL query in a ```sql fenced block. Prefer explicit column \
lists over SELECT *, qualify tables as dataset.table, and add a LIMIT when \
returning raw rows.";

const CREATE_INSTRUCTIONS: &str = "Produce the SQL first in a ```sql fenced block, then \
one short paragraph of rationale. The query must be a single SELECT or \
WITH ... SELECT statement using only the tables, columns, and joins from the \
schema section.";

const EXPLAIN_INSTRUCTIONS: &str = "Explain what the given SQL does in plain prose: the \
tables involved, the join logic, the filters, and what each output column \
means. Do not produce new SQL unless the user asked for a fix.";

const SCHEMA_PREAMBLE: &str = "You are a warehouse schema guide. You describe tables, \
columns, and the allowed joins between them.";

const SCHEMA_INSTRUCTIONS: &str = "Answer using only the schema section: describe the \
relevant tables, their columns and types, and which joins connect them. Do \
not write SQL.";

const CHAT_PREAMBLE: &str = "You are a concise analytics assistant for a data warehouse. \
Keep answers short and direct.";

/// The dispatch table.
pub fn profile(kind: AgentKind) -> AgentProfile {
    match kind {
        AgentKind::Default => AgentProfile {
            kind,
            include_examples: true,
            include_schema: true,
            expects_sql: true,
            preamble: DEFAULT_PREAMBLE,
            instructions: DEFAULT_INSTRUCTIONS,
        },
        AgentKind::Create => AgentProfile {
            kind,
            include_examples: true,
            include_schema: true,
            expects_sql: true,
            preamble: DEFAULT_PREAMBLE,
            instructions: CREATE_INSTRUCTIONS,
        },
        AgentKind::Explain => AgentProfile {
            kind,
            include_examples: true,
            include_schema: false,
            expects_sql: false,
            preamble: DEFAULT_PREAMBLE,
            instructions: EXPLAIN_INSTRUCTIONS,
        },
        AgentKind::Chat => AgentProfile {
            kind,
            include_examples: true,
            include_schema: true,
            expects_sql: true,
            preamble: CHAT_PREAMBLE,
            instructions: DEFAULT_INSTRUCTIONS,
        },
        AgentKind::Schema => AgentProfile {
            kind,
            include_examples: false,
            include_schema: true,
            expects_sql: false,
            preamble: SCHEMA_PREAMBLE,
            instructions: SCHEMA_INSTRUCTIONS,
        },
    }
}

/// Resolve the agent for a request and strip any leading directive from the
/// question. An unknown `agent_type` is a client error.
pub fn resolve_agent(question: &str, requested: Option<&str>) -> Result<(AgentKind, String)> {
    if let Some((kind, rest)) = AgentKind::from_question(question) {
        return Ok((kind, rest));
    }

    let kind = match requested {
        Some(value) => AgentKind::from_api(value)
            .ok_or_else(|| Error::InvalidInput(format!("unknown agent_type '{}'", value)))?,
        None => AgentKind::Default,
    };
    Ok((kind, question.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_wins_over_requested() {
        let (kind, rest) = resolve_agent("@schema what joins users?", Some("create")).unwrap();
        assert_eq!(kind, AgentKind::Schema);
        assert_eq!(rest, "what joins users?");
    }

    #[test]
    fn test_requested_agent() {
        let (kind, _) = resolve_agent("top users", Some("explain")).unwrap();
        assert_eq!(kind, AgentKind::Explain);
    }

    #[test]
    fn test_unknown_agent_rejected() {
        assert!(resolve_agent("top users", Some("wizard")).is_err());
    }

    #[test]
    fn test_schema_profile_excludes_examples_and_sql() {
        let p = profile(AgentKind::Schema);
        assert!(!p.include_examples);
        assert!(p.include_schema);
        assert!(!p.expects_sql);
    }
}
