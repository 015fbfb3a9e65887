//! Request-scoped and corpus data model.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One known-good SQL query from the corpus, used as a retrieval unit.
///
/// Created by the offline indexer, immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exemplar {
    /// Stable identifier.
    pub id: String,
    /// The SQL text.
    pub sql: String,
    /// Prose description of what the query answers.
    pub description: String,
    /// Qualified table names referenced by the query, in order.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Join edges the query uses, in order.
    #[serde(default)]
    pub joins: Vec<JoinEdge>,
}

/// A `left_table.col = right_table.col` join edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEdge {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

impl JoinEdge {
    /// Parse `"table.col=table.col"`; returns `None` for malformed text.
    pub fn parse(text: &str) -> Option<Self> {
        let (left, right) = text.split_once('=')?;
        Some(Self {
            left: ColumnRef::parse(left.trim())?,
            right: ColumnRef::parse(right.trim())?,
        })
    }
}

/// A `table.column` reference. The table part may itself be qualified
/// (`dataset.table` or `project.dataset.table`); matching is done on the
/// final table segment. Serializes as the `"table.col"` string form used by
/// the safe-join map file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl Serialize for ColumnRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ColumnRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ColumnRef::parse(&text).ok_or_else(|| {
            serde::de::Error::custom(format!("expected \"table.col\", got \"{}\"", text))
        })
    }
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse `"table.col"` (table may be dotted); `None` if there is no dot.
    pub fn parse(text: &str) -> Option<Self> {
        let (table, column) = text.rsplit_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(table, column))
    }

    /// Final segment of the table part, lowercased.
    pub fn table_leaf(&self) -> String {
        self.table
            .rsplit('.')
            .next()
            .unwrap_or(&self.table)
            .to_ascii_lowercase()
    }

    /// Case-insensitive match on table leaf and column name.
    pub fn matches(&self, other: &ColumnRef) -> bool {
        self.table_leaf() == other.table_leaf()
            && self.column.eq_ignore_ascii_case(&other.column)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Relationship declared on a safe-join edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRelationship {
    OneToMany,
    ManyToOne,
    OneToOne,
}

impl fmt::Display for JoinRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinRelationship::OneToMany => "one_to_many",
            JoinRelationship::ManyToOne => "many_to_one",
            JoinRelationship::OneToOne => "one_to_one",
        };
        f.write_str(s)
    }
}

/// Which side(s) the cardinality constraint binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinCardinality {
    Left,
    Right,
    Both,
}

impl fmt::Display for JoinCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinCardinality::Left => "left",
            JoinCardinality::Right => "right",
            JoinCardinality::Both => "both",
        };
        f.write_str(s)
    }
}

/// One curated allowed join edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeJoin {
    pub left: ColumnRef,
    pub right: ColumnRef,
    pub relationship: JoinRelationship,
    pub cardinality: JoinCardinality,
}

/// One retrieved exemplar with its scores.
#[derive(Debug, Clone)]
pub struct ScoredExemplar {
    pub exemplar: Arc<Exemplar>,
    pub fused_score: f32,
    pub vector_score: f32,
    pub lexical_score: f32,
}

/// Ordered retrieval output: up to `k` distinct exemplars, fused score
/// descending.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredExemplar>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Severity of a validation or pipeline finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingLevel {
    Info,
    Warn,
    Error,
}

/// A single finding surfaced to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub level: FindingLevel,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
}

impl Finding {
    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FindingLevel::Info, code, message)
    }

    pub fn warn(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FindingLevel::Warn, code, message)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FindingLevel::Error, code, message)
    }

    fn new(level: FindingLevel, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            code: code.into(),
            message: message.into(),
            span: None,
        }
    }
}

/// Overall validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Warn,
    Error,
}

/// Outcome of SQL validation.
///
/// `status == Ok` at read-only level or stricter implies the statement is a
/// single read-only query; the executor refuses anything else.
#[derive(Debug, Clone)]
pub struct ValidatedSql {
    pub status: ValidationStatus,
    pub findings: Vec<Finding>,
    /// SQL with resolvable table names fully qualified and canonical
    /// whitespace. Equal to the input re-rendered when nothing resolves.
    pub normalized_sql: String,
    /// Detected read/write classification, independent of level.
    pub read_only: bool,
}

impl ValidatedSql {
    pub fn is_ok(&self) -> bool {
        self.status != ValidationStatus::Error
    }
}

/// Result of a warehouse execution (or dry run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub columns: Vec<String>,
    pub row_count: u64,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cache_hit: bool,
    pub dry_run: bool,
    pub job_id: String,
    pub execution_time_ms: u64,
    pub truncated: bool,
}

/// Per-request counters reported back to the client.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub retrieval_ms: u64,
    pub generation_ms: u64,
    pub validation_ms: u64,
}

/// Response mode selecting preamble, style, and injected context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Default,
    Create,
    Explain,
    Chat,
    Schema,
}

impl AgentKind {
    /// Parse an API `agent_type` value.
    pub fn from_api(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Some(AgentKind::Default),
            "create" => Some(AgentKind::Create),
            "explain" => Some(AgentKind::Explain),
            "chat" => Some(AgentKind::Chat),
            "schema" => Some(AgentKind::Schema),
            _ => None,
        }
    }

    /// Detect a leading `@explain`/`@create`/`@schema` directive in the
    /// question. Returns the agent and the question with the directive
    /// stripped.
    pub fn from_question(question: &str) -> Option<(Self, String)> {
        let trimmed = question.trim_start();
        for (tag, kind) in [
            ("@explain", AgentKind::Explain),
            ("@create", AgentKind::Create),
            ("@schema", AgentKind::Schema),
        ] {
            if let Some(rest) = trimmed.strip_prefix(tag) {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    return Some((kind, rest.trim_start().to_string()));
                }
            }
        }
        None
    }

    /// Whether responses from this agent are expected to carry SQL.
    pub fn expects_sql(&self) -> bool {
        !matches!(self, AgentKind::Schema)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentKind::Default => "default",
            AgentKind::Create => "create",
            AgentKind::Explain => "explain",
            AgentKind::Chat => "chat",
            AgentKind::Schema => "schema",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_ref_parse() {
        let col = ColumnRef::parse("ds.users.id").unwrap();
        assert_eq!(col.table, "ds.users");
        assert_eq!(col.column, "id");
        assert_eq!(col.table_leaf(), "users");

        assert!(ColumnRef::parse("no_dot").is_none());
        assert!(ColumnRef::parse(".id").is_none());
    }

    #[test]
    fn test_column_ref_matches_across_qualification() {
        let short = ColumnRef::parse("users.id").unwrap();
        let long = ColumnRef::parse("proj.ds.Users.ID").unwrap();
        assert!(short.matches(&long));
    }

    #[test]
    fn test_join_edge_parse() {
        let edge = JoinEdge::parse("users.id=orders.user_id").unwrap();
        assert_eq!(edge.left.column, "id");
        assert_eq!(edge.right.table, "orders");
        assert!(JoinEdge::parse("users.id").is_none());
    }

    #[test]
    fn test_agent_from_question() {
        let (kind, rest) = AgentKind::from_question("@create top users by spend").unwrap();
        assert_eq!(kind, AgentKind::Create);
        assert_eq!(rest, "top users by spend");

        let (kind, rest) = AgentKind::from_question("@explain").unwrap();
        assert_eq!(kind, AgentKind::Explain);
        assert!(rest.is_empty());

        // An email-like token is not a directive
        assert!(AgentKind::from_question("@explains the data").is_none());
        assert!(AgentKind::from_question("plain question").is_none());
    }
}
