//! Schema injector
//!
//! Assembles the minimal schema snippet for generation: the tables the
//! retrieved exemplars touch plus tables named in the question, capped and
//! trimmed to a token budget. Every join rendered here comes from the
//! safe-join map, never inferred.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use sqlscout_config::constants::schema as defaults;
use sqlscout_core::{estimate_tokens, RetrievalResult};
use sqlscout_sqlguard::{SafeJoinMap, SchemaStore, TableSchema};

/// The rendered snippet plus the tables it covers.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnippet {
    pub text: String,
    pub tables: Vec<String>,
}

impl SchemaSnippet {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

pub struct SchemaInjector {
    schema: Arc<SchemaStore>,
    joins: Arc<SafeJoinMap>,
    max_tables: usize,
    desc_max: usize,
    token_budget: usize,
}

struct Candidate<'a> {
    table: &'a TableSchema,
    exemplar_count: usize,
    first_rank: usize,
}

impl SchemaInjector {
    pub fn new(schema: Arc<SchemaStore>, joins: Arc<SafeJoinMap>) -> Self {
        Self {
            schema,
            joins,
            max_tables: defaults::MAX_TABLES_IN_PROMPT,
            desc_max: defaults::COLUMN_DESC_MAX,
            token_budget: defaults::SNIPPET_TOKEN_BUDGET,
        }
    }

    pub fn with_max_tables(mut self, max_tables: usize) -> Self {
        self.max_tables = max_tables;
        self
    }

    pub fn with_token_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = token_budget;
        self
    }

    /// Build the snippet for one request.
    pub fn inject(&self, retrieval: &RetrievalResult, question: &str) -> SchemaSnippet {
        let mut candidates: HashMap<&str, Candidate<'_>> = HashMap::new();

        // Tables from retrieved exemplars, counted across exemplars.
        for (rank, hit) in retrieval.hits.iter().enumerate() {
            let mut seen_in_exemplar: HashSet<&str> = HashSet::new();
            for table_name in &hit.exemplar.tables {
                let Some(table) = self.schema.resolve_name(table_name) else {
                    continue;
                };
                if !seen_in_exemplar.insert(table.name.as_str()) {
                    continue;
                }
                candidates
                    .entry(table.name.as_str())
                    .and_modify(|c| c.exemplar_count += 1)
                    .or_insert(Candidate {
                        table,
                        exemplar_count: 1,
                        first_rank: rank,
                    });
            }
        }

        // Tables whose unqualified name appears in the question.
        let question_tokens: HashSet<String> = question
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        for table in self.schema.tables() {
            if question_tokens.contains(table.leaf()) {
                candidates.entry(table.name.as_str()).or_insert(Candidate {
                    table,
                    exemplar_count: 0,
                    first_rank: usize::MAX,
                });
            }
        }

        if candidates.is_empty() {
            return SchemaSnippet::default();
        }

        // Keep the most-referenced tables, then the earliest-retrieved.
        let mut ordered: Vec<Candidate<'_>> = candidates.into_values().collect();
        ordered.sort_by(|a, b| {
            b.exemplar_count
                .cmp(&a.exemplar_count)
                .then_with(|| a.first_rank.cmp(&b.first_rank))
                .then_with(|| a.table.name.cmp(&b.table.name))
        });
        ordered.truncate(self.max_tables);

        // Columns referenced by any retrieved SQL survive budget trims first.
        let retrieved_sql: String = retrieval
            .hits
            .iter()
            .map(|h| h.exemplar.sql.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");

        let mut keep_all_columns = true;
        loop {
            let text = self.render(&ordered, keep_all_columns, &retrieved_sql);
            if estimate_tokens(&text) <= self.token_budget {
                return SchemaSnippet {
                    tables: ordered.iter().map(|c| c.table.name.clone()).collect(),
                    text,
                };
            }
            if keep_all_columns {
                keep_all_columns = false;
                continue;
            }
            if ordered.len() > 1 {
                // Lowest exemplar-frequency tables go last.
                ordered.pop();
                continue;
            }
            // A single table still over budget is rendered as-is.
            return SchemaSnippet {
                tables: ordered.iter().map(|c| c.table.name.clone()).collect(),
                text,
            };
        }
    }

    fn render(
        &self,
        ordered: &[Candidate<'_>],
        keep_all_columns: bool,
        retrieved_sql: &str,
    ) -> String {
        let mut out = String::new();

        for candidate in ordered {
            let table = candidate.table;
            out.push_str(&format!("TABLE {}\n", table.name));
            for column in &table.columns {
                if !keep_all_columns && !retrieved_sql.contains(&column.name.to_lowercase()) {
                    continue;
                }
                let mut description = column.description.trim().to_string();
                if description.len() > self.desc_max {
                    description.truncate(self.desc_max);
                }
                if description.is_empty() {
                    out.push_str(&format!("  {} {}\n", column.name, column.datatype));
                } else {
                    out.push_str(&format!(
                        "  {} {} -- {}\n",
                        column.name, column.datatype, description
                    ));
                }
            }
        }

        let leaves: Vec<String> = ordered
            .iter()
            .map(|c| c.table.leaf().to_string())
            .collect();
        let edges = self.joins.edges_within(&leaves);
        if !edges.is_empty() {
            out.push_str("JOINS\n");
            for edge in edges {
                out.push_str(&format!(
                    "  {} = {}  ({}, {})\n",
                    edge.left, edge.right, edge.relationship, edge.cardinality
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sqlscout_core::{
        ColumnRef, Exemplar, JoinCardinality, JoinRelationship, SafeJoin, ScoredExemplar,
    };

    fn schema() -> Arc<SchemaStore> {
        Arc::new(SchemaStore::from_rows(vec![
            row("ds.users", "id", "INT64", "user id"),
            row("ds.users", "email", "STRING", "contact email"),
            row("ds.orders", "user_id", "INT64", "owning user"),
            row("ds.orders", "amount", "NUMERIC", "order value"),
            row("ds.refunds", "order_id", "INT64", ""),
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

    fn hit(tables: &[&str], sql: &str) -> ScoredExemplar {
        ScoredExemplar {
            exemplar: Arc::new(Exemplar {
                id: "e".to_string(),
                sql: sql.to_string(),
                description: "d".to_string(),
                tables: tables.iter().map(|t| t.to_string()).collect(),
                joins: Vec::new(),
            }),
            fused_score: 1.0,
            vector_score: 1.0,
            lexical_score: 1.0,
        }
    }

    #[test]
    fn test_tables_from_exemplars_and_join_rendering() {
        let injector = SchemaInjector::new(schema(), joins());
        let retrieval = RetrievalResult {
            hits: vec![hit(&["ds.users", "ds.orders"], "SELECT email, amount FROM x")],
        };

        let snippet = injector.inject(&retrieval, "revenue per user");
        assert!(snippet.tables.contains(&"ds.users".to_string()));
        assert!(snippet.tables.contains(&"ds.orders".to_string()));
        assert!(snippet.text.contains("TABLE ds.users"));
        assert!(snippet.text.contains("users.id = orders.user_id"));
        assert!(snippet.text.contains("one_to_many"));
    }

    #[test]
    fn test_question_tokens_add_tables() {
        let injector = SchemaInjector::new(schema(), joins());
        let snippet = injector.inject(&RetrievalResult::default(), "show refunds by order");
        assert_eq!(snippet.tables, vec!["ds.refunds".to_string()]);
    }

    #[test]
    fn test_table_cap_prefers_frequent() {
        let injector = SchemaInjector::new(schema(), joins()).with_max_tables(1);
        let retrieval = RetrievalResult {
            hits: vec![
                hit(&["ds.orders"], "SELECT amount FROM ds.orders"),
                hit(&["ds.orders", "ds.users"], "SELECT email FROM ds.users"),
            ],
        };
        let snippet = injector.inject(&retrieval, "anything");
        assert_eq!(snippet.tables, vec!["ds.orders".to_string()]);
    }

    #[test]
    fn test_budget_drops_unreferenced_columns_first() {
        let injector = SchemaInjector::new(schema(), joins()).with_token_budget(30);
        let retrieval = RetrievalResult {
            hits: vec![hit(
                &["ds.users", "ds.orders"],
                "SELECT amount FROM ds.orders",
            )],
        };
        let snippet = injector.inject(&retrieval, "revenue");
        // 'amount' is referenced by exemplar SQL and survives; 'email' is not
        assert!(snippet.text.contains("amount"));
        assert!(!snippet.text.contains("email"));
    }

    #[test]
    fn test_empty_retrieval_and_no_matches() {
        let injector = SchemaInjector::new(schema(), joins());
        let snippet = injector.inject(&RetrievalResult::default(), "philosophy of time");
        assert!(snippet.is_empty());
        assert!(snippet.text.is_empty());
    }

    #[test]
    fn test_description_truncated() {
        let long_desc = "x".repeat(200);
        let store = Arc::new(SchemaStore::from_rows(vec![(
            "ds.t".to_string(),
            "c".to_string(),
            "STRING".to_string(),
            long_desc,
        )]));
        let injector = SchemaInjector::new(store, Arc::new(SafeJoinMap::default()));
        let retrieval = RetrievalResult {
            hits: vec![hit(&["ds.t"], "SELECT c FROM ds.t")],
        };
        let snippet = injector.inject(&retrieval, "t");
        let line = snippet.text.lines().find(|l| l.contains("c STRING")).unwrap();
        assert!(line.len() < 120);
    }
}
