//! Multi-level SQL validator
//!
//! Classifies SQL safety on the parsed AST (BigQuery dialect) and, at the
//! schema levels, resolves identifiers against the schema store and join
//! predicates against the safe-join allowlist. A validation outcome is data,
//! not an error: any `error` finding sets `status = error` and the executor
//! refuses the statement.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident,
    JoinConstraint, JoinOperator, ObjectName, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, TableWithJoins,
};
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::Parser;

use sqlscout_config::constants::validator as defaults;
use sqlscout_core::{ColumnRef, Finding, FindingLevel, ValidatedSql, ValidationStatus};

use crate::safe_joins::SafeJoinMap;
use crate::schema_store::{SchemaStore, TableSchema};

/// Validation strictness, cumulative from syntax to strict schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationLevel {
    SyntaxOnly,
    ReadOnly,
    SchemaLoose,
    SchemaStrict,
}

impl ValidationLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "syntax_only" => Some(ValidationLevel::SyntaxOnly),
            "read_only" => Some(ValidationLevel::ReadOnly),
            "schema_loose" => Some(ValidationLevel::SchemaLoose),
            "schema_strict" => Some(ValidationLevel::SchemaStrict),
            _ => None,
        }
    }
}

static EXECUTE_IMMEDIATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bEXECUTE\s+IMMEDIATE\b").expect("static regex"));

static SCRIPT_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(BEGIN|DECLARE)\b").expect("static regex"));

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "count",
    "sum",
    "avg",
    "min",
    "max",
    "countif",
    "array_agg",
    "string_agg",
    "approx_count_distinct",
    "any_value",
];

/// The validator over one schema snapshot.
pub struct SqlValidator {
    schema: Arc<SchemaStore>,
    joins: Arc<SafeJoinMap>,
    wide_table_threshold: usize,
}

impl SqlValidator {
    pub fn new(schema: Arc<SchemaStore>, joins: Arc<SafeJoinMap>) -> Self {
        Self {
            schema,
            joins,
            wide_table_threshold: defaults::WIDE_TABLE_THRESHOLD,
        }
    }

    pub fn with_wide_table_threshold(mut self, threshold: usize) -> Self {
        self.wide_table_threshold = threshold;
        self
    }

    pub fn schema(&self) -> &Arc<SchemaStore> {
        &self.schema
    }

    pub fn joins(&self) -> &Arc<SafeJoinMap> {
        &self.joins
    }

    /// Validate one SQL text at the given level.
    pub fn validate(&self, sql: &str, level: ValidationLevel) -> ValidatedSql {
        let mut findings = Vec::new();
        let trimmed = sql.trim().trim_end_matches(';').trim();

        if trimmed.is_empty() {
            findings.push(Finding::error("parse_error", "empty statement"));
            return finish(findings, String::new(), false);
        }

        if level >= ValidationLevel::ReadOnly {
            if EXECUTE_IMMEDIATE_RE.is_match(trimmed) {
                findings.push(Finding::error(
                    "script_block",
                    "EXECUTE IMMEDIATE is not allowed",
                ));
            }
            if SCRIPT_BLOCK_RE.is_match(trimmed) {
                findings.push(Finding::error(
                    "script_block",
                    "script blocks (BEGIN ... END) are not allowed",
                ));
            }
            if !findings.is_empty() {
                return finish(findings, trimmed.to_string(), false);
            }
        }

        let statements = match Parser::parse_sql(&BigQueryDialect {}, trimmed) {
            Ok(statements) => statements,
            Err(e) => {
                findings.push(Finding::error("parse_error", e.to_string()));
                return finish(findings, trimmed.to_string(), false);
            }
        };

        match statements.len() {
            0 => {
                findings.push(Finding::error("parse_error", "empty statement"));
                return finish(findings, trimmed.to_string(), false);
            }
            1 => {}
            n => {
                findings.push(Finding::error(
                    "multiple_statements",
                    format!("expected a single statement, found {}", n),
                ));
                let read_only = statements.iter().all(|s| matches!(s, Statement::Query(_)));
                return finish(findings, trimmed.to_string(), read_only);
            }
        }

        let Some(mut statement) = statements.into_iter().next() else {
            findings.push(Finding::error("parse_error", "empty statement"));
            return finish(findings, trimmed.to_string(), false);
        };
        let read_only = matches!(statement, Statement::Query(_));

        if level >= ValidationLevel::ReadOnly && !read_only {
            match write_verb_of(&statement) {
                Some(verb) => findings.push(Finding::error(
                    "write_verb",
                    format!("{} statements are not allowed", verb),
                )),
                None => findings.push(Finding::error(
                    "statement_not_allowed",
                    "only SELECT / WITH ... SELECT statements are allowed",
                )),
            }
        }

        let mut facts = QueryFacts::default();
        if let Statement::Query(query) = &statement {
            collect_query(query, &mut facts);
        }

        if read_only && level >= ValidationLevel::SchemaLoose {
            self.check_schema(&facts, level, &mut findings);
        }

        if level >= ValidationLevel::SchemaLoose {
            qualify_statement(&mut statement, &self.schema, &facts.local_relations);
        }
        let normalized = statement.to_string();

        finish(findings, normalized, read_only)
    }

    fn check_schema(&self, facts: &QueryFacts, level: ValidationLevel, findings: &mut Vec<Finding>) {
        let strict = level >= ValidationLevel::SchemaStrict;

        // Resolve FROM/JOIN targets and build the alias scope.
        let mut scope: HashMap<String, Option<&TableSchema>> = HashMap::new();
        let mut resolved_tables: Vec<&TableSchema> = Vec::new();
        let mut all_resolved = true;

        for table in &facts.tables {
            let dotted = table.parts.join(".").to_ascii_lowercase();
            if facts.local_relations.contains(&dotted) {
                continue;
            }

            if table.parts.len() == 1 {
                findings.push(Finding::warn(
                    "unqualified_table",
                    format!("table '{}' is not dataset-qualified", table.parts[0]),
                ));
            }

            let resolved = self.schema.resolve(&table.parts);
            match resolved {
                Some(schema_table) => resolved_tables.push(schema_table),
                None => {
                    all_resolved = false;
                    if strict {
                        findings.push(Finding::error(
                            "unknown_table",
                            format!("table '{}' is not in the schema", table.parts.join(".")),
                        ));
                    }
                }
            }

            let key = table
                .alias
                .clone()
                .unwrap_or_else(|| table.parts.last().cloned().unwrap_or_default())
                .to_ascii_lowercase();
            scope.insert(key, resolved);
        }

        if !strict {
            return;
        }

        // Qualified column references.
        for path in &facts.column_refs {
            let Some(qualifier) = &path.qualifier else {
                continue;
            };
            let qualifier = qualifier.to_ascii_lowercase();
            if facts.local_relations.contains(&qualifier) {
                continue;
            }
            let leaf = qualifier.rsplit('.').next().unwrap_or(&qualifier).to_string();
            if let Some(Some(table)) = scope.get(&qualifier).or_else(|| scope.get(&leaf)) {
                if table.column(&path.column).is_none() {
                    findings.push(Finding::error(
                        "unknown_column",
                        format!("column '{}' is not in table '{}'", path.column, table.name),
                    ));
                }
            }
        }

        // Bare column references, only when the scope is fully known.
        if all_resolved && facts.local_relations.is_empty() && !resolved_tables.is_empty() {
            for column in &facts.bare_columns {
                let lowered = column.to_ascii_lowercase();
                if facts.projection_aliases.contains(&lowered) {
                    continue;
                }
                if !resolved_tables.iter().any(|t| t.column(column).is_some()) {
                    findings.push(Finding::error(
                        "unknown_column",
                        format!("column '{}' is not in any table in scope", column),
                    ));
                }
            }
        }

        // Join predicates must come from the safe-join map, or be between
        // identically named columns of the same datatype.
        for (left, right) in &facts.join_predicates {
            let Some((left_table, left_column)) = resolve_path(left, &scope, &resolved_tables)
            else {
                continue;
            };
            let Some((right_table, right_column)) = resolve_path(right, &scope, &resolved_tables)
            else {
                continue;
            };

            let a = ColumnRef::new(left_table.leaf(), left_column.clone());
            let b = ColumnRef::new(right_table.leaf(), right_column.clone());

            if self.joins.allows(&a, &b).is_some() {
                continue;
            }

            let same_name = left_column.eq_ignore_ascii_case(&right_column);
            let same_type = match (
                left_table.column(&left_column),
                right_table.column(&right_column),
            ) {
                (Some(l), Some(r)) => l.datatype.eq_ignore_ascii_case(&r.datatype),
                _ => false,
            };
            if same_name && same_type {
                continue;
            }

            findings.push(Finding::error(
                "unknown_join",
                format!("join predicate {} = {} is not in the safe-join allowlist", a, b),
            ));
        }

        self.check_dialect_rules(facts, &scope, &resolved_tables, findings);
    }

    fn check_dialect_rules(
        &self,
        facts: &QueryFacts,
        scope: &HashMap<String, Option<&TableSchema>>,
        resolved_tables: &[&TableSchema],
        findings: &mut Vec<Finding>,
    ) {
        for (left, right) in &facts.comparisons {
            let left_type = comparison_column_type(left, scope, resolved_tables);
            let right_type = comparison_column_type(right, scope, resolved_tables);

            if let (Some(a), Some(b)) = (&left_type, &right_type) {
                if (a == "DATE" && b == "TIMESTAMP") || (a == "TIMESTAMP" && b == "DATE") {
                    findings.push(Finding::warn(
                        "mixed_date_comparison",
                        "comparison mixes DATE and TIMESTAMP operands",
                    ));
                }
            }

            let left_is_ts = left_type.as_deref() == Some("TIMESTAMP");
            let right_is_ts = right_type.as_deref() == Some("TIMESTAMP");
            if (left_is_ts && has_date_sub_of_current_date(right))
                || (right_is_ts && has_date_sub_of_current_date(left))
            {
                findings.push(Finding::warn(
                    "date_fn_on_timestamp",
                    "DATE_SUB(CURRENT_DATE(), ...) compared against a TIMESTAMP column",
                ));
            }
        }

        for wildcard in &facts.wildcards {
            let wide = match wildcard {
                None => resolved_tables
                    .iter()
                    .find(|t| t.columns.len() > self.wide_table_threshold)
                    .copied(),
                Some(qualifier) => {
                    let qualifier = qualifier.to_ascii_lowercase();
                    let leaf = qualifier.rsplit('.').next().unwrap_or(&qualifier).to_string();
                    scope
                        .get(&qualifier)
                        .or_else(|| scope.get(&leaf))
                        .and_then(|t| *t)
                        .filter(|t| t.columns.len() > self.wide_table_threshold)
                }
            };
            if let Some(table) = wide {
                findings.push(Finding::warn(
                    "select_star_wide",
                    format!(
                        "SELECT * on '{}' ({} columns); project the columns you need",
                        table.name,
                        table.columns.len()
                    ),
                ));
            }
        }

        // Fact-sized tables scanned without LIMIT or aggregation.
        if !facts.has_limit && !facts.has_aggregation {
            if let Some(table) = resolved_tables
                .iter()
                .find(|t| t.columns.len() > self.wide_table_threshold)
            {
                findings.push(Finding::warn(
                    "missing_limit",
                    format!("unaggregated scan of '{}' without LIMIT", table.name),
                ));
            }
        }
    }
}

fn finish(findings: Vec<Finding>, normalized_sql: String, read_only: bool) -> ValidatedSql {
    let status = findings
        .iter()
        .map(|f| f.level)
        .max()
        .map(|level| match level {
            FindingLevel::Error => ValidationStatus::Error,
            FindingLevel::Warn => ValidationStatus::Warn,
            FindingLevel::Info => ValidationStatus::Ok,
        })
        .unwrap_or(ValidationStatus::Ok);

    ValidatedSql {
        status,
        findings,
        normalized_sql,
        read_only,
    }
}

fn write_verb_of(statement: &Statement) -> Option<&'static str> {
    match statement {
        Statement::Insert { .. } => Some("INSERT"),
        Statement::Update { .. } => Some("UPDATE"),
        Statement::Delete { .. } => Some("DELETE"),
        Statement::Merge { .. } => Some("MERGE"),
        Statement::Truncate { .. } => Some("TRUNCATE"),
        Statement::Drop { .. } => Some("DROP"),
        Statement::AlterTable { .. } => Some("ALTER"),
        Statement::CreateTable { .. } | Statement::CreateView { .. } => Some("CREATE"),
        Statement::Grant { .. } => Some("GRANT"),
        Statement::Revoke { .. } => Some("REVOKE"),
        Statement::Call { .. } => Some("CALL"),
        _ => None,
    }
}

/// A physical table reference in FROM/JOIN position.
struct PhysicalTable {
    parts: Vec<String>,
    alias: Option<String>,
}

/// `qualifier.column` (qualifier may be dotted) or a bare column.
#[derive(Debug, Clone)]
struct ColumnPath {
    qualifier: Option<String>,
    column: String,
}

#[derive(Default)]
struct QueryFacts {
    tables: Vec<PhysicalTable>,
    /// CTE names and derived-table aliases, lowercased.
    local_relations: HashSet<String>,
    join_predicates: Vec<(ColumnPath, ColumnPath)>,
    column_refs: Vec<ColumnPath>,
    bare_columns: Vec<String>,
    projection_aliases: HashSet<String>,
    /// `None` = bare `*`, `Some(qualifier)` = `alias.*`.
    wildcards: Vec<Option<String>>,
    comparisons: Vec<(Expr, Expr)>,
    has_aggregation: bool,
    has_limit: bool,
}

fn object_name_parts(name: &ObjectName) -> Vec<String> {
    name.0
        .iter()
        .map(|part| match part.as_ident() {
            Some(ident) => ident.value.clone(),
            None => part.to_string(),
        })
        .collect()
}

fn collect_query(query: &Query, facts: &mut QueryFacts) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            facts
                .local_relations
                .insert(cte.alias.name.value.to_ascii_lowercase());
            collect_query(&cte.query, facts);
        }
    }
    collect_set_expr(&query.body, facts);
    if query.limit_clause.is_some() {
        facts.has_limit = true;
    }
}

fn collect_set_expr(body: &SetExpr, facts: &mut QueryFacts) {
    match body {
        SetExpr::Select(select) => collect_select(select, facts),
        SetExpr::Query(query) => collect_query(query, facts),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, facts);
            collect_set_expr(right, facts);
        }
        _ => {}
    }
}

fn collect_select(select: &Select, facts: &mut QueryFacts) {
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => facts.wildcards.push(None),
            SelectItem::QualifiedWildcard(kind, _) => {
                facts.wildcards.push(Some(kind.to_string()));
            }
            SelectItem::UnnamedExpr(expr) => collect_expr(expr, facts),
            SelectItem::ExprWithAlias { expr, alias } => {
                facts
                    .projection_aliases
                    .insert(alias.value.to_ascii_lowercase());
                collect_expr(expr, facts);
            }
        }
    }

    for table_with_joins in &select.from {
        collect_table_with_joins(table_with_joins, facts);
    }

    if let Some(selection) = &select.selection {
        collect_expr(selection, facts);
    }

    match &select.group_by {
        GroupByExpr::All(_) => facts.has_aggregation = true,
        GroupByExpr::Expressions(exprs, _) => {
            if !exprs.is_empty() {
                facts.has_aggregation = true;
            }
            for expr in exprs {
                collect_expr(expr, facts);
            }
        }
    }

    if let Some(having) = &select.having {
        facts.has_aggregation = true;
        collect_expr(having, facts);
    }
}

fn collect_table_with_joins(table_with_joins: &TableWithJoins, facts: &mut QueryFacts) {
    collect_table_factor(&table_with_joins.relation, facts);
    for join in &table_with_joins.joins {
        collect_table_factor(&join.relation, facts);
        if let Some(JoinConstraint::On(expr)) = join_constraint(&join.join_operator) {
            collect_join_equalities(expr, facts);
            collect_expr(expr, facts);
        }
    }
}

fn join_constraint(operator: &JoinOperator) -> Option<&JoinConstraint> {
    match operator {
        JoinOperator::Join(c)
        | JoinOperator::Inner(c)
        | JoinOperator::Left(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::Right(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::Semi(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::Anti(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c)
        | JoinOperator::StraightJoin(c) => Some(c),
        _ => None,
    }
}

fn collect_table_factor(factor: &TableFactor, facts: &mut QueryFacts) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            facts.tables.push(PhysicalTable {
                parts: object_name_parts(name),
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            });
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            collect_query(subquery, facts);
            if let Some(alias) = alias {
                facts
                    .local_relations
                    .insert(alias.name.value.to_ascii_lowercase());
            }
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_table_with_joins(table_with_joins, facts);
        }
        _ => {}
    }
}

fn collect_join_equalities(expr: &Expr, facts: &mut QueryFacts) {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                collect_join_equalities(left, facts);
                collect_join_equalities(right, facts);
            }
            BinaryOperator::Eq => {
                if let (Some(l), Some(r)) = (column_path_of(left), column_path_of(right)) {
                    facts.join_predicates.push((l, r));
                }
            }
            _ => {}
        },
        Expr::Nested(inner) => collect_join_equalities(inner, facts),
        _ => {}
    }
}

fn column_path_of(expr: &Expr) -> Option<ColumnPath> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnPath {
            qualifier: None,
            column: ident.value.clone(),
        }),
        Expr::CompoundIdentifier(idents) if idents.len() >= 2 => {
            let column = idents.last().map(|i| i.value.clone())?;
            let qualifier = idents[..idents.len() - 1]
                .iter()
                .map(|i| i.value.clone())
                .collect::<Vec<_>>()
                .join(".");
            Some(ColumnPath {
                qualifier: Some(qualifier),
                column,
            })
        }
        Expr::Nested(inner) => column_path_of(inner),
        _ => None,
    }
}

fn collect_expr(expr: &Expr, facts: &mut QueryFacts) {
    match expr {
        Expr::Identifier(ident) => facts.bare_columns.push(ident.value.clone()),
        Expr::CompoundIdentifier(_) => {
            if let Some(path) = column_path_of(expr) {
                facts.column_refs.push(path);
            }
        }
        Expr::BinaryOp { left, op, right } => {
            if matches!(
                op,
                BinaryOperator::Eq
                    | BinaryOperator::NotEq
                    | BinaryOperator::Lt
                    | BinaryOperator::LtEq
                    | BinaryOperator::Gt
                    | BinaryOperator::GtEq
            ) {
                facts.comparisons.push(((**left).clone(), (**right).clone()));
            }
            collect_expr(left, facts);
            collect_expr(right, facts);
        }
        Expr::Nested(inner) => collect_expr(inner, facts),
        Expr::UnaryOp { expr, .. } => collect_expr(expr, facts),
        Expr::Cast { expr, .. } => collect_expr(expr, facts),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => collect_expr(inner, facts),
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_expr(expr, facts);
            collect_expr(low, facts);
            collect_expr(high, facts);
        }
        Expr::InList { expr, list, .. } => {
            collect_expr(expr, facts);
            for item in list {
                collect_expr(item, facts);
            }
        }
        Expr::InSubquery { expr, subquery, .. } => {
            collect_expr(expr, facts);
            collect_query(subquery, facts);
        }
        Expr::Subquery(query) => collect_query(query, facts),
        Expr::Exists { subquery, .. } => collect_query(subquery, facts),
        Expr::Function(function) => {
            let name = function.name.to_string().to_ascii_lowercase();
            if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                facts.has_aggregation = true;
            }
            if let FunctionArguments::List(list) = &function.args {
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => collect_expr(e, facts),
                        FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } => collect_expr(e, facts),
                        _ => {}
                    }
                }
            }
        }
        _ => {}
    }
}

fn resolve_path<'a>(
    path: &ColumnPath,
    scope: &HashMap<String, Option<&'a TableSchema>>,
    resolved_tables: &[&'a TableSchema],
) -> Option<(&'a TableSchema, String)> {
    match &path.qualifier {
        Some(qualifier) => {
            let qualifier = qualifier.to_ascii_lowercase();
            let leaf = qualifier.rsplit('.').next().unwrap_or(&qualifier).to_string();
            scope
                .get(&qualifier)
                .or_else(|| scope.get(&leaf))
                .and_then(|t| *t)
                .map(|t| (t, path.column.clone()))
        }
        None => {
            let mut owner = None;
            for table in resolved_tables {
                if table.column(&path.column).is_some() {
                    if owner.is_some() {
                        return None;
                    }
                    owner = Some(*table);
                }
            }
            owner.map(|t| (t, path.column.clone()))
        }
    }
}

fn comparison_column_type(
    expr: &Expr,
    scope: &HashMap<String, Option<&TableSchema>>,
    resolved_tables: &[&TableSchema],
) -> Option<String> {
    let path = column_path_of(expr)?;
    let (table, column) = resolve_path(&path, scope, resolved_tables)?;
    table
        .column(&column)
        .map(|c| c.datatype.to_ascii_uppercase())
}

fn has_date_sub_of_current_date(expr: &Expr) -> bool {
    fn contains_current_date(expr: &Expr) -> bool {
        match expr {
            Expr::Function(f) => {
                f.name.to_string().eq_ignore_ascii_case("current_date")
                    || function_args(f).iter().any(|e| contains_current_date(e))
            }
            Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => contains_current_date(inner),
            _ => false,
        }
    }

    match expr {
        Expr::Function(f) => {
            if f.name.to_string().eq_ignore_ascii_case("date_sub")
                && function_args(f).iter().any(|e| contains_current_date(e))
            {
                return true;
            }
            function_args(f).iter().any(|e| has_date_sub_of_current_date(e))
        }
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => {
            has_date_sub_of_current_date(inner)
        }
        _ => false,
    }
}

fn function_args(function: &sqlparser::ast::Function) -> Vec<&Expr> {
    let mut out = Vec::new();
    if let FunctionArguments::List(list) = &function.args {
        for arg in &list.args {
            match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => out.push(e),
                FunctionArg::Named {
                    arg: FunctionArgExpr::Expr(e),
                    ..
                } => out.push(e),
                _ => {}
            }
        }
    }
    out
}

/// Rewrite resolvable FROM/JOIN targets to their fully qualified names.
fn qualify_statement(
    statement: &mut Statement,
    schema: &SchemaStore,
    local_relations: &HashSet<String>,
) {
    if let Statement::Query(query) = statement {
        qualify_query(query, schema, local_relations);
    }
}

fn qualify_query(query: &mut Query, schema: &SchemaStore, local_relations: &HashSet<String>) {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            qualify_query(&mut cte.query, schema, local_relations);
        }
    }
    qualify_set_expr(&mut query.body, schema, local_relations);
}

fn qualify_set_expr(body: &mut SetExpr, schema: &SchemaStore, local_relations: &HashSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in &mut select.from {
                qualify_table_with_joins(table_with_joins, schema, local_relations);
            }
        }
        SetExpr::Query(query) => qualify_query(query, schema, local_relations),
        SetExpr::SetOperation { left, right, .. } => {
            qualify_set_expr(left, schema, local_relations);
            qualify_set_expr(right, schema, local_relations);
        }
        _ => {}
    }
}

fn qualify_table_with_joins(
    table_with_joins: &mut TableWithJoins,
    schema: &SchemaStore,
    local_relations: &HashSet<String>,
) {
    qualify_table_factor(&mut table_with_joins.relation, schema, local_relations);
    for join in &mut table_with_joins.joins {
        qualify_table_factor(&mut join.relation, schema, local_relations);
    }
}

fn qualify_table_factor(
    factor: &mut TableFactor,
    schema: &SchemaStore,
    local_relations: &HashSet<String>,
) {
    match factor {
        TableFactor::Table { name, .. } => {
            let parts = object_name_parts(name);
            let dotted = parts.join(".").to_ascii_lowercase();
            if local_relations.contains(&dotted) {
                return;
            }
            if let Some(table) = schema.resolve(&parts) {
                if !table.name.eq_ignore_ascii_case(&parts.join(".")) {
                    let idents: Vec<Ident> =
                        table.name.split('.').map(Ident::new).collect();
                    *name = ObjectName::from(idents);
                }
            }
        }
        TableFactor::Derived { subquery, .. } => {
            qualify_query(subquery, schema, local_relations);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            qualify_table_with_joins(table_with_joins, schema, local_relations);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlscout_core::{JoinCardinality, JoinRelationship, SafeJoin};

    fn validator() -> SqlValidator {
        let schema = SchemaStore::from_rows(vec![
            row("ds.users", "id", "INT64", "user id"),
            row("ds.users", "email", "STRING", ""),
            row("ds.users", "created_at", "TIMESTAMP", ""),
            row("ds.orders", "id", "INT64", ""),
            row("ds.orders", "user_id", "INT64", ""),
            row("ds.orders", "amount", "NUMERIC", ""),
            row("ds.orders", "order_date", "DATE", ""),
        ]);
        let joins = SafeJoinMap::from_edges(vec![SafeJoin {
            left: ColumnRef::new("users", "id"),
            right: ColumnRef::new("orders", "user_id"),
            relationship: JoinRelationship::OneToMany,
            cardinality: JoinCardinality::Both,
        }]);
        SqlValidator::new(Arc::new(schema), Arc::new(joins))
    }

    fn row(table: &str, column: &str, datatype: &str, desc: &str) -> (String, String, String, String) {
        (
            table.to_string(),
            column.to_string(),
            datatype.to_string(),
            desc.to_string(),
        )
    }

    #[test]
    fn test_read_only_accepts_select() {
        let v = validator();
        let out = v.validate("SELECT id FROM ds.users", ValidationLevel::ReadOnly);
        assert_eq!(out.status, ValidationStatus::Ok);
        assert!(out.read_only);
    }

    #[test]
    fn test_delete_is_rejected() {
        let v = validator();
        let out = v.validate("DELETE FROM ds.orders WHERE 1=1", ValidationLevel::ReadOnly);
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(!out.read_only);
        assert!(out.findings.iter().any(|f| f.code == "write_verb"));
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let v = validator();
        let out = v.validate(
            "SELECT 1; SELECT 2",
            ValidationLevel::SyntaxOnly,
        );
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(out.findings.iter().any(|f| f.code == "multiple_statements"));
    }

    #[test]
    fn test_execute_immediate_blocked() {
        let v = validator();
        let out = v.validate(
            "EXECUTE IMMEDIATE 'SELECT 1'",
            ValidationLevel::ReadOnly,
        );
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(out.findings.iter().any(|f| f.code == "script_block"));
    }

    #[test]
    fn test_script_block_blocked() {
        let v = validator();
        let out = v.validate(
            "BEGIN SELECT 1; END",
            ValidationLevel::ReadOnly,
        );
        assert_eq!(out.status, ValidationStatus::Error);
    }

    #[test]
    fn test_safe_join_accepted_strict() {
        let v = validator();
        let out = v.validate(
            "SELECT u.email FROM ds.users u JOIN ds.orders o ON o.user_id = u.id",
            ValidationLevel::SchemaStrict,
        );
        assert_eq!(out.status, ValidationStatus::Ok, "{:?}", out.findings);
    }

    #[test]
    fn test_unknown_join_rejected_strict() {
        let v = validator();
        let out = v.validate(
            "SELECT u.email FROM ds.users u JOIN ds.orders o ON o.id = u.id",
            ValidationLevel::SchemaStrict,
        );
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(out.findings.iter().any(|f| f.code == "unknown_join"));
    }

    #[test]
    fn test_same_name_same_type_join_allowed() {
        let v = validator();
        // ds.users.id and ds.orders.id are both INT64 and share a name
        let out = v.validate(
            "SELECT u.email FROM ds.users u JOIN ds.orders o ON u.id = o.id",
            ValidationLevel::SchemaStrict,
        );
        // Same-name fallback: u.id = o.id both resolve to INT64 'id'
        assert!(
            !out.findings.iter().any(|f| f.code == "unknown_join"),
            "{:?}",
            out.findings
        );
    }

    #[test]
    fn test_unknown_table_strict() {
        let v = validator();
        let out = v.validate(
            "SELECT x FROM ds.missing",
            ValidationLevel::SchemaStrict,
        );
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(out.findings.iter().any(|f| f.code == "unknown_table"));
    }

    #[test]
    fn test_unknown_column_strict() {
        let v = validator();
        let out = v.validate(
            "SELECT u.phone FROM ds.users u",
            ValidationLevel::SchemaStrict,
        );
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(out.findings.iter().any(|f| f.code == "unknown_column"));
    }

    #[test]
    fn test_unqualified_table_warns_loose() {
        let v = validator();
        let out = v.validate("SELECT id FROM users", ValidationLevel::SchemaLoose);
        assert_eq!(out.status, ValidationStatus::Warn);
        assert!(out.findings.iter().any(|f| f.code == "unqualified_table"));
    }

    #[test]
    fn test_cte_is_not_an_unknown_table() {
        let v = validator();
        let out = v.validate(
            "WITH recent AS (SELECT id FROM ds.users) SELECT id FROM recent",
            ValidationLevel::SchemaStrict,
        );
        assert!(
            !out.findings.iter().any(|f| f.code == "unknown_table"),
            "{:?}",
            out.findings
        );
    }

    #[test]
    fn test_normalization_qualifies_tables() {
        let v = validator();
        let out = v.validate("SELECT id FROM users", ValidationLevel::SchemaLoose);
        assert!(out.normalized_sql.contains("ds.users"));
    }

    #[test]
    fn test_normalization_idempotent() {
        let v = validator();
        let first = v.validate(
            "select  u.email , o.amount from users u join orders o on o.user_id = u.id",
            ValidationLevel::SchemaStrict,
        );
        let second = v.validate(&first.normalized_sql, ValidationLevel::SchemaStrict);
        assert_eq!(first.normalized_sql, second.normalized_sql);
    }

    #[test]
    fn test_trailing_semicolon_normalized() {
        let v = validator();
        let out = v.validate("SELECT id FROM ds.users;", ValidationLevel::ReadOnly);
        assert_eq!(out.status, ValidationStatus::Ok);
        assert!(!out.normalized_sql.ends_with(';'));
    }

    #[test]
    fn test_parse_error() {
        let v = validator();
        let out = v.validate("SELEC id FRM users", ValidationLevel::SyntaxOnly);
        assert_eq!(out.status, ValidationStatus::Error);
        assert!(out.findings.iter().any(|f| f.code == "parse_error"));
    }

    #[test]
    fn test_wide_table_warnings() {
        let mut rows = Vec::new();
        for i in 0..40 {
            rows.push(row("ds.events", &format!("col_{}", i), "STRING", ""));
        }
        let schema = SchemaStore::from_rows(rows);
        let v = SqlValidator::new(Arc::new(schema), Arc::new(SafeJoinMap::default()));

        let out = v.validate("SELECT * FROM ds.events", ValidationLevel::SchemaStrict);
        assert_eq!(out.status, ValidationStatus::Warn);
        assert!(out.findings.iter().any(|f| f.code == "select_star_wide"));
        assert!(out.findings.iter().any(|f| f.code == "missing_limit"));

        let with_limit = v.validate(
            "SELECT col_1 FROM ds.events LIMIT 100",
            ValidationLevel::SchemaStrict,
        );
        assert!(
            !with_limit.findings.iter().any(|f| f.code == "missing_limit"),
            "{:?}",
            with_limit.findings
        );
    }

    #[test]
    fn test_aggregation_suppresses_missing_limit() {
        let mut rows = Vec::new();
        for i in 0..40 {
            rows.push(row("ds.events", &format!("col_{}", i), "STRING", ""));
        }
        let schema = SchemaStore::from_rows(rows);
        let v = SqlValidator::new(Arc::new(schema), Arc::new(SafeJoinMap::default()));

        let out = v.validate(
            "SELECT col_1, COUNT(*) FROM ds.events GROUP BY col_1",
            ValidationLevel::SchemaStrict,
        );
        assert!(!out.findings.iter().any(|f| f.code == "missing_limit"));
    }

    #[test]
    fn test_date_fn_on_timestamp_warns() {
        let v = validator();
        let out = v.validate(
            "SELECT u.id FROM ds.users u WHERE u.created_at > DATE_SUB(CURRENT_DATE(), INTERVAL 7 DAY)",
            ValidationLevel::SchemaStrict,
        );
        assert!(
            out.findings.iter().any(|f| f.code == "date_fn_on_timestamp"),
            "{:?}",
            out.findings
        );
    }

    #[test]
    fn test_mixed_date_comparison_warns() {
        let v = validator();
        let out = v.validate(
            "SELECT u.id FROM ds.users u JOIN ds.orders o ON o.user_id = u.id WHERE u.created_at = o.order_date",
            ValidationLevel::SchemaStrict,
        );
        assert!(
            out.findings.iter().any(|f| f.code == "mixed_date_comparison"),
            "{:?}",
            out.findings
        );
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(
            ValidationLevel::from_str("schema_strict"),
            Some(ValidationLevel::SchemaStrict)
        );
        assert!(ValidationLevel::from_str("nope").is_none());
        assert!(ValidationLevel::SchemaStrict > ValidationLevel::ReadOnly);
    }
}
