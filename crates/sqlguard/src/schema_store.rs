//! Schema store
//!
//! Maps qualified table names to ordered column rows, loaded from the schema
//! CSV (`table_id,column,datatype,description`). Immutable after load;
//! reloads build a fresh store for the next snapshot.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::SqlGuardError;

/// One column row.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: String,
    pub description: String,
}

/// One table with its ordered column list.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Qualified name as written in the CSV, e.g. `project.ds.users`.
    pub name: String,
    /// Lowercased name segments.
    parts: Vec<String>,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Final (unqualified) name segment, lowercased.
    pub fn leaf(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Deserialize)]
struct SchemaRow {
    table_id: String,
    column: String,
    datatype: String,
    #[serde(default)]
    description: String,
}

/// Immutable table/column catalog.
#[derive(Debug, Clone, Default)]
pub struct SchemaStore {
    tables: Vec<TableSchema>,
    by_name: HashMap<String, usize>,
}

impl SchemaStore {
    /// Load from the schema CSV. Row order within a table is preserved.
    pub fn load_csv(path: &Path) -> Result<Self, SqlGuardError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: SchemaRow = record?;
            rows.push((row.table_id, row.column, row.datatype, row.description));
        }
        let store = Self::from_rows(rows);
        tracing::info!(tables = store.len(), path = %path.display(), "Schema store loaded");
        Ok(store)
    }

    /// Build from `(table_id, column, datatype, description)` rows.
    pub fn from_rows(rows: Vec<(String, String, String, String)>) -> Self {
        let mut store = SchemaStore::default();
        for (table_id, column, datatype, description) in rows {
            let key = table_id.to_ascii_lowercase();
            let idx = match store.by_name.get(&key) {
                Some(&idx) => idx,
                None => {
                    let parts = key.split('.').map(str::to_string).collect();
                    store.tables.push(TableSchema {
                        name: table_id.clone(),
                        parts,
                        columns: Vec::new(),
                    });
                    let idx = store.tables.len() - 1;
                    store.by_name.insert(key, idx);
                    idx
                }
            };
            store.tables[idx].columns.push(ColumnDef {
                name: column,
                datatype,
                description,
            });
        }
        store
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    /// Exact lookup by dotted name, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.tables[idx])
    }

    /// Resolve possibly-unqualified name segments against the catalog.
    ///
    /// Matches a table whose qualified segments end with the given ones
    /// (`users` and `ds.users` both resolve `project.ds.users`). Returns
    /// `None` when nothing matches or the suffix is ambiguous.
    pub fn resolve(&self, parts: &[String]) -> Option<&TableSchema> {
        if parts.is_empty() {
            return None;
        }
        let needle: Vec<String> = parts.iter().map(|p| p.to_ascii_lowercase()).collect();

        if let Some(table) = self.get(&needle.join(".")) {
            return Some(table);
        }

        let mut matched = None;
        for table in &self.tables {
            if table.parts.len() >= needle.len()
                && table.parts[table.parts.len() - needle.len()..] == needle[..]
            {
                if matched.is_some() {
                    return None;
                }
                matched = Some(table);
            }
        }
        matched
    }

    /// Resolve a dotted name.
    pub fn resolve_name(&self, dotted: &str) -> Option<&TableSchema> {
        let parts: Vec<String> = dotted.split('.').map(str::to_string).collect();
        self.resolve(&parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SchemaStore {
        SchemaStore::from_rows(vec![
            (
                "ds.users".to_string(),
                "id".to_string(),
                "INT64".to_string(),
                "user id".to_string(),
            ),
            (
                "ds.users".to_string(),
                "email".to_string(),
                "STRING".to_string(),
                String::new(),
            ),
            (
                "ds.orders".to_string(),
                "user_id".to_string(),
                "INT64".to_string(),
                "owning user".to_string(),
            ),
        ])
    }

    #[test]
    fn test_column_order_preserved() {
        let store = store();
        let users = store.get("ds.users").unwrap();
        assert_eq!(users.columns[0].name, "id");
        assert_eq!(users.columns[1].name, "email");
    }

    #[test]
    fn test_resolve_suffix() {
        let store = store();
        assert_eq!(store.resolve_name("users").unwrap().name, "ds.users");
        assert_eq!(store.resolve_name("DS.USERS").unwrap().name, "ds.users");
        assert!(store.resolve_name("missing").is_none());
    }

    #[test]
    fn test_resolve_ambiguous_is_none() {
        let store = SchemaStore::from_rows(vec![
            (
                "a.events".to_string(),
                "id".to_string(),
                "INT64".to_string(),
                String::new(),
            ),
            (
                "b.events".to_string(),
                "id".to_string(),
                "INT64".to_string(),
                String::new(),
            ),
        ]);
        assert!(store.resolve_name("events").is_none());
        assert!(store.resolve_name("a.events").is_some());
    }

    #[test]
    fn test_column_lookup_case_insensitive() {
        let store = store();
        let users = store.get("ds.users").unwrap();
        assert!(users.column("EMAIL").is_some());
        assert!(users.column("missing").is_none());
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.csv");
        std::fs::write(
            &path,
            "table_id,column,datatype,description\nds.users,id,INT64,user id\nds.users,email,STRING,\n",
        )
        .unwrap();

        let store = SchemaStore::load_csv(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("ds.users").unwrap().columns.len(), 2);
    }
}
