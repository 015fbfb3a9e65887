//! Safe-join map
//!
//! Curated allowlist of join edges between table columns. Every join the
//! schema injector renders and every join predicate the strict validator
//! accepts comes from here, never inferred.

use std::path::Path;

use sqlscout_core::{ColumnRef, SafeJoin};

use crate::schema_store::SchemaStore;
use crate::SqlGuardError;

#[derive(Debug, Clone, Default)]
pub struct SafeJoinMap {
    edges: Vec<SafeJoin>,
}

impl SafeJoinMap {
    /// Load the JSON array of `{left, right, relationship, cardinality}`.
    pub fn load_json(path: &Path) -> Result<Self, SqlGuardError> {
        let text = std::fs::read_to_string(path)?;
        let edges: Vec<SafeJoin> = serde_json::from_str(&text)?;
        tracing::info!(edges = edges.len(), path = %path.display(), "Safe-join map loaded");
        Ok(Self { edges })
    }

    pub fn from_edges(edges: Vec<SafeJoin>) -> Self {
        Self { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges(&self) -> &[SafeJoin] {
        &self.edges
    }

    /// Every column referenced by an edge must exist in the schema store.
    pub fn validate_against(&self, store: &SchemaStore) -> Result<(), SqlGuardError> {
        for edge in &self.edges {
            for side in [&edge.left, &edge.right] {
                let table = store
                    .resolve_name(&side.table)
                    .ok_or_else(|| SqlGuardError::UnknownJoinColumn(side.to_string()))?;
                if table.column(&side.column).is_none() {
                    return Err(SqlGuardError::UnknownJoinColumn(side.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Look up an edge between two column refs, in either direction.
    pub fn allows(&self, a: &ColumnRef, b: &ColumnRef) -> Option<&SafeJoin> {
        self.edges.iter().find(|edge| {
            (edge.left.matches(a) && edge.right.matches(b))
                || (edge.left.matches(b) && edge.right.matches(a))
        })
    }

    /// Edges whose endpoints both land in the given tables (matched by final
    /// table segment).
    pub fn edges_within<'a>(&'a self, table_leaves: &[String]) -> Vec<&'a SafeJoin> {
        self.edges
            .iter()
            .filter(|edge| {
                table_leaves.contains(&edge.left.table_leaf())
                    && table_leaves.contains(&edge.right.table_leaf())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlscout_core::{JoinCardinality, JoinRelationship};

    fn map() -> SafeJoinMap {
        SafeJoinMap::from_edges(vec![SafeJoin {
            left: ColumnRef::new("users", "id"),
            right: ColumnRef::new("orders", "user_id"),
            relationship: JoinRelationship::OneToMany,
            cardinality: JoinCardinality::Both,
        }])
    }

    #[test]
    fn test_allows_either_direction() {
        let map = map();
        let users_id = ColumnRef::new("ds.users", "id");
        let orders_user = ColumnRef::new("ds.orders", "user_id");

        assert!(map.allows(&users_id, &orders_user).is_some());
        assert!(map.allows(&orders_user, &users_id).is_some());

        let orders_id = ColumnRef::new("ds.orders", "id");
        assert!(map.allows(&users_id, &orders_id).is_none());
    }

    #[test]
    fn test_validate_against_store() {
        let map = map();
        let good = SchemaStore::from_rows(vec![
            (
                "ds.users".to_string(),
                "id".to_string(),
                "INT64".to_string(),
                String::new(),
            ),
            (
                "ds.orders".to_string(),
                "user_id".to_string(),
                "INT64".to_string(),
                String::new(),
            ),
        ]);
        assert!(map.validate_against(&good).is_ok());

        let missing = SchemaStore::from_rows(vec![(
            "ds.users".to_string(),
            "id".to_string(),
            "INT64".to_string(),
            String::new(),
        )]);
        assert!(map.validate_against(&missing).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safe_joins.json");
        std::fs::write(
            &path,
            r#"[{"left":"users.id","right":"orders.user_id","relationship":"one_to_many","cardinality":"both"}]"#,
        )
        .unwrap();

        let map = SafeJoinMap::load_json(&path).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.edges()[0].left.column, "id");
    }

    #[test]
    fn test_edges_within() {
        let map = map();
        let leaves = vec!["users".to_string(), "orders".to_string()];
        assert_eq!(map.edges_within(&leaves).len(), 1);
        assert!(map.edges_within(&["users".to_string()]).is_empty());
    }
}
