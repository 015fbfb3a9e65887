//! SQL safety validation
//!
//! Holds the tabular schema description, the curated safe-join allowlist,
//! and the multi-level validator that classifies SQL before it may reach the
//! warehouse.

pub mod safe_joins;
pub mod schema_store;
pub mod validator;

pub use safe_joins::SafeJoinMap;
pub use schema_store::{ColumnDef, SchemaStore, TableSchema};
pub use validator::{SqlValidator, ValidationLevel};

use thiserror::Error;

/// Loader errors for the schema store and safe-join map
#[derive(Error, Debug)]
pub enum SqlGuardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Safe-join map references unknown column {0}")]
    UnknownJoinColumn(String),
}

impl From<SqlGuardError> for sqlscout_core::Error {
    fn from(err: SqlGuardError) -> Self {
        sqlscout_core::Error::Configuration(err.to_string())
    }
}
