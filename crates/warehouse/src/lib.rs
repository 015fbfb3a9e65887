//! Warehouse gateway
//!
//! A thin read-only client layer over the warehouse REST API plus the
//! executor that enforces the safety caps: dry-run gating, byte-bill
//! budgets, timeouts, and row truncation.

pub mod bigquery;
pub mod executor;
pub mod fake;

pub use bigquery::{BigQueryConfig, BigQueryWarehouse};
pub use executor::{ExecuteOptions, QueryExecutor};
pub use fake::StaticWarehouse;

use thiserror::Error;

/// Warehouse client errors
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for WarehouseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WarehouseError::Timeout
        } else {
            WarehouseError::Network(err.to_string())
        }
    }
}

impl From<WarehouseError> for sqlscout_core::Error {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Timeout => sqlscout_core::Error::ExecutionTimeout,
            WarehouseError::Configuration(msg) => sqlscout_core::Error::Configuration(msg),
            other => sqlscout_core::Error::Backend(other.to_string()),
        }
    }
}
