//! HTTP facade
//!
//! Serves `/query/search`, `/query/quick`, and `/sql/execute` over the
//! engine, with the loaded indices held as an immutable snapshot that an
//! admin reload swaps whole.

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::{AppState, EngineSnapshot};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Startup error: {0}")]
    Startup(String),

    #[error(transparent)]
    Engine(#[from] sqlscout_core::Error),
}
