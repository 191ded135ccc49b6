//! Error types for cross-tracker query operations.

use std::path::PathBuf;

use crate::query::SyntaxError;
use crate::validation::InvalidSearchables;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store not initialized at {0}")]
    NotInitialized(PathBuf),

    #[error("Store already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("{0}")]
    InvalidSearchables(#[from] InvalidSearchables),

    #[error("Query is too complex: more than {limit} comparisons")]
    LimitSizeExceeded { limit: usize },

    /// A code defect, never a user mistake.
    #[error("Logic error: {0}")]
    Logic(String),
}

pub type Result<T> = std::result::Result<T, Error>;
