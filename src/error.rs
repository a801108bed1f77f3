// src/error.rs
// Standardized error types for the conversation linking engine

use thiserror::Error;

/// Main error type for the linking engine.
///
/// `InvalidInput` and `StoreUnavailable` are the two taxonomy members a
/// caller of `Linker::link_conversation` can observe directly; the rest
/// surface through `?` from the storage layer.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_sqlite::PoolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<deadpool_sqlite::InteractError> for LinkError {
    fn from(err: deadpool_sqlite::InteractError) -> Self {
        LinkError::StoreUnavailable(err.to_string())
    }
}
