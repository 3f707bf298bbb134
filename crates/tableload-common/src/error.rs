//! Error types for tableload

use thiserror::Error;

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Failures that abort a whole load run.
///
/// Per-unit store failures never show up here; they are resolved into unit
/// outcomes by the ingest engine.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run accounting mismatch: expected {expected} completed units, counted {actual}")]
    Accounting { expected: u64, actual: u64 },
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
