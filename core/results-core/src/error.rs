//! Error types for results-core operations.

use std::path::PathBuf;

/// All errors that can occur in results-core operations.
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    // ─────────────────────────────────────────────────────────────────────
    // Event Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed browser descriptor: {0}")]
    MalformedBrowser(String),

    #[error("Step index out of range: {0}")]
    StepIndexOutOfRange(usize),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Data directory not found")]
    DataDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Data Sheet Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Page size must be at least 1")]
    InvalidPageSize,

    #[error("Row not found: {0}")]
    RowNotFound(usize),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using ResultsError.
pub type Result<T> = std::result::Result<T, ResultsError>;

impl From<ResultsError> for String {
    fn from(err: ResultsError) -> String {
        err.to_string()
    }
}
