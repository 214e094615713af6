//! Error types for the CLI.

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Nothing was sent; safe to retry.
    #[error("Could not reach daemon: {0}")]
    Connect(String),

    /// The request may already have been applied.
    #[error("Daemon unavailable: {0}")]
    Unavailable(String),

    #[error("Daemon returned {code}: {message}")]
    Daemon { code: String, message: String },

    #[error("Daemon response carried no data")]
    EmptyResponse,

    #[error("Invalid JSON on line {line}: {source}")]
    InvalidLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
