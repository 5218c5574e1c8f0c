//! Error taxonomy for every component of the pipeline.
//!
//! Library operations return [`Result<T>`] so callers handle each failure
//! mode explicitly. The `srag` binary wraps these in `anyhow` with context.

use thiserror::Error;

/// Result type alias using [`RagError`].
pub type Result<T> = std::result::Result<T, RagError>;

/// All failure modes surfaced by the loader, chunker, index, pipeline and
/// history store.
#[derive(Debug, Error)]
pub enum RagError {
    /// The input file extension is not `.csv`, `.xlsx` or `.xls`.
    #[error("unsupported file format '{0}': use .csv, .xlsx, or .xls")]
    UnsupportedFormat(String),

    /// A path that should exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// File content does not match its declared format.
    #[error("failed to parse {file}: {message}")]
    ParseError { file: String, message: String },

    /// An operation received nothing to work on (zero rows, zero chunks, blank query).
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// The embedding service is unconfigured, unreachable, or returned bad data.
    #[error("embedding provider error: {0}")]
    EmbeddingProviderError(String),

    /// The vector index could not be queried.
    #[error("retrieval failed: {0}")]
    RetrievalError(String),

    /// The language model call failed (timeout, auth, rate limit, bad response).
    #[error("generation failed: {0}")]
    GenerationError(String),

    /// File I/O on the index or history failed.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// User identity cannot be used as a history file name.
    #[error("invalid user name '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidUser(String),

    /// `delete(index)` addressed a position past the end of the history.
    #[error("history entry {index} does not exist ({len} entries)")]
    HistoryIndexOutOfRange { index: usize, len: usize },

    /// A question was asked before any dataset was indexed.
    #[error("no vector index is ready; ingest a file first")]
    IndexNotReady,
}

impl RagError {
    pub(crate) fn parse(file: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RagError::ParseError {
            file: file.into(),
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(e: sqlx::Error) -> Self {
        RagError::PersistenceError(e.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        RagError::PersistenceError(e.to_string())
    }
}
