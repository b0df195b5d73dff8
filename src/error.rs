//! Error types for mhtml-search.
//!
//! Only two failures are allowed to reach the top level: the index store
//! cannot be opened, or the user interrupts a run. Everything else (an
//! unreadable directory, a broken MIME part, an invalid JSON candidate, a
//! failed upsert, a bad SQL query) is caught where it happens and turned into
//! a counter, a log line, or a query diagnostic.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for indexing and scanning runs.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The index store could not be opened or written.
    #[error("Index store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors outside per-file processing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Index store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Failed to create the database file or its directory.
    #[error("Failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Failure to read one archive as a whole.
///
/// Part-level failures never surface here; they are skipped inside the
/// extractor.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Analytical engine errors.
#[cfg(feature = "analytics")]
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// DataFusion query error
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] datafusion::arrow::error::ArrowError),

    /// JSON conversion error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for SearchError
pub type Result<T> = std::result::Result<T, SearchError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
