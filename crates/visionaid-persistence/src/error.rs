//! Error types for persistence operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while persisting or reading data.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The event log has been closed.
    #[error("event log is closed")]
    Closed,

    /// Lock poisoned (thread panicked while holding the connection).
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Could not create a directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read a file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write a file.
    #[error("failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
