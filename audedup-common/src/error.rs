//! Common error types for audedup

use thiserror::Error;

/// Common result type for audedup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the audedup crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path already has a Track or UnknownFile record
    #[error("Path already classified: {0}")]
    AlreadyClassified(String),

    /// A non-duplicate track with the same identity tuple was committed first
    #[error("Identity tuple already held by a non-duplicate track: {0}")]
    IdentityConflict(String),

    /// Job status change that would break Pending -> Processing -> {Done, Failed}
    #[error("Invalid job transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: i64,
        from: String,
        to: String,
    },

    /// Another process holds the view lock file
    #[error("View is locked by another process: {0}")]
    ViewLocked(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite "database is locked"/"busy" errors that are worth retrying
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                let msg = db_err.message();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}
