//! Error types for the siltdb engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in siltdb engine operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Document encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The write-ahead log is corrupted or invalid.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The snapshot file is corrupted or invalid.
    #[error("snapshot corruption: {message}")]
    SnapshotCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// The requested key does not exist.
    #[error("key not found")]
    KeyNotFound,

    /// A query was structurally invalid.
    ///
    /// This covers typed-literal mismatches (a literal tagged `Number`
    /// carrying a string) and malformed AST combinations. It maps to a
    /// client error at the boundary, never a server fault.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// Geographic coordinates were out of range.
    #[error("invalid geo argument: {message}")]
    InvalidGeo {
        /// Description of the problem.
        message: String,
    },

    /// Database is already open or locked by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Invalid database format or layout.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The operation was cancelled by the caller.
    ///
    /// Long reads poll their cancel token between candidate batches and
    /// abort with this variant. Writes that have entered the store commit
    /// run to completion and never return it.
    #[error("operation cancelled")]
    Cancelled,
}

impl DbError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a snapshot corruption error.
    pub fn snapshot_corruption(message: impl Into<String>) -> Self {
        Self::SnapshotCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid geo argument error.
    pub fn invalid_geo(message: impl Into<String>) -> Self {
        Self::InvalidGeo {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}
