//! Error types for mdstore.

use std::time::Duration;

use thiserror::Error;

use crate::storage::InvalidFilename;

/// Common error type for mdstore.
///
/// The first group of variants are domain outcomes that callers are expected
/// to handle (and map to their own responses). The rest are transport
/// failures from the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested document does not exist.
    #[error("file not found")]
    NotFound,

    /// A document with the target name already exists.
    #[error("file already exists")]
    AlreadyExists,

    /// The write would exceed the owner's byte quota.
    #[error("user space is full (limit {limit} bytes)")]
    SpaceFull { limit: u64 },

    /// The write would exceed the owner's file-count quota.
    #[error("file count limit reached (max {max})")]
    FileCountLimit { max: usize },

    /// The filename does not satisfy the filename policy.
    #[error("invalid filename: {0}")]
    InvalidFilename(#[from] InvalidFilename),

    /// Too many create requests in the current window.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error.
    ///
    /// Errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// A database operation did not finish before its deadline.
    #[error("database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns true for expected domain outcomes, false for transport failures.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound
                | StoreError::AlreadyExists
                | StoreError::SpaceFull { .. }
                | StoreError::FileCountLimit { .. }
                | StoreError::InvalidFilename(_)
                | StoreError::RateLimited { .. }
        )
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result type alias for mdstore operations.
pub type Result<T> = std::result::Result<T, StoreError>;
