//! Error types for the vector store
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::vector::VectorError;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Caller contract violation: vector length differs from the collection
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    InvalidDimension { expected: usize, actual: usize },

    /// A single record file is unreadable or malformed
    #[error("Record file '{path}' is corrupt: {reason}")]
    RecordCorrupt { path: PathBuf, reason: String },

    /// The persisted ANN index could not be decoded
    #[error("ANN index '{path}' is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("Timed out after {waited:?} waiting for lock '{path}'")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Collection '{name}' not found")]
    CollectionNotFound { name: String },

    #[error("Collection '{name}' already exists")]
    CollectionExists { name: String },

    #[error("Invalid parameters: {reason}")]
    InvalidParameters { reason: String },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization failed for '{path}': {reason}")]
    Serialization { path: PathBuf, reason: String },

    #[error(transparent)]
    Vector(VectorError),
}

impl StoreError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::InvalidDimension { .. } => "INVALID_DIMENSION",
            Self::RecordCorrupt { .. } => "RECORD_CORRUPT",
            Self::IndexCorrupt { .. } => "INDEX_CORRUPT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::CollectionNotFound { .. } => "COLLECTION_NOT_FOUND",
            Self::CollectionExists { .. } => "COLLECTION_EXISTS",
            Self::InvalidParameters { .. } => "INVALID_PARAMETERS",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Vector(_) => "VECTOR_ERROR",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::LockTimeout { .. } => vec![
                "Another process is rebuilding or updating the index, retry shortly",
                "Raise staleness.lock_timeout_ms or set it to 0 to wait indefinitely",
            ],
            Self::CollectionNotFound { .. } => vec![
                "Run 'semdex list' to see existing collections",
                "Create it first with 'semdex create <name>'",
            ],
            Self::CollectionExists { .. } => vec![
                "Use 'semdex clear <name>' to empty it while keeping its parameters",
                "Use 'semdex drop <name>' to remove it entirely",
            ],
            Self::IndexCorrupt { .. } => vec![
                "Run 'semdex rebuild <name>' to rebuild the index from records",
            ],
            Self::RecordCorrupt { .. } => vec![
                "Re-upsert the affected record or delete its file",
                "Check for disk errors or filesystem corruption",
            ],
            Self::InvalidDimension { .. } => vec![
                "Check the embedding model matches the collection's vector_dim",
            ],
            Self::FileRead { .. } | Self::FileWrite { .. } => vec![
                "Check that the path exists and you have read/write permissions",
                "Check available disk space",
            ],
            _ => vec![],
        }
    }
}

impl From<VectorError> for StoreError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::InvalidDimension { expected, actual }
            }
            VectorError::NonFiniteComponent { .. } => Self::InvalidParameters {
                reason: err.to_string(),
            },
            other => Self::Vector(other),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Helper trait for attaching a path to raw I/O errors
pub trait ErrorContext<T> {
    /// Wrap a read failure with the offending path
    fn read_context(self, path: &Path) -> StoreResult<T>;

    /// Wrap a write failure with the offending path
    fn write_context(self, path: &Path) -> StoreResult<T>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn read_context(self, path: &Path) -> StoreResult<T> {
        self.map_err(|source| StoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_context(self, path: &Path) -> StoreResult<T> {
        self.map_err(|source| StoreError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}
