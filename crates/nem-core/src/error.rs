//! Unified error types for the NEM data pipeline
//!
//! This module provides a common error type [`NemError`] that can represent
//! errors from any stage of the pipeline. Component-level faults that are
//! absorbed rather than propagated (dropped records, per-gap imputation
//! failures) are converted into dataset annotations instead of errors; only
//! faults a caller must act on surface through this type.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for all pipeline operations.
///
/// Record-level faults never appear here: the validator converts them into
/// gap rows and the imputer reports unresolved gaps per timestamp. What
/// remains is the taxonomy a caller can meaningfully handle — bad requests,
/// an unreachable provider, missing stored data, and expired deadlines.
#[derive(Error, Debug)]
pub enum NemError {
    /// Request describes an impossible or unsupported range
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Provider could not be reached or kept failing after bounded retries
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Raw data could not be reconciled with the expected schema
    #[error("validation error: {0}")]
    Validation(String),

    /// An imputation strategy lacked the surrounding data it requires
    #[error("insufficient history: {0}")]
    InsufficientHistory(String),

    /// No stored data covers any part of the requested range
    #[error("not found: {0}")]
    NotFound(String),

    /// The per-request deadline expired; completed sub-ranges stay persisted
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// I/O errors (file access, staging, renames)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using NemError.
pub type NemResult<T> = Result<T, NemError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for NemError {
    fn from(err: anyhow::Error) -> Self {
        NemError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for NemError {
    fn from(s: String) -> Self {
        NemError::Other(s)
    }
}

impl From<&str> for NemError {
    fn from(s: &str) -> Self {
        NemError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for NemError {
    fn from(err: serde_json::Error) -> Self {
        NemError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NemError::SourceUnavailable("connection refused".into());
        assert!(err.to_string().contains("source unavailable"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: NemError = io_err.into();
        assert!(matches!(err, NemError::Io(_)));
    }

    #[test]
    fn test_string_conversion() {
        let err: NemError = "something odd".into();
        assert_eq!(err.to_string(), "something odd");
    }
}
