use std::time::Duration;

use thiserror::Error;

/// Message fragments that mark a failure as transient. Matched
/// case-insensitively against the error detail of external dependencies.
const RETRYABLE_MARKERS: &[&str] = &[
    "econnreset",
    "etimedout",
    "enotfound",
    "rate_limit",
    "rate limit",
    "timeout",
    "connection reset",
];

// Core internal errors. Every variant maps onto exactly one wire-level
// error kind, see `kind()`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Record source unavailable: {0}")]
    RecordSource(String),
    #[error("Embedder unavailable: {0}")]
    Embedder(String),
    #[error("Generator unavailable: {0}")]
    Generator(String),
    #[error("Vector index unavailable: {0}")]
    VectorIndex(String),
    #[error("Metadata store unavailable: {0}")]
    MetadataStore(String),
    #[error("Circuit open for dependency '{dependency}'")]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Invalid citation: {0}")]
    InvalidCitation(String),
    #[error("No matching records")]
    NoResults,
    #[error("Internal service error: {0}")]
    Internal(String),
}

impl From<surrealdb::Error> for AppError {
    fn from(err: surrealdb::Error) -> Self {
        Self::MetadataStore(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl AppError {
    /// Stable wire-level kind identifier for the closed error set.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::RecordSource(_) => "record_source_unavailable",
            Self::Embedder(_) => "embedder_unavailable",
            Self::Generator(_) => "generator_unavailable",
            Self::VectorIndex(_) => "vector_index_unavailable",
            Self::MetadataStore(_) => "metadata_store_unavailable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::InvalidCitation(_) => "invalid_citation",
            Self::NoResults => "no_results",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether a retry with backoff is worthwhile. Only transient failures
    /// of external dependencies qualify; everything else surfaces unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RecordSource(detail)
            | Self::Embedder(detail)
            | Self::Generator(detail)
            | Self::VectorIndex(detail)
            | Self::MetadataStore(detail) => {
                let lowered = detail.to_lowercase();
                RETRYABLE_MARKERS
                    .iter()
                    .any(|marker| lowered.contains(marker))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AppError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(AppError::DeadlineExceeded.kind(), "deadline_exceeded");
        assert_eq!(AppError::NoResults.kind(), "no_results");
        assert_eq!(
            AppError::CircuitOpen {
                dependency: "generator".into(),
                retry_after: Duration::from_secs(30),
            }
            .kind(),
            "circuit_open"
        );
        assert_eq!(
            AppError::Generator("boom".into()).kind(),
            "generator_unavailable"
        );
    }

    #[test]
    fn transient_markers_are_retryable() {
        assert!(AppError::Generator("ETIMEDOUT while connecting".into()).is_retryable());
        assert!(AppError::Embedder("429 rate limit exceeded".into()).is_retryable());
        assert!(AppError::RecordSource("ECONNRESET".into()).is_retryable());
        assert!(AppError::MetadataStore("request timeout".into()).is_retryable());
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(!AppError::Generator("model not found".into()).is_retryable());
        assert!(!AppError::Validation("empty query".into()).is_retryable());
        assert!(!AppError::DeadlineExceeded.is_retryable());
        assert!(!AppError::CircuitOpen {
            dependency: "embedder".into(),
            retry_after: Duration::from_secs(30),
        }
        .is_retryable());
    }
}
