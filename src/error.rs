//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Two layers:
//!
//! - [`StoreError`] — failures from the three backing stores. Carries a
//!   transient/permanent classification so the tri-store writer can decide
//!   whether to retry without inspecting message strings.
//! - [`PipelineError`] — everything the pipeline can surface to a caller:
//!   input errors (no retry), store errors (retried at the writer boundary
//!   when transient), and irrecoverable archive failures (the whole
//!   operation fails; the metadata store is never promoted to reference
//!   missing archived content).
//!
//! A failed search-index write after the metadata store was updated is
//! deliberately NOT an error here: it is recorded as `index_stale` on the
//! chunk and repaired asynchronously.

use thiserror::Error;

/// Failure reported by an object archive, search index, or metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Timeout or temporary unavailability; safe to retry with backoff.
    #[error("transient store failure in {op}: {message}")]
    Transient { op: &'static str, message: String },

    /// Deterministic failure; retrying will not help.
    #[error("store failure in {op}: {message}")]
    Permanent { op: &'static str, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn transient(op: &'static str, message: impl Into<String>) -> Self {
        StoreError::Transient {
            op,
            message: message.into(),
        }
    }

    pub fn permanent(op: &'static str, message: impl Into<String>) -> Self {
        StoreError::Permanent {
            op,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                StoreError::transient("sqlite", err.to_string())
            }
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::permanent("sqlite", other.to_string()),
        }
    }
}

/// Top-level error for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The element sequence itself is inconsistent (e.g. a table with zero
    /// rows). Surfaced immediately; never retried.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The object archive failed while materializing a new version. The
    /// whole version-creating operation is aborted.
    #[error("archive unavailable: {0}")]
    ArchiveUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("{0}")]
    Conflict(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::transient("put", "timeout").is_transient());
        assert!(!StoreError::permanent("put", "bad key").is_transient());
        assert!(!StoreError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_sqlx_error_mapping() {
        let e: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(e.is_transient());
        let e: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(e, StoreError::NotFound(_)));
    }
}
