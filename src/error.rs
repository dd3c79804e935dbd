//! Error taxonomy for the indexing and retrieval engine.
//!
//! Construction-time problems surface as [`IndexError::InvalidConfiguration`]
//! or [`IndexError::BackendUnavailable`] and are never retried. Failures
//! during a call carry enough context (backend name, source id, cause) to be
//! rendered directly to a user.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the library surface.
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Bad chunking parameters, unknown backend or provider, missing credentials.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The backing resource could not be reached at construction or call time.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// The backend was reachable but rejected or failed the operation.
    #[error("{backend} backend error: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },

    /// Model failure, empty input text, or a response that does not line up with the input.
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to load {source_id}: {reason}")]
    Load { source_id: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        IndexError::InvalidConfiguration(msg.into())
    }

    pub(crate) fn embedding(msg: impl Into<String>) -> Self {
        IndexError::Embedding(msg.into())
    }
}
