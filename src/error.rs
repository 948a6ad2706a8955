//! Error taxonomy for the engine.
//!
//! Every failure surfaced to a caller is one of a closed set of kinds so the
//! RPC and CLI layers can render `{kind, message, hint?}` without inspecting
//! the cause chain. Components catch only what they can act on; everything
//! else propagates with the original failure site preserved.

use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of error kinds surfaced to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Input violates a declared constraint (size, range, enum membership).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An id or path does not exist.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Vector-store or lexical-index I/O failure.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding model load or inference failure.
    #[error("embedding error: {message}")]
    Embedding { message: String },

    /// Unrecoverable grammar failure for an explicitly requested language.
    #[error("parser error: {message}")]
    Parser { message: String },

    /// The client pool could not hand out a client within the timeout.
    #[error("pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// A write was attempted while the engine is in read-only mode.
    #[error("engine is read-only")]
    ReadOnly,

    /// A concurrent write violated an invariant; retry usually resolves it.
    #[error("conflict: {message}")]
    Conflict { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    pub fn parser(message: impl Into<String>) -> Self {
        Self::Parser {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Stable kind string for the RPC error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Storage { .. } => "storage_error",
            Self::Embedding { .. } => "embedding_error",
            Self::Parser { .. } => "parser_error",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Timeout { .. } => "timeout",
            Self::ReadOnly => "read_only",
            Self::Conflict { .. } => "conflict",
        }
    }

    /// Actionable hint for the user-visible envelope, where one exists.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Storage { .. } => Some("check the vector store data directory is writable"),
            Self::Embedding { .. } => Some("reduce batch size or rebuild the embedding cache"),
            Self::Parser { .. } => Some("rebuild with the grammar for this language enabled"),
            Self::PoolExhausted { .. } => Some("raise storage.pool.max or lower concurrency"),
            Self::Timeout { .. } => Some("retry, or raise the per-request timeout"),
            Self::ReadOnly => Some("unset read_only in the configuration"),
            Self::Conflict { .. } => Some("retry the operation"),
            _ => None,
        }
    }

    /// Whether a retry with backoff is a reasonable caller response.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::Embedding { .. }
                | Self::PoolExhausted { .. }
                | Self::Timeout { .. }
                | Self::Conflict { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage {
            message: format!("serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Error::validation("x").kind(), "validation_error");
        assert_eq!(Error::not_found("y").kind(), "not_found");
        assert_eq!(Error::ReadOnly.kind(), "read_only");
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::storage("down").is_retryable());
        assert!(
            Error::PoolExhausted { waited_ms: 100 }.is_retryable()
        );
        assert!(!Error::validation("bad").is_retryable());
        assert!(!Error::ReadOnly.is_retryable());
    }
}
