// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the memdex memory index.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Provider messages matching this pattern are treated as transient.
static RETRYABLE_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(rate[_ ]?limit|too many requests|\b429\b|\b5\d\d\b|resource has been exhausted|cloudflare|overloaded|temporarily unavailable|timed? ?out)",
    )
    .unwrap()
});

/// Messages matching this pattern come from an embedding call.
static EMBEDDING_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)embed").unwrap());

/// The error type shared by every memdex crate.
#[derive(Debug, Error)]
pub enum MemdexError {
    /// Invalid or missing configuration (credentials, chunking parameters, paths).
    #[error("configuration error: {0}")]
    Config(String),

    /// Embedded database failure (open, query, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A call to an external provider (embedding or LLM) failed.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        /// Whether a retry has a reasonable chance of succeeding.
        retryable: bool,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding generation failed after retries were exhausted.
    #[error("embedding failed: {message}")]
    Embedding { message: String },

    /// An optional capability (ANN extension, FTS5) is unavailable.
    #[error("{capability} unavailable: {message}")]
    Capability { capability: String, message: String },

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Filesystem failure while reading sources or swapping stores.
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sync failed; relayed to every caller that joined it.
    #[error("sync failed: {0}")]
    Sync(String),

    /// The index has been closed.
    #[error("memory index is closed")]
    Closed,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemdexError {
    /// Builds a provider error, classifying it as retryable from its message.
    pub fn provider(message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = is_retryable_message(&message);
        MemdexError::Provider {
            message,
            retryable,
            source: None,
        }
    }

    /// Wraps an i/o error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MemdexError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            MemdexError::Provider { retryable, .. } => *retryable,
            MemdexError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns true when the error came out of the embedding pipeline.
    ///
    /// A sync that fails this way may switch to the fallback provider.
    pub fn is_embedding_error(&self) -> bool {
        match self {
            MemdexError::Embedding { .. } => true,
            MemdexError::Provider { message, .. } => EMBEDDING_SIGNATURE.is_match(message),
            MemdexError::Timeout { operation, .. } => EMBEDDING_SIGNATURE.is_match(operation),
            MemdexError::Sync(message) => EMBEDDING_SIGNATURE.is_match(message),
            _ => false,
        }
    }
}

/// Returns true if a provider error message looks transient (429, 5xx, rate limit).
pub fn is_retryable_message(message: &str) -> bool {
    RETRYABLE_SIGNATURE.is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_messages_are_retryable() {
        assert!(is_retryable_message("HTTP 429: Too Many Requests"));
        assert!(is_retryable_message("openai embeddings failed: 503 service unavailable"));
        assert!(is_retryable_message("Resource has been exhausted (e.g. check quota)"));
        assert!(is_retryable_message("rate_limit_exceeded"));
    }

    #[test]
    fn auth_failures_are_not_retryable() {
        assert!(!is_retryable_message("401 unauthorized: invalid api key"));
        assert!(!is_retryable_message("model not found"));
    }

    #[test]
    fn provider_constructor_classifies() {
        assert!(MemdexError::provider("got 500 from upstream").is_retryable());
        assert!(!MemdexError::provider("bad request").is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = MemdexError::Timeout {
            operation: "embedding query".into(),
            duration: Duration::from_secs(60),
        };
        assert!(err.is_retryable());
        assert!(err.is_embedding_error());
    }

    #[test]
    fn embedding_errors_are_detected() {
        assert!(MemdexError::Embedding { message: "boom".into() }.is_embedding_error());
        assert!(MemdexError::provider("embeddings endpoint returned 400").is_embedding_error());
        assert!(!MemdexError::Config("bad".into()).is_embedding_error());
        assert!(!MemdexError::Closed.is_embedding_error());
    }
}
