// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider traits.
//!
//! The index depends only on these traits, never on a concrete provider.

use async_trait::async_trait;

use crate::error::MemdexError;

/// An external "text in, vector out" capability.
///
/// Implemented by callers (OpenAI, Gemini, Voyage, local models...) and
/// consumed by the embedding orchestrator.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Provider identifier, e.g. `"openai"`.
    fn id(&self) -> &str;

    /// Embedding model name.
    fn model(&self) -> &str;

    /// Fingerprint of the effective endpoint and request headers.
    ///
    /// Two providers with the same id and model but different endpoints must
    /// return different keys so their cached vectors never collide.
    fn provider_key(&self) -> String {
        format!("{}:{}", self.id(), self.model())
    }

    /// Local providers get the longer timeouts.
    fn is_local(&self) -> bool {
        false
    }

    /// Embeds a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, MemdexError>;

    /// Embeds several texts; the result has one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemdexError>;

    /// The provider's asynchronous batch submission API, if it has one.
    fn batch_api(&self) -> Option<&dyn BatchEmbeddingApi> {
        None
    }
}

/// A single request inside a provider-native batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmbeddingRequest {
    /// Caller-chosen key used to map results back.
    pub custom_id: String,
    pub text: String,
}

/// One line of a completed batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmbeddingResult {
    pub custom_id: String,
    pub embedding: Option<Vec<f32>>,
    pub error: Option<String>,
}

/// State of a submitted batch job.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchJobState {
    /// Still queued or running.
    Pending,
    /// Finished; results are keyed by `custom_id` and may arrive in any order.
    Completed(Vec<BatchEmbeddingResult>),
    /// The provider gave up on the job.
    Failed(String),
}

/// Provider-native asynchronous batch embedding (submit, then poll).
#[async_trait]
pub trait BatchEmbeddingApi: Send + Sync {
    /// Submits a job and returns its provider-side id.
    async fn submit(&self, requests: Vec<BatchEmbeddingRequest>) -> Result<String, MemdexError>;

    /// Polls a previously submitted job.
    async fn poll(&self, job_id: &str) -> Result<BatchJobState, MemdexError>;
}
