// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits implemented by callers and consumed by the index.
//!
//! All traits use `#[async_trait]` so they can be used as trait objects.

pub mod embedding;
pub mod llm;

pub use embedding::{
    BatchEmbeddingApi, BatchEmbeddingRequest, BatchEmbeddingResult, BatchJobState,
    EmbeddingProvider,
};
pub use llm::LlmInvoker;
