// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the memdex hybrid memory index.
//!
//! Holds the error type, the capability traits callers implement
//! (embedding providers, LLM invokers) and the value types that cross the
//! index API boundary.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{is_retryable_message, MemdexError};
pub use traits::{
    BatchEmbeddingApi, BatchEmbeddingRequest, BatchEmbeddingResult, BatchJobState,
    EmbeddingProvider, LlmInvoker,
};
pub use types::*;
