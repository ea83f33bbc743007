// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for memdex integration tests.
//!
//! Provides deterministic provider mocks and temp workspaces for fast,
//! CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockEmbeddingProvider`] - Hashed bag-of-words embedder with call counters
//!   and failure injection, optionally with a batch API
//! - [`MockLlmInvoker`] - LLM invoker with queued replies
//! - [`TempWorkspace`] - Temp workspace plus a ready-to-use configuration

pub mod mock_llm;
pub mod mock_provider;
pub mod workspace;

pub use mock_llm::MockLlmInvoker;
pub use mock_provider::{mock_vector, MockBatchApi, MockEmbeddingProvider, MOCK_DIMS};
pub use workspace::TempWorkspace;
