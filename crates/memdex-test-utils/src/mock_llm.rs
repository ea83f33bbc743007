// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock LLM invoker for L1 overview tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use memdex_core::{LlmInvoker, MemdexError};

/// Replies from a FIFO queue, then with a fixed default. Optionally fails
/// every call.
pub struct MockLlmInvoker {
    responses: Mutex<VecDeque<String>>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockLlmInvoker {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            ..Self::new()
        }
    }

    /// An invoker whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmInvoker for MockLlmInvoker {
    async fn invoke(&self, _prompt: &str) -> Result<String, MemdexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(MemdexError::provider(message.clone()));
        }
        Ok(self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "mock overview".to_string()))
    }
}
