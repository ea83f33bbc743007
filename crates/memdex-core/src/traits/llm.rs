// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opaque chat-completion capability used for L1 overviews.

use async_trait::async_trait;

use crate::error::MemdexError;

/// Turns a prompt into text. The index never sees which model answers.
#[async_trait]
pub trait LlmInvoker: Send + Sync + 'static {
    async fn invoke(&self, prompt: &str) -> Result<String, MemdexError>;
}
