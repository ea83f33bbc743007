// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff with jitter for transient provider failures.

use std::future::Future;
use std::time::Duration;

use memdex_config::model::EmbeddingConfig;
use memdex_core::MemdexError;
use rand::Rng;
use tracing::warn;

/// Random spread applied to every delay (±20%).
const JITTER: f64 = 0.2;

/// Retry schedule for embedding calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, with jitter, never above `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_for(retry).as_secs_f64();
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
        Duration::from_secs_f64(base * factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, MemdexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MemdexError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
