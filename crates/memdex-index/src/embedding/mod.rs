// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding orchestration on top of an [`EmbeddingProvider`].
//!
//! Texts are looked up in the cache first. Misses go through the provider's
//! batch API when it has one and batching is enabled, otherwise (or on batch
//! failure) through token-bounded `embed_batch` calls with retry. Every fresh
//! vector is written through the cache before it is returned.

pub mod batch;
pub mod retry;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use memdex_config::model::{BatchConfig, EmbeddingConfig};
use memdex_core::{BatchEmbeddingRequest, BatchStats, EmbeddingProvider, MemdexError};
use memdex_storage::Database;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::metrics::{record_cache_hits, record_chunks_embedded};
use crate::types::estimate_tokens;

pub use batch::{run_batch_job, BatchFailureTracker};
pub use retry::RetryPolicy;

/// One text to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedItem {
    /// Deterministic key; used as the batch-API `custom_id`.
    pub key: String,
    /// Digest of `text`; the cache key.
    pub hash: String,
    pub text: String,
}

/// Groups texts into batches of at most `max_tokens` estimated tokens.
///
/// A single text above the ceiling gets a batch of its own. Returns index
/// ranges into `texts`.
pub fn token_batches(texts: &[&str], max_tokens: usize) -> Vec<std::ops::Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0;
    for (i, text) in texts.iter().enumerate() {
        let t = estimate_tokens(text);
        if i > start && tokens + t > max_tokens {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens += t;
    }
    if start < texts.len() {
        batches.push(start..texts.len());
    }
    batches
}

/// Embedding front-end for one provider.
pub struct EmbeddingOrchestrator {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    config: EmbeddingConfig,
    batch_config: BatchConfig,
    batch: BatchFailureTracker,
    retry: RetryPolicy,
}

impl EmbeddingOrchestrator {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache_enabled: bool,
        config: EmbeddingConfig,
        batch_config: BatchConfig,
    ) -> Self {
        let cache = EmbeddingCache::new(
            cache_enabled,
            provider.id(),
            provider.model(),
            provider.provider_key(),
        );
        let batch_enabled = batch_config.enabled && provider.batch_api().is_some();
        Self {
            batch: BatchFailureTracker::new(batch_enabled, batch_config.failure_limit),
            retry: RetryPolicy::from_config(&config),
            provider,
            cache,
            config,
            batch_config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn provider_key(&self) -> String {
        self.provider.provider_key()
    }

    /// True while the batch API is in use; sync sizes its worker pool by it.
    pub async fn batch_active(&self) -> bool {
        self.batch_config.wait && self.batch.is_active().await
    }

    pub async fn batch_stats(&self) -> BatchStats {
        self.batch.stats().await
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs(if self.provider.is_local() {
            self.config.query_timeout_local_secs
        } else {
            self.config.query_timeout_remote_secs
        })
    }

    fn batch_timeout(&self) -> Duration {
        Duration::from_secs(if self.provider.is_local() {
            self.config.batch_timeout_local_secs
        } else {
            self.config.batch_timeout_remote_secs
        })
    }

    /// Embeds a search query under the query timeout.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, MemdexError> {
        let timeout = self.query_timeout();
        tokio::time::timeout(timeout, self.provider.embed_query(text))
            .await
            .map_err(|_| MemdexError::Timeout {
                operation: "embedding query".into(),
                duration: timeout,
            })?
    }

    /// Embeds `items`, returning one vector per item in input order.
    ///
    /// `db` holds the cache the lookups and write-through go to.
    pub async fn embed_items(
        &self,
        db: &Database,
        items: &[EmbedItem],
    ) -> Result<Vec<Vec<f32>>, MemdexError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let hashes: Vec<String> = items.iter().map(|i| i.hash.clone()).collect();
        let mut vectors = match self.cache.load(db, &hashes).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "embedding cache lookup failed, embedding everything");
                HashMap::new()
            }
        };
        record_cache_hits(vectors.len());

        // One request per distinct missing text.
        let mut seen = HashSet::new();
        let misses: Vec<&EmbedItem> = items
            .iter()
            .filter(|item| !vectors.contains_key(&item.hash) && seen.insert(item.hash.as_str()))
            .collect();

        if !misses.is_empty() {
            let fresh = self.embed_misses(&misses).await?;
            record_chunks_embedded(fresh.len());
            if let Err(e) = self
                .cache
                .upsert(db, fresh.iter().map(|(h, v)| (h.clone(), v.clone())).collect())
                .await
            {
                warn!(error = %e, "embedding cache write-through failed");
            }
            vectors.extend(fresh);
        }

        items
            .iter()
            .map(|item| {
                vectors.get(&item.hash).cloned().ok_or_else(|| MemdexError::Embedding {
                    message: format!("no embedding produced for {}", item.key),
                })
            })
            .collect()
    }

    /// Embeds cache misses; returns vectors keyed by text hash.
    async fn embed_misses(
        &self,
        misses: &[&EmbedItem],
    ) -> Result<HashMap<String, Vec<f32>>, MemdexError> {
        let mut fresh: HashMap<String, Vec<f32>> = HashMap::with_capacity(misses.len());
        let mut remaining: Vec<&EmbedItem> = misses.to_vec();

        if self.batch_active().await
            && let Some(api) = self.provider.batch_api()
        {
            let requests = remaining
                .iter()
                .map(|item| BatchEmbeddingRequest {
                    custom_id: item.key.clone(),
                    text: item.text.clone(),
                })
                .collect();
            let poll = Duration::from_millis(self.batch_config.poll_interval_ms);
            let timeout = Duration::from_secs(self.batch_config.timeout_minutes * 60);
            match run_batch_job(api, requests, poll, timeout).await {
                Ok(by_id) => {
                    self.batch.record_success().await;
                    remaining.retain(|item| match by_id.get(&item.key) {
                        Some(vector) => {
                            fresh.insert(item.hash.clone(), vector.clone());
                            false
                        }
                        None => true,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "embedding batch job failed, using direct calls");
                    self.batch.record_failure(&e).await;
                }
            }
        }

        if remaining.is_empty() {
            return Ok(fresh);
        }

        let texts: Vec<&str> = remaining.iter().map(|i| i.text.as_str()).collect();
        for range in token_batches(&texts, self.config.max_batch_tokens) {
            let group: Vec<String> = texts[range.clone()].iter().map(|t| t.to_string()).collect();
            let vectors = self.embed_group(group).await?;
            for (item, vector) in remaining[range].iter().zip(vectors) {
                fresh.insert(item.hash.clone(), vector);
            }
        }
        Ok(fresh)
    }

    /// One `embed_batch` call with timeout and retry.
    async fn embed_group(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, MemdexError> {
        let timeout = self.batch_timeout();
        let expected = texts.len();
        let texts = &texts;
        let result = self
            .retry
            .run("embedding batch", move || async move {
                let vectors = tokio::time::timeout(timeout, self.provider.embed_batch(texts))
                    .await
                    .map_err(|_| MemdexError::Timeout {
                        operation: "embedding batch".into(),
                        duration: timeout,
                    })??;
                if vectors.len() != expected {
                    return Err(MemdexError::Embedding {
                        message: format!(
                            "provider returned {} embeddings for {expected} texts",
                            vectors.len()
                        ),
                    });
                }
                Ok(vectors)
            })
            .await;

        result.map_err(|e| match e {
            MemdexError::Config(_) | MemdexError::Embedding { .. } => e,
            other => MemdexError::Embedding {
                message: format!(
                    "{} {}: {other}",
                    self.provider.id(),
                    self.provider.model()
                ),
            },
        })
        .inspect(|vectors| debug!(count = vectors.len(), "embedding batch complete"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memdex_test_utils::MockEmbeddingProvider;

    fn item(key: &str, text: &str) -> EmbedItem {
        EmbedItem {
            key: key.into(),
            hash: crate::types::hash_text(text),
            text: text.into(),
        }
    }

    fn orchestrator(provider: Arc<MockEmbeddingProvider>) -> EmbeddingOrchestrator {
        EmbeddingOrchestrator::new(
            provider,
            true,
            EmbeddingConfig {
                base_delay_ms: 1,
                max_delay_ms: 2,
                ..EmbeddingConfig::default()
            },
            BatchConfig::default(),
        )
    }

    #[test]
    fn token_batches_respect_ceiling() {
        let small = "x".repeat(400); // 100 tokens
        let huge = "y".repeat(40_000); // 10_000 tokens
        let texts = vec![small.as_str(), small.as_str(), huge.as_str(), small.as_str()];
        let batches = token_batches(&texts, 250);
        assert_eq!(batches, vec![0..2, 2..3, 3..4]);
        assert!(token_batches(&[], 250).is_empty());
    }

    #[tokio::test]
    async fn second_embed_hits_the_cache() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new());
        let orch = orchestrator(provider.clone());
        let items = vec![item("a", "refund policy"), item("b", "shipping times")];

        let first = orch.embed_items(&db, &items).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(provider.embedded_texts(), 2);

        let second = orch.embed_items(&db, &items).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.embedded_texts(), 2, "served from cache");
    }

    #[tokio::test]
    async fn duplicate_texts_are_embedded_once() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new());
        let orch = orchestrator(provider.clone());
        let items = vec![item("a", "same"), item("b", "same")];
        let out = orch.embed_items(&db, &items).await.unwrap();
        assert_eq!(out[0], out[1]);
        assert_eq!(provider.embedded_texts(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new());
        provider.fail_next(2, "429 rate limit");
        let orch = orchestrator(provider.clone());
        let out = orch.embed_items(&db, &[item("a", "text")]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(provider.batch_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_an_embedding_error() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new());
        provider.fail_next(10, "503 overloaded");
        let orch = orchestrator(provider.clone());
        let err = orch.embed_items(&db, &[item("a", "text")]).await.unwrap_err();
        assert!(err.is_embedding_error());
        assert_eq!(provider.batch_calls(), 3);
    }

    #[tokio::test]
    async fn batch_api_results_are_used_and_cached() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new().with_batch_api());
        let orch = EmbeddingOrchestrator::new(
            provider.clone(),
            true,
            EmbeddingConfig::default(),
            BatchConfig {
                enabled: true,
                poll_interval_ms: 1,
                ..BatchConfig::default()
            },
        );
        assert!(orch.batch_active().await);
        let out = orch
            .embed_items(&db, &[item("a", "alpha"), item("b", "beta")])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(provider.batch_jobs(), 1);
        assert_eq!(provider.batch_calls(), 0);
        assert_eq!(orch.cache().count(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failing_batch_api_falls_back_then_disables() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new().with_failing_batch_api());
        let orch = EmbeddingOrchestrator::new(
            provider.clone(),
            false,
            EmbeddingConfig::default(),
            BatchConfig {
                enabled: true,
                poll_interval_ms: 1,
                failure_limit: 2,
                ..BatchConfig::default()
            },
        );
        for round in 0..3 {
            let out = orch
                .embed_items(&db, &[item("a", &format!("text {round}"))])
                .await
                .unwrap();
            assert_eq!(out.len(), 1);
        }
        assert_eq!(provider.batch_jobs(), 2, "abandoned after the failure limit");
        assert_eq!(provider.batch_calls(), 3);
        assert!(!orch.batch_active().await);
        assert_eq!(orch.batch_stats().await.failures, 2);
    }

    #[tokio::test]
    async fn query_timeout_is_reported() {
        let provider = Arc::new(MockEmbeddingProvider::new().with_query_delay(Duration::from_secs(5)));
        let orch = EmbeddingOrchestrator::new(
            provider,
            false,
            EmbeddingConfig {
                query_timeout_remote_secs: 0,
                ..EmbeddingConfig::default()
            },
            BatchConfig::default(),
        );
        let err = orch.embed_query("q").await.unwrap_err();
        assert!(matches!(err, MemdexError::Timeout { .. }));
    }
}
