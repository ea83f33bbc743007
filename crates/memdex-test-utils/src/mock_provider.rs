// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic embedding provider for tests.
//!
//! `MockEmbeddingProvider` maps text to a hashed bag-of-words vector, so
//! texts sharing words are close and identical texts embed identically.
//! Calls are counted and failures can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use memdex_core::{
    BatchEmbeddingApi, BatchEmbeddingRequest, BatchEmbeddingResult, BatchJobState,
    EmbeddingProvider, MemdexError,
};

/// Dimensionality of mock vectors.
pub const MOCK_DIMS: usize = 64;

/// The vector [`MockEmbeddingProvider`] produces for `text`.
pub fn mock_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims.max(1)];
    let mut any = false;
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let token = token.to_lowercase();
        let slot = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
        vector[slot] += 1.0;
        any = true;
    }
    if !any {
        vector[0] = 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    vector.iter_mut().for_each(|v| *v /= norm);
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[derive(Default)]
struct Failures {
    remaining: usize,
    message: String,
}

/// A provider-native batch API that completes every job on first poll.
pub struct MockBatchApi {
    dims: usize,
    fail: bool,
    jobs: AtomicUsize,
    pending: Mutex<HashMap<String, Vec<BatchEmbeddingRequest>>>,
}

impl MockBatchApi {
    fn new(dims: usize, fail: bool) -> Self {
        Self {
            dims,
            fail,
            jobs: AtomicUsize::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of jobs submitted.
    pub fn jobs(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchEmbeddingApi for MockBatchApi {
    async fn submit(&self, requests: Vec<BatchEmbeddingRequest>) -> Result<String, MemdexError> {
        let n = self.jobs.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("job-{n}");
        self.pending
            .lock()
            .expect("mock batch lock")
            .insert(job_id.clone(), requests);
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<BatchJobState, MemdexError> {
        let requests = self
            .pending
            .lock()
            .expect("mock batch lock")
            .remove(job_id)
            .ok_or_else(|| MemdexError::provider(format!("unknown batch job {job_id}")))?;
        if self.fail {
            return Ok(BatchJobState::Failed("mock batch failure".into()));
        }
        Ok(BatchJobState::Completed(
            requests
                .into_iter()
                .map(|r| BatchEmbeddingResult {
                    embedding: Some(mock_vector(&r.text, self.dims)),
                    custom_id: r.custom_id,
                    error: None,
                })
                .collect(),
        ))
    }
}

/// A deterministic [`EmbeddingProvider`].
pub struct MockEmbeddingProvider {
    id: String,
    model: String,
    dims: usize,
    query_delay: Option<Duration>,
    batch_api: Option<MockBatchApi>,
    batch_calls: AtomicUsize,
    embedded_texts: AtomicUsize,
    query_calls: AtomicUsize,
    failures: Mutex<Failures>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            id: "mock".into(),
            model: "mock-embed-v1".into(),
            dims: MOCK_DIMS,
            query_delay: None,
            batch_api: None,
            batch_calls: AtomicUsize::new(0),
            embedded_texts: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            failures: Mutex::new(Failures::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    /// Adds a batch API that completes every job.
    pub fn with_batch_api(mut self) -> Self {
        self.batch_api = Some(MockBatchApi::new(self.dims, false));
        self
    }

    /// Adds a batch API whose jobs always fail.
    pub fn with_failing_batch_api(mut self) -> Self {
        self.batch_api = Some(MockBatchApi::new(self.dims, true));
        self
    }

    /// Delays every query embedding.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Makes the next `count` `embed_batch` calls fail with `message`.
    pub fn fail_next(&self, count: usize, message: &str) {
        let mut failures = self.failures.lock().expect("mock failure lock");
        failures.remaining = count;
        failures.message = message.to_string();
    }

    /// The vector this provider returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        mock_vector(text, self.dims)
    }

    /// Texts embedded through `embed_batch`.
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    /// `embed_batch` calls, failed ones included.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Jobs submitted to the batch API.
    pub fn batch_jobs(&self) -> usize {
        self.batch_api.as_ref().map_or(0, MockBatchApi::jobs)
    }

    fn take_failure(&self) -> Option<String> {
        let mut failures = self.failures.lock().expect("mock failure lock");
        if failures.remaining == 0 {
            return None;
        }
        failures.remaining -= 1;
        Some(failures.message.clone())
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, MemdexError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(mock_vector(text, self.dims))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemdexError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.take_failure() {
            return Err(MemdexError::provider(message));
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| mock_vector(t, self.dims)).collect())
    }

    fn batch_api(&self) -> Option<&dyn BatchEmbeddingApi> {
        self.batch_api.as_ref().map(|api| api as &dyn BatchEmbeddingApi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_are_normalized_and_deterministic() {
        let a = mock_vector("Refund policy: thirty days", MOCK_DIMS);
        let b = mock_vector("refund POLICY thirty days", MOCK_DIMS);
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
        assert!((cosine(&mock_vector("", MOCK_DIMS), &mock_vector("", MOCK_DIMS)) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_are_closer() {
        let query = mock_vector("refund policy", MOCK_DIMS);
        let related = mock_vector("our refund policy is generous", MOCK_DIMS);
        let unrelated = mock_vector("kubernetes cluster upgrade", MOCK_DIMS);
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let provider = MockEmbeddingProvider::new();
        provider.fail_next(1, "429 rate limit");
        let texts = vec!["a".to_string()];
        let err = provider.embed_batch(&texts).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.embed_batch(&texts).await.unwrap().len(), 1);
        assert_eq!(provider.batch_calls(), 2);
        assert_eq!(provider.embedded_texts(), 1);
    }

    #[tokio::test]
    async fn batch_api_completes_jobs() {
        let provider = MockEmbeddingProvider::new().with_batch_api();
        let api = provider.batch_api().unwrap();
        let job = api
            .submit(vec![BatchEmbeddingRequest {
                custom_id: "c1".into(),
                text: "hello".into(),
            }])
            .await
            .unwrap();
        match api.poll(&job).await.unwrap() {
            BatchJobState::Completed(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].custom_id, "c1");
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(provider.batch_jobs(), 1);
    }
}
