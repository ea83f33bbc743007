// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-native batch embedding: submit a job, poll it, map results back
//! by `custom_id`, and give up on the batch API after repeated failures.

use std::collections::HashMap;
use std::time::Duration;

use memdex_core::{
    BatchEmbeddingApi, BatchEmbeddingRequest, BatchJobState, BatchStats, MemdexError,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Submits `requests` and waits for the job to finish.
///
/// Returns the embeddings that came back, keyed by `custom_id`. Lines the
/// provider rejected are missing from the map; the caller embeds them
/// through the regular path.
pub async fn run_batch_job(
    api: &dyn BatchEmbeddingApi,
    requests: Vec<BatchEmbeddingRequest>,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<HashMap<String, Vec<f32>>, MemdexError> {
    let submitted = requests.len();
    let job_id = api.submit(requests).await?;
    debug!(job_id = %job_id, submitted, "embedding batch job submitted");

    let results = tokio::time::timeout(timeout, async {
        loop {
            match api.poll(&job_id).await? {
                BatchJobState::Pending => tokio::time::sleep(poll_interval).await,
                BatchJobState::Completed(results) => return Ok(results),
                BatchJobState::Failed(reason) => {
                    return Err(MemdexError::provider(format!(
                        "embedding batch job {job_id} failed: {reason}"
                    )));
                }
            }
        }
    })
    .await
    .map_err(|_| MemdexError::Timeout {
        operation: format!("embedding batch job {job_id}"),
        duration: timeout,
    })??;

    let mut embeddings = HashMap::with_capacity(results.len());
    let mut rejected = 0usize;
    for line in results {
        match (line.embedding, line.error) {
            (Some(embedding), None) => {
                embeddings.insert(line.custom_id, embedding);
            }
            (_, error) => {
                rejected += 1;
                debug!(custom_id = %line.custom_id, error = ?error, "batch line rejected");
            }
        }
    }

    if embeddings.is_empty() && submitted > 0 {
        return Err(MemdexError::provider(format!(
            "embedding batch job {job_id} returned no embeddings"
        )));
    }
    if rejected > 0 {
        warn!(job_id = %job_id, rejected, "embedding batch job returned errors for some lines");
    }
    Ok(embeddings)
}

#[derive(Debug, Default)]
struct FailureState {
    failures: usize,
    last_error: Option<String>,
    disabled: bool,
}

/// Tracks batch-API failures for the lifetime of the process.
///
/// Once `limit` consecutive failures are recorded, the batch API is never
/// used again.
#[derive(Debug)]
pub struct BatchFailureTracker {
    enabled: bool,
    limit: usize,
    state: Mutex<FailureState>,
}

impl BatchFailureTracker {
    pub fn new(enabled: bool, limit: usize) -> Self {
        Self {
            enabled,
            limit: limit.max(1),
            state: Mutex::new(FailureState::default()),
        }
    }

    /// True while batch submission is configured and not yet abandoned.
    pub async fn is_active(&self) -> bool {
        self.enabled && !self.state.lock().await.disabled
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.failures = 0;
    }

    /// Records a failure; returns true if this failure disabled batching.
    pub async fn record_failure(&self, error: &MemdexError) -> bool {
        let mut state = self.state.lock().await;
        state.failures += 1;
        state.last_error = Some(error.to_string());
        if !state.disabled && state.failures >= self.limit {
            state.disabled = true;
            info!(
                failures = state.failures,
                limit = self.limit,
                "embedding batch API disabled after repeated failures"
            );
            return true;
        }
        false
    }

    pub async fn stats(&self) -> BatchStats {
        let state = self.state.lock().await;
        BatchStats {
            enabled: self.enabled && !state.disabled,
            failures: state.failures,
            limit: self.limit,
            last_error: state.last_error.clone(),
        }
    }
}
