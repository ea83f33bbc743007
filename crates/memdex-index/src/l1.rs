// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background L1 overview generation.
//!
//! Chunk ids are queued in a bounded FIFO (the oldest id is dropped on
//! overflow). A drain task wakes every `interval_ms`, processes up to
//! `batch_size` ids and exits once the queue is empty; the next enqueue
//! re-arms it. Failures only mark the chunk, they never reach indexing or
//! search.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use memdex_config::model::L1Config;
use memdex_core::{LlmInvoker, MemdexError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{record_l1_generated, set_l1_queue_depth};
use crate::store::{IndexStore, L1Status};
use crate::summary::{l1_heuristic, truncate_chars};

#[derive(Debug, Default)]
struct L1Queue {
    items: VecDeque<String>,
    members: HashSet<String>,
    /// A drain task is scheduled.
    armed: bool,
}

/// Produces L1 overviews for chunks, off the indexing path.
pub struct L1Generator {
    config: L1Config,
    llm: Option<Arc<dyn LlmInvoker>>,
    store: Arc<ArcSwap<IndexStore>>,
    queue: Mutex<L1Queue>,
    last_llm_call: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl L1Generator {
    pub fn new(
        config: L1Config,
        llm: Option<Arc<dyn LlmInvoker>>,
        store: Arc<ArcSwap<IndexStore>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        if config.use_llm && llm.is_none() {
            warn!("l1.use_llm is set but no LLM invoker was provided, using heuristic overviews");
        }
        Arc::new(Self {
            config,
            llm,
            store,
            queue: Mutex::new(L1Queue::default()),
            last_llm_call: Mutex::new(None),
            cancel,
        })
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.items.len()
    }

    /// Queues chunk ids and arms the drain task if it is idle.
    pub async fn enqueue(self: &Arc<Self>, ids: impl IntoIterator<Item = String>) {
        if !self.config.enabled || self.cancel.is_cancelled() {
            return;
        }
        let max_queue = self.config.max_queue.max(1);
        let mut queue = self.queue.lock().await;
        let mut dropped = 0usize;
        for id in ids {
            if !queue.members.insert(id.clone()) {
                continue;
            }
            queue.items.push_back(id);
            while queue.items.len() > max_queue {
                if let Some(oldest) = queue.items.pop_front() {
                    queue.members.remove(&oldest);
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, max_queue, "l1 queue full, dropped oldest jobs");
        }
        set_l1_queue_depth(queue.items.len());
        if !queue.armed && !queue.items.is_empty() {
            queue.armed = true;
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drain_loop().await });
        }
    }

    /// Queues every chunk of the live store still waiting for an overview.
    pub async fn enqueue_pending(self: &Arc<Self>) -> Result<usize, MemdexError> {
        if !self.config.enabled {
            return Ok(0);
        }
        let store = self.store.load_full();
        let pending = store.pending_l1(self.config.max_queue.max(1)).await?;
        let count = pending.len();
        self.enqueue(pending.into_iter().map(|(id, _)| id)).await;
        Ok(count)
    }

    async fn drain_loop(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancel.cancelled() => {
                    debug!("l1 generator shutting down");
                    self.queue.lock().await.armed = false;
                    return;
                }
            }
            if self.drain_batch().await == 0 {
                let mut queue = self.queue.lock().await;
                if queue.items.is_empty() {
                    queue.armed = false;
                    return;
                }
            }
        }
    }

    /// Processes up to `batch_size` queued ids. Returns how many were taken.
    pub async fn drain_batch(&self) -> usize {
        let batch: Vec<String> = {
            let mut queue = self.queue.lock().await;
            let n = self.config.batch_size.max(1).min(queue.items.len());
            let batch: Vec<String> = queue.items.drain(..n).collect();
            for id in &batch {
                queue.members.remove(id);
            }
            set_l1_queue_depth(queue.items.len());
            batch
        };
        for id in &batch {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.process(id).await {
                warn!(chunk = %id, error = %e, "l1 overview failed");
            }
        }
        batch.len()
    }

    async fn process(&self, id: &str) -> Result<(), MemdexError> {
        let store = self.store.load_full();
        let Some(text) = store.chunk_text(id).await? else {
            // Replaced or deleted since it was queued.
            return Ok(());
        };

        if self.config.use_llm
            && let Some(llm) = &self.llm
        {
            return match self.invoke_llm(llm.as_ref(), &text).await {
                Ok(overview) => {
                    store.set_l1(id, Some(overview), L1Status::Done).await?;
                    record_l1_generated("llm");
                    Ok(())
                }
                Err(e) => {
                    store.set_l1(id, None, L1Status::Error).await?;
                    Err(e)
                }
            };
        }

        let overview = l1_heuristic(&text, self.config.max_chars);
        store.set_l1(id, overview, L1Status::Done).await?;
        record_l1_generated("heuristic");
        Ok(())
    }

    /// One LLM call, spaced at least `min_call_interval_ms` from the last.
    async fn invoke_llm(&self, llm: &dyn LlmInvoker, text: &str) -> Result<String, MemdexError> {
        let min_interval = Duration::from_millis(self.config.min_call_interval_ms);
        {
            let mut last = self.last_llm_call.lock().await;
            if let Some(previous) = *last {
                tokio::time::sleep_until(previous + min_interval).await;
            }
            *last = Some(Instant::now());
        }

        let prompt = overview_prompt(text, self.config.max_chars);
        let timeout = Duration::from_secs(self.config.llm_timeout_secs);
        let reply = tokio::time::timeout(timeout, llm.invoke(&prompt))
            .await
            .map_err(|_| MemdexError::Timeout {
                operation: "l1 overview".into(),
                duration: timeout,
            })??;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(MemdexError::provider("l1 overview: empty reply"));
        }
        Ok(truncate_chars(reply, self.config.max_chars))
    }

    /// Stops the drain task after its current item.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("stopping l1 generator");
            self.cancel.cancel();
        }
    }
}

fn overview_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "Write a concise overview of the following memory excerpt in at most {max_chars} \
         characters. Keep names, dates, numbers and decisions. Reply with the overview only.\n\n\
         {text}"
    )
}
