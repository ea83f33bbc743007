// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `MemoryIndexManager`: the public face of one per-agent index.
//!
//! Owns the store, the sync worker and every background trigger (file
//! watcher, interval sync, session-delta debounce, L1 drain). Reads go
//! straight to the live store; writes are queued to the sync worker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use memdex_config::{render_report, summarize, validate_config, MemdexConfig};
use memdex_core::{
    CacheStats, EmbeddingProvider, IndexContentOutcome, IndexContentRequest, IndexStatus,
    LlmInvoker, MemdexError, ProgressCallback, SearchOptions, SearchResult, SyncReport,
};
use memdex_storage::Database;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingOrchestrator;
use crate::engine::IndexEngine;
use crate::keyword::KeywordIndex;
use crate::l1::L1Generator;
use crate::metrics::register_metrics;
use crate::sources::SourceLayout;
use crate::store::{IndexStore, Scope};
use crate::sync::{spawn_sync_worker, SyncCommand, SyncRequest};
use crate::vector::VectorIndex;
use crate::watcher::SourceWatcher;

/// A window of lines read back from a memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExcerpt {
    /// Logical path as passed in.
    pub path: String,
    /// 1-based first line of `text`.
    pub from_line: usize,
    pub text: String,
}

/// Cheap, cloneable handle that queues work on the sync worker.
#[derive(Clone)]
struct SyncQueue {
    commands: mpsc::Sender<SyncCommand>,
}

impl SyncQueue {
    /// Queues a background sync without waiting for it.
    fn request(&self, reason: &str) {
        let command = SyncCommand::Sync {
            request: SyncRequest::new(reason, false),
            reply: None,
        };
        match self.commands.try_send(command) {
            Ok(()) => debug!(reason, "sync requested"),
            // A full queue already holds a sync that will cover this one.
            Err(mpsc::error::TrySendError::Full(_)) => debug!(reason, "sync queue full, request dropped"),
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, MemdexError>>) -> SyncCommand,
    ) -> Result<T, MemdexError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| MemdexError::Closed)?;
        rx.await.map_err(|_| MemdexError::Closed)?
    }
}

/// A per-agent hybrid memory index.
pub struct MemoryIndexManager {
    engine: Arc<IndexEngine>,
    queue: SyncQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
    session_updates: mpsc::UnboundedSender<PathBuf>,
    watcher: Mutex<Option<SourceWatcher>>,
    warmed_sessions: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl MemoryIndexManager {
    /// Opens (or creates) the index described by `config`.
    ///
    /// `fallback` is switched to, once, if `provider` fails during a sync.
    /// `llm` is only used when `l1.use_llm` is set.
    pub async fn open(
        config: MemdexConfig,
        provider: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmInvoker>>,
    ) -> Result<Arc<Self>, MemdexError> {
        if let Err(errors) = validate_config(&config) {
            warn!(
                agent = %config.store.agent_id,
                "memory index configuration rejected\n{}",
                render_report(&errors)
            );
            return Err(MemdexError::Config(summarize(&errors)));
        }
        register_metrics();

        let db_path = config.store.resolved_path();
        let layout = SourceLayout::new(&config.store.workspace_dir, config.sources.clone());
        // Registers the static extension before the first connection opens.
        let vector = VectorIndex::new(&config.vector);
        let keyword = KeywordIndex::new(config.keyword.enabled);

        let db = Database::open(&db_path).await?;
        vector.prepare(&db).await;
        keyword.prepare(&db).await;
        let store = Arc::new(ArcSwap::from_pointee(IndexStore::new(db)));

        let cancel = CancellationToken::new();
        let l1 = L1Generator::new(config.l1.clone(), llm, Arc::clone(&store), cancel.child_token());
        let embedder = EmbeddingOrchestrator::new(
            provider,
            config.cache.enabled,
            config.embedding.clone(),
            config.batch.clone(),
        );
        info!(
            agent = %config.store.agent_id,
            db = %db_path.display(),
            provider = %embedder.provider_id(),
            model = %embedder.model(),
            "opening memory index"
        );
        let engine = Arc::new(IndexEngine::new(
            config, layout, db_path, store, embedder, fallback, vector, keyword, l1,
        ));

        let (commands, worker) = spawn_sync_worker(Arc::clone(&engine), cancel.child_token());
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            engine,
            queue: SyncQueue { commands },
            worker: Mutex::new(Some(worker)),
            session_updates: session_tx,
            watcher: Mutex::new(None),
            warmed_sessions: Mutex::new(HashSet::new()),
            cancel,
        });

        manager.spawn_session_debounce(session_rx);
        let sync = &manager.engine.config.sync;
        if sync.watch {
            manager.start_watcher().await;
        }
        if sync.interval_minutes > 0 {
            manager.spawn_interval_sync(Duration::from_secs(sync.interval_minutes * 60));
        }
        Ok(manager)
    }

    /// Runs a sync now and waits for it. Joins a sync already in flight.
    pub async fn sync(
        &self,
        reason: &str,
        force: bool,
        progress: Option<ProgressCallback>,
    ) -> Result<SyncReport, MemdexError> {
        self.engine.ensure_open()?;
        let request = SyncRequest {
            reason: reason.to_string(),
            force,
            progress,
        };
        self.queue
            .call(|reply| SyncCommand::Sync {
                request,
                reply: Some(reply),
            })
            .await
    }

    /// Searches the index. A dirty index triggers a background sync first
    /// (when `sync.on_search` is set) without delaying this query.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>, MemdexError> {
        self.engine.ensure_open()?;
        if let Some(key) = &options.session_key {
            self.warm_session(key).await?;
        }
        if self.engine.config.sync.on_search && self.engine.is_dirty() {
            self.queue.request("search");
        }
        self.engine.search(query, &options).await
    }

    /// Indexes a caller-supplied document outside the filesystem sources.
    pub async fn index_content(&self, request: IndexContentRequest) -> Result<IndexContentOutcome, MemdexError> {
        self.engine.ensure_open()?;
        self.queue
            .call(|reply| SyncCommand::IndexContent { request, reply })
            .await
    }

    /// Removes a document added with [`Self::index_content`]. Returns false
    /// if there was none at `path` in `source`.
    pub async fn remove_content(&self, path: &str, source: &str) -> Result<bool, MemdexError> {
        self.engine.ensure_open()?;
        let scope = Scope::new(path.trim().trim_start_matches("./"), source);
        self.queue
            .call(|reply| SyncCommand::RemoveContent { scope, reply })
            .await
    }

    pub async fn status(&self) -> Result<IndexStatus, MemdexError> {
        self.engine.ensure_open()?;
        let engine = &self.engine;
        engine.recover_store().await?;
        let guard = engine.swap_lock.read().await;
        let store = engine.store.load_full();
        let counts = store.counts().await?;
        let embedder = engine.embedder.load_full();
        let cache_entries = if embedder.cache().enabled() {
            embedder.cache().count(store.db()).await?
        } else {
            0
        };
        drop(guard);

        let fallback = engine.fallback_state.lock().await.clone();
        Ok(IndexStatus {
            files: counts.files,
            chunks: counts.chunks,
            sources: counts.sources,
            dirty: engine.is_dirty(),
            workspace_dir: engine.layout.workspace().to_path_buf(),
            db_path: engine.db_path.clone(),
            provider: embedder.provider_id().to_string(),
            model: embedder.model().to_string(),
            provider_key: embedder.provider_key(),
            fallback_from: fallback.as_ref().map(|f| f.from.clone()),
            fallback_reason: fallback.map(|f| f.reason),
            vector: engine.vector.status().await,
            fts: engine.keyword.status().await,
            cache: CacheStats {
                enabled: embedder.cache().enabled(),
                entries: cache_entries,
                max_entries: engine.config.cache.max_entries,
            },
            batch: embedder.batch_stats().await,
            l1_queue: engine.l1.queue_depth().await,
        })
    }

    /// Reads lines of a memory file. `from_line` is 1-based; `lines` of
    /// `None` reads to the end.
    pub async fn read_file(
        &self,
        rel_path: &str,
        from_line: Option<usize>,
        lines: Option<usize>,
    ) -> Result<FileExcerpt, MemdexError> {
        self.engine.ensure_open()?;
        let abs = self.engine.layout.resolve_memory_path(rel_path)?;
        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|e| MemdexError::io(&abs, e))?;
        let from_line = from_line.unwrap_or(1).max(1);
        let window = content.lines().skip(from_line - 1);
        let text = match lines {
            Some(n) => window.take(n).collect::<Vec<_>>().join("\n"),
            None => window.collect::<Vec<_>>().join("\n"),
        };
        Ok(FileExcerpt {
            path: rel_path.to_string(),
            from_line,
            text,
        })
    }

    /// Requests a sync the first time a session is seen, if enabled.
    pub async fn warm_session(&self, session_key: &str) -> Result<(), MemdexError> {
        self.engine.ensure_open()?;
        if !self.engine.config.sync.on_session_start {
            return Ok(());
        }
        if self.warmed_sessions.lock().await.insert(session_key.to_string()) {
            debug!(session = session_key, "warming session");
            self.queue.request("session-start");
        }
        Ok(())
    }

    /// Reports that a session transcript was appended to. Updates are
    /// debounced and batched into one sync once a file's growth crosses
    /// the delta thresholds.
    pub fn notify_session_update(&self, path: impl AsRef<Path>) -> Result<(), MemdexError> {
        self.engine.ensure_open()?;
        self.session_updates
            .send(path.as_ref().to_path_buf())
            .map_err(|_| MemdexError::Closed)
    }

    /// Stops every background task, waits for the running sync (if any) and
    /// closes the store. Later calls fail with [`MemdexError::Closed`].
    pub async fn close(&self) -> Result<(), MemdexError> {
        if !self.engine.mark_closed() {
            return Ok(());
        }
        self.cancel.cancel();
        self.watcher.lock().await.take();
        self.engine.l1.shutdown();
        if let Some(worker) = self.worker.lock().await.take()
            && let Err(e) = worker.await
        {
            warn!(error = %e, "sync worker ended abnormally");
        }

        let _guard = self.engine.swap_lock.write().await;
        self.engine.store.load_full().db().close().await?;
        info!(db = %self.engine.db_path.display(), "memory index closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    pub fn db_path(&self) -> &Path {
        &self.engine.db_path
    }

    async fn start_watcher(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let debounce = Duration::from_millis(self.engine.config.sync.watch_debounce_ms);
        let watcher = match SourceWatcher::start(self.engine.layout.watch_roots(), debounce, tx) {
            Ok(Some(watcher)) => watcher,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "file watching disabled");
                return;
            }
        };
        debug!(roots = watcher.roots().len(), "memory watcher started");
        *self.watcher.lock().await = Some(watcher);

        let engine = Arc::clone(&self.engine);
        let queue = self.queue.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = rx.recv() => {
                        let Some(changed) = changed else { break };
                        debug!(paths = changed.len(), "memory sources changed");
                        engine.mark_dirty();
                        queue.request("watch");
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    fn spawn_interval_sync(&self, period: Duration) {
        let queue = self.queue.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => queue.request("interval"),
                    _ = cancel.cancelled() => {
                        debug!("interval sync stopped");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_session_debounce(&self, mut rx: mpsc::UnboundedReceiver<PathBuf>) {
        let engine = Arc::clone(&self.engine);
        let queue = self.queue.clone();
        let cancel = self.cancel.child_token();
        let debounce = Duration::from_millis(engine.config.sync.sessions.debounce_ms);
        tokio::spawn(async move {
            loop {
                let first = tokio::select! {
                    path = rx.recv() => match path {
                        Some(path) => path,
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                };
                let mut pending: HashSet<PathBuf> = HashSet::from([first]);
                // Collect until the updates go quiet for one debounce period.
                loop {
                    tokio::select! {
                        path = rx.recv() => match path {
                            Some(path) => {
                                pending.insert(path);
                            }
                            None => break,
                        },
                        _ = tokio::time::sleep(debounce) => break,
                        _ = cancel.cancelled() => return,
                    }
                }

                let mut dirty = 0usize;
                for path in &pending {
                    match engine.delta.observe(path).await {
                        Ok(true) => dirty += 1,
                        Ok(false) => {}
                        Err(e) => warn!(path = %path.display(), error = %e, "failed to read session transcript"),
                    }
                }
                if dirty > 0 {
                    debug!(dirty, observed = pending.len(), "session transcripts crossed delta thresholds");
                    engine.mark_dirty();
                    queue.request("session-delta");
                }
            }
        });
    }
}

impl Drop for MemoryIndexManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
