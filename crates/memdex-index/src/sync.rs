// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sync orchestration.
//!
//! Every write to an index goes through one worker task that owns the
//! command queue, so at most one sync body (or ad-hoc write) runs at a time.
//! Sync requests that arrive while a sync is running join it and receive the
//! same outcome.
//!
//! A sync is either incremental (hash-compare each source against the live
//! store) or a full reindex into a temporary store that is swapped over the
//! live file once complete. A full reindex runs when forced, when the store
//! has no metadata, or when the provider/model/chunking fingerprint changed.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use memdex_core::{
    IndexContentOutcome, IndexContentRequest, MemdexError, ProgressCallback, SOURCE_MEMORY,
    SOURCE_SESSIONS, SyncProgress, SyncReport,
};
use memdex_storage::{Database, begin_swap, remove_index_files, temp_path_for};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingOrchestrator;
use crate::engine::IndexEngine;
use crate::indexer::{DocumentInput, IndexTarget, index_document};
use crate::metrics::{record_sync, record_sync_failure};
use crate::sources::{SourceDocument, read_document};
use crate::store::{AdHocDocument, IndexStore, Scope};
use crate::types::{IndexMeta, hash_text};

const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, MemdexError>>;

/// Parameters of one sync run.
#[derive(Clone)]
pub(crate) struct SyncRequest {
    pub reason: String,
    pub force: bool,
    pub progress: Option<ProgressCallback>,
}

impl SyncRequest {
    pub fn new(reason: impl Into<String>, force: bool) -> Self {
        Self {
            reason: reason.into(),
            force,
            progress: None,
        }
    }
}

pub(crate) enum SyncCommand {
    /// `reply` is `None` for fire-and-forget triggers.
    Sync {
        request: SyncRequest,
        reply: Option<Reply<SyncReport>>,
    },
    IndexContent {
        request: IndexContentRequest,
        reply: Reply<IndexContentOutcome>,
    },
    RemoveContent {
        scope: Scope,
        reply: Reply<bool>,
    },
}

/// Starts the worker that executes commands against `engine` one at a time.
pub(crate) fn spawn_sync_worker(
    engine: Arc<IndexEngine>,
    cancel: CancellationToken,
) -> (mpsc::Sender<SyncCommand>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let handle = tokio::spawn(run_worker(engine, rx, cancel));
    (tx, handle)
}

async fn run_worker(
    engine: Arc<IndexEngine>,
    mut rx: mpsc::Receiver<SyncCommand>,
    cancel: CancellationToken,
) {
    let mut backlog: VecDeque<SyncCommand> = VecDeque::new();
    loop {
        let command = match backlog.pop_front() {
            Some(command) => command,
            None => tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            },
        };
        if cancel.is_cancelled() {
            break;
        }

        match command {
            SyncCommand::Sync { request, reply } => {
                let result = engine.run_sync(&request).await;

                // Requests queued meanwhile join this run, unless they asked
                // for a full reindex this run did not do.
                let mut joined = Vec::new();
                while let Ok(next) = rx.try_recv() {
                    match next {
                        SyncCommand::Sync { request: other, reply } if !other.force || request.force => {
                            // The run listed its sources before this arrived.
                            // Whatever raised it also set the dirty flag, which
                            // queues the follow-up run below.
                            debug!(reason = %other.reason, "sync request joined a finished run");
                            joined.push(reply);
                        }
                        other => backlog.push_back(other),
                    }
                }
                if !joined.is_empty() {
                    debug!(joined = joined.len(), "coalesced sync requests");
                    if result.is_ok() && engine.is_dirty() {
                        debug!("sources changed during the run, queueing a follow-up sync");
                        backlog.push_back(SyncCommand::Sync {
                            request: SyncRequest::new("follow-up", false),
                            reply: None,
                        });
                    }
                }
                for waiter in joined.into_iter().flatten() {
                    let _ = waiter.send(relay(&result));
                }
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(reason = %request.reason, error = %e, "background sync failed");
                        }
                    }
                }
            }
            SyncCommand::IndexContent { request, reply } => {
                let _ = reply.send(engine.index_content(request).await);
            }
            SyncCommand::RemoveContent { scope, reply } => {
                let _ = reply.send(engine.remove_content(scope).await);
            }
        }
    }
    debug!("sync worker stopped");
}

/// Copies a sync outcome for a caller that joined the run.
fn relay(result: &Result<SyncReport, MemdexError>) -> Result<SyncReport, MemdexError> {
    match result {
        Ok(report) => Ok(report.clone()),
        Err(MemdexError::Sync(message)) => Err(MemdexError::Sync(message.clone())),
        Err(e) => Err(MemdexError::Sync(e.to_string())),
    }
}

/// One unit of sync work.
enum SyncItem {
    Source {
        doc: SourceDocument,
        /// Hash currently stored for the document, if any.
        known_hash: Option<String>,
    },
    AdHoc(AdHocDocument),
}

struct ItemOutcome {
    label: String,
    /// `None` when the document was unchanged.
    chunks: Option<usize>,
    /// Session transcript and the size it was read at.
    session: Option<(PathBuf, u64)>,
}

impl IndexEngine {
    /// Runs one sync, switching to the fallback provider (and retrying as a
    /// full reindex) if embedding fails.
    pub(crate) async fn run_sync(&self, request: &SyncRequest) -> Result<SyncReport, MemdexError> {
        self.ensure_open()?;
        self.recover_store().await?;
        let started = Instant::now();
        self.take_dirty();

        let mut result = self.sync_once(request, request.force).await;
        if let Err(e) = &result
            && e.is_embedding_error()
            && self.activate_fallback(e).await
        {
            result = self.sync_once(request, true).await;
        }

        match &result {
            Ok(report) => {
                let kind = if report.full_reindex { "full" } else { "incremental" };
                record_sync(kind, started.elapsed().as_secs_f64());
                info!(
                    reason = %report.reason,
                    kind,
                    indexed = report.files_indexed,
                    skipped = report.files_skipped,
                    removed = report.files_removed,
                    chunks = report.chunks_written,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "memory index synced"
                );
                if let Err(e) = self.l1.enqueue_pending().await {
                    warn!(error = %e, "failed to queue l1 overviews");
                }
            }
            Err(e) => {
                record_sync_failure();
                self.mark_dirty();
                warn!(reason = %request.reason, error = %e, "memory index sync failed");
            }
        }
        result
    }

    async fn sync_once(&self, request: &SyncRequest, force: bool) -> Result<SyncReport, MemdexError> {
        let store = self.store.load_full();
        let meta = store.read_meta().await?;
        let expected = self.expected_meta().await;

        let needs_full = match &meta {
            _ if force => true,
            None => true,
            Some(meta) if !meta.same_settings(&expected) => {
                info!(
                    indexed_model = %meta.model,
                    model = %expected.model,
                    "index fingerprint changed, rebuilding"
                );
                true
            }
            Some(meta) => {
                meta.vector_dims.is_none()
                    && self.vector.is_available().await
                    && store.chunk_count(None).await? > 0
            }
        };

        match meta {
            Some(meta) if !needs_full => self.incremental_sync(request, &store, meta).await,
            _ => self.full_reindex(request, &store).await,
        }
    }

    async fn incremental_sync(
        &self,
        request: &SyncRequest,
        store: &IndexStore,
        meta: IndexMeta,
    ) -> Result<SyncReport, MemdexError> {
        let mut report = SyncReport {
            reason: request.reason.clone(),
            ..SyncReport::default()
        };
        let embedder = self.embedder.load_full();
        let known = store.list_files().await?;
        let listed = self.layout.list_all().await?;
        let ad_hoc = store.list_ad_hoc().await?;
        let dirty_sessions: HashSet<PathBuf> = self.delta.dirty_paths().await.into_iter().collect();

        let mut live_scopes: HashSet<Scope> = HashSet::new();
        let mut items = Vec::new();
        for doc in listed {
            let scope = Scope::new(doc.path.clone(), doc.source.clone());
            let known_hash = known.get(&scope).cloned();
            live_scopes.insert(scope);
            // Transcripts are re-read only once their growth crossed a threshold.
            if doc.source == SOURCE_SESSIONS
                && known_hash.is_some()
                && !dirty_sessions.contains(&doc.abs_path)
            {
                report.files_skipped += 1;
                continue;
            }
            items.push(SyncItem::Source { doc, known_hash });
        }
        for doc in ad_hoc {
            let scope = Scope::new(doc.path.clone(), doc.source.clone());
            let unchanged = known.get(&scope) == Some(&doc.hash);
            live_scopes.insert(scope);
            if unchanged {
                report.files_skipped += 1;
            } else {
                items.push(SyncItem::AdHoc(doc));
            }
        }

        let target = self.target(store, &embedder).await;
        let sessions = self
            .index_items(&target, items, request.progress.as_ref(), &mut report)
            .await?;

        let caps = self.write_caps().await;
        for scope in known.keys().filter(|scope| !live_scopes.contains(*scope)) {
            debug!(path = %scope.path, source = %scope.source, "removing stale document");
            store.delete_document(scope, caps).await?;
            report.files_removed += 1;
        }

        if self.vector.is_available().await {
            let dims = self.vector.dims().await;
            if dims.is_some() && dims != meta.vector_dims {
                store
                    .write_meta(&IndexMeta {
                        vector_dims: dims,
                        ..meta
                    })
                    .await?;
            }
        }

        for (path, size) in sessions {
            self.delta.mark_indexed(&path, size).await;
        }
        Ok(report)
    }

    /// Rebuilds every source into a fresh store and swaps it over the live
    /// one. The live store is untouched until the rebuild succeeded.
    async fn full_reindex(&self, request: &SyncRequest, live: &IndexStore) -> Result<SyncReport, MemdexError> {
        let temp_path = temp_path_for(&self.db_path);
        info!(
            reason = %request.reason,
            temp = %temp_path.display(),
            "starting full reindex"
        );
        let temp = IndexStore::new(Database::open(&temp_path).await?);
        let built = self.build_store(request, live, &temp).await;
        if let Err(e) = temp.db().close().await {
            warn!(error = %e, "failed to close temporary index store");
        }

        let (mut report, sessions) = match built {
            Ok(built) => built,
            Err(e) => {
                discard(&temp_path);
                if let Err(restore) = self.vector.refresh_dims(live.db()).await {
                    warn!(error = %restore, "failed to re-read vector dimensions");
                }
                return Err(e);
            }
        };

        self.swap_store(&temp_path).await?;
        self.delta.reset().await;
        for (path, size) in sessions {
            self.delta.mark_indexed(&path, size).await;
        }
        report.full_reindex = true;
        Ok(report)
    }

    async fn build_store(
        &self,
        request: &SyncRequest,
        live: &IndexStore,
        temp: &IndexStore,
    ) -> Result<(SyncReport, Vec<(PathBuf, u64)>), MemdexError> {
        self.vector.prepare(temp.db()).await;
        self.keyword.prepare(temp.db()).await;

        let embedder: Arc<EmbeddingOrchestrator> = self.embedder.load_full();
        if embedder.cache().enabled() {
            match embedder.cache().seed(live.db(), temp.db()).await {
                Ok(seeded) => debug!(seeded, "embedding cache carried over"),
                Err(e) => warn!(error = %e, "failed to carry over embedding cache"),
            }
        }
        live.copy_ad_hoc_to(temp).await?;

        let mut items: Vec<SyncItem> = self
            .layout
            .list_all()
            .await?
            .into_iter()
            .map(|doc| SyncItem::Source {
                doc,
                known_hash: None,
            })
            .collect();
        items.extend(temp.list_ad_hoc().await?.into_iter().map(SyncItem::AdHoc));

        let mut report = SyncReport {
            reason: request.reason.clone(),
            ..SyncReport::default()
        };
        let target = self.target(temp, &embedder).await;
        let sessions = self
            .index_items(&target, items, request.progress.as_ref(), &mut report)
            .await?;

        let mut meta = self.expected_meta().await;
        meta.vector_dims = self.vector.refresh_dims(temp.db()).await?;
        temp.write_meta(&meta).await?;

        if let Some(max_entries) = self.config.cache.max_entries {
            let pruned = embedder.cache().prune(temp.db(), max_entries).await?;
            if pruned > 0 {
                debug!(pruned, max_entries, "embedding cache pruned");
            }
        }
        Ok((report, sessions))
    }

    /// Replaces the live store file with `temp_path` and reopens it.
    ///
    /// The replaced file is kept until the new one opens; if it does not, the
    /// old file is put back and reopened. A closed store is never published:
    /// when nothing can be reopened the engine is marked for recovery and the
    /// next call reopens the file.
    pub(crate) async fn swap_store(&self, temp_path: &Path) -> Result<(), MemdexError> {
        let _guard = self.swap_lock.write().await;
        let live = self.store.load_full();
        if let Err(e) = live.db().close().await {
            discard(temp_path);
            return Err(e);
        }

        let pending = match begin_swap(&self.db_path, temp_path) {
            Ok(pending) => pending,
            Err(e) => {
                discard(temp_path);
                self.reopen_live().await;
                return Err(e);
            }
        };
        match self.open_store().await {
            Ok(store) => {
                self.store.store(store);
                if let Err(e) = pending.commit() {
                    warn!(error = %e, "failed to remove the replaced index store");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "swapped-in index store failed to open, restoring the previous one");
                match pending.rollback() {
                    Ok(()) => self.reopen_live().await,
                    Err(restore) => {
                        warn!(error = %restore, "failed to restore the previous index store");
                        self.mark_store_lost();
                    }
                }
                Err(e)
            }
        }
    }

    /// Reopens the store at the live path after a failed swap.
    async fn reopen_live(&self) {
        match self.open_store().await {
            Ok(store) => self.store.store(store),
            Err(e) => {
                warn!(error = %e, "failed to reopen the live index store");
                self.mark_store_lost();
            }
        }
    }

    /// Indexes `items` on a bounded worker pool, tallying into `report`.
    /// Returns the session transcripts that were read.
    async fn index_items(
        &self,
        target: &IndexTarget<'_>,
        items: Vec<SyncItem>,
        progress: Option<&ProgressCallback>,
        report: &mut SyncReport,
    ) -> Result<Vec<(PathBuf, u64)>, MemdexError> {
        let total = items.len();
        let concurrency = self.concurrency(target.embedder).await;
        if let Some(progress) = progress {
            progress(SyncProgress {
                completed: 0,
                total,
                label: None,
            });
        }

        let mut sessions = Vec::new();
        let mut completed = 0;
        let mut outcomes = stream::iter(items)
            .map(|item| self.sync_item(target, item))
            .buffer_unordered(concurrency);
        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            completed += 1;
            match outcome.chunks {
                Some(chunks) => {
                    report.files_indexed += 1;
                    report.chunks_written += chunks;
                }
                None => report.files_skipped += 1,
            }
            if let Some(session) = outcome.session {
                sessions.push(session);
            }
            if let Some(progress) = progress {
                progress(SyncProgress {
                    completed,
                    total,
                    label: Some(outcome.label),
                });
            }
        }
        Ok(sessions)
    }

    async fn sync_item(&self, target: &IndexTarget<'_>, item: SyncItem) -> Result<ItemOutcome, MemdexError> {
        match item {
            SyncItem::Source { doc, known_hash } => {
                let session = (doc.source == SOURCE_SESSIONS)
                    .then(|| (doc.abs_path.clone(), doc.size.max(0) as u64));
                let text = match read_document(&doc).await {
                    Ok(text) => text,
                    Err(MemdexError::Io { source, .. })
                        if source.kind() == std::io::ErrorKind::NotFound =>
                    {
                        debug!(path = %doc.path, "source vanished during sync");
                        return Ok(ItemOutcome {
                            label: doc.path,
                            chunks: None,
                            session: None,
                        });
                    }
                    Err(e) => return Err(e),
                };
                let hash = hash_text(&text);
                if known_hash.as_deref() == Some(hash.as_str()) {
                    return Ok(ItemOutcome {
                        label: doc.path,
                        chunks: None,
                        session,
                    });
                }
                let label = doc.path.clone();
                let chunks = index_document(
                    target,
                    DocumentInput {
                        path: doc.path,
                        source: doc.source,
                        text,
                        hash,
                        mtime: doc.mtime,
                        size: doc.size,
                    },
                )
                .await?;
                Ok(ItemOutcome {
                    label,
                    chunks: Some(chunks),
                    session,
                })
            }
            SyncItem::AdHoc(doc) => {
                let label = doc.path.clone();
                let input = DocumentInput {
                    hash: doc.hash,
                    mtime: doc.updated_at,
                    ..DocumentInput::from_text(doc.path, doc.source, doc.text)
                };
                let chunks = index_document(target, input).await?;
                Ok(ItemOutcome {
                    label,
                    chunks: Some(chunks),
                    session: None,
                })
            }
        }
    }

    /// Stores and indexes one caller-supplied document. Unchanged content is
    /// skipped unless `force` is set.
    pub(crate) async fn index_content(
        &self,
        request: IndexContentRequest,
    ) -> Result<IndexContentOutcome, MemdexError> {
        self.ensure_open()?;
        let path = request.path.trim().trim_start_matches("./");
        if path.is_empty() {
            return Err(MemdexError::Config("index_content: path is empty".into()));
        }
        let source = request.source.unwrap_or_else(|| SOURCE_MEMORY.to_string());
        let scope = Scope::new(path, source);
        let hash = hash_text(&request.text);

        self.recover_store().await?;
        let store = self.store.load_full();
        if !request.force && store.file_hash(&scope).await?.as_deref() == Some(hash.as_str()) {
            debug!(path = %scope.path, "content unchanged, skipping");
            return Ok(IndexContentOutcome {
                chunks_indexed: 0,
                skipped: true,
            });
        }

        store
            .upsert_ad_hoc(AdHocDocument::new(&scope, hash, request.text.clone()))
            .await?;
        let embedder = self.embedder.load_full();
        let target = self.target(&store, &embedder).await;
        let doc = DocumentInput::from_text(scope.path.clone(), scope.source.clone(), request.text);
        let chunks = match index_document(&target, doc).await {
            Ok(chunks) => chunks,
            Err(e) => {
                if !e.is_embedding_error() || !self.activate_fallback(&e).await {
                    return Err(e);
                }
                // The stored document is rebuilt with everything else.
                self.run_sync(&SyncRequest::new("provider-fallback", true)).await?;
                self.store.load_full().document_chunk_count(&scope).await?
            }
        };

        if let Err(e) = self.l1.enqueue_pending().await {
            warn!(error = %e, "failed to queue l1 overviews");
        }
        Ok(IndexContentOutcome {
            chunks_indexed: chunks,
            skipped: false,
        })
    }

    /// Deletes an ad-hoc document and its rows. Returns false if there was
    /// no such document.
    pub(crate) async fn remove_content(&self, scope: Scope) -> Result<bool, MemdexError> {
        self.ensure_open()?;
        self.recover_store().await?;
        let store = self.store.load_full();
        let removed = store.remove_ad_hoc(&scope).await?;
        if removed {
            store.delete_document(&scope, self.write_caps().await).await?;
            debug!(path = %scope.path, source = %scope.source, "ad-hoc document removed");
        }
        Ok(removed)
    }
}

fn discard(path: &Path) {
    if let Err(e) = remove_index_files(path) {
        warn!(path = %path.display(), error = %e, "failed to remove temporary index store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_copies_reports_and_stringifies_errors() {
        let report = SyncReport {
            reason: "watch".into(),
            files_indexed: 2,
            ..SyncReport::default()
        };
        assert_eq!(relay(&Ok(report.clone())).unwrap(), report);

        let err = relay(&Err(MemdexError::Embedding {
            message: "quota".into(),
        }))
        .unwrap_err();
        assert!(matches!(&err, MemdexError::Sync(m) if m.contains("quota")));
        assert!(err.is_embedding_error());
    }

    #[test]
    fn relay_keeps_sync_messages_as_is() {
        let err = relay(&Err(MemdexError::Sync("disk full".into()))).unwrap_err();
        assert_eq!(err.to_string(), "sync failed: disk full");
    }

    mod swap {
        use arc_swap::ArcSwap;
        use memdex_core::SearchOptions;
        use memdex_test_utils::{MockEmbeddingProvider, TempWorkspace};

        use super::*;
        use crate::keyword::KeywordIndex;
        use crate::l1::L1Generator;
        use crate::sources::SourceLayout;
        use crate::vector::VectorIndex;

        async fn engine(ws: &TempWorkspace) -> IndexEngine {
            let config = ws.config();
            let db_path = config.store.resolved_path();
            let layout = SourceLayout::new(&config.store.workspace_dir, config.sources.clone());
            let vector = VectorIndex::new(&config.vector);
            let keyword = KeywordIndex::new(config.keyword.enabled);
            let db = Database::open(&db_path).await.unwrap();
            keyword.prepare(&db).await;
            let store = Arc::new(ArcSwap::from_pointee(IndexStore::new(db)));
            let l1 = L1Generator::new(config.l1.clone(), None, Arc::clone(&store), CancellationToken::new());
            let embedder = EmbeddingOrchestrator::new(
                Arc::new(MockEmbeddingProvider::new()),
                config.cache.enabled,
                config.embedding.clone(),
                config.batch.clone(),
            );
            IndexEngine::new(config, layout, db_path, store, embedder, None, vector, keyword, l1)
        }

        async fn top_path(engine: &IndexEngine, query: &str) -> String {
            engine
                .search(query, &SearchOptions::default())
                .await
                .unwrap()
                .remove(0)
                .path
        }

        fn swap_leftovers(engine: &IndexEngine) -> usize {
            std::fs::read_dir(engine.db_path.parent().unwrap())
                .unwrap()
                .filter(|entry| {
                    let name = entry.as_ref().unwrap().file_name().to_string_lossy().into_owned();
                    name.contains(".tmp-") || name.contains(".backup-")
                })
                .count()
        }

        #[tokio::test]
        async fn unreadable_replacement_restores_the_previous_store() {
            let ws = TempWorkspace::new();
            ws.write("memory/shipping.md", "# Shipping\n\nOrders leave the Berlin warehouse daily.\n");
            let engine = engine(&ws).await;
            engine.run_sync(&SyncRequest::new("first", false)).await.unwrap();
            let chunks = engine.store.load_full().counts().await.unwrap().chunks;
            assert!(chunks > 0);

            let temp = temp_path_for(&engine.db_path);
            std::fs::write(&temp, vec![b'x'; 4096]).unwrap();
            assert!(engine.swap_store(&temp).await.is_err());

            assert_eq!(engine.store.load_full().counts().await.unwrap().chunks, chunks);
            assert_eq!(top_path(&engine, "Berlin warehouse").await, "memory/shipping.md");
            assert_eq!(swap_leftovers(&engine), 0);
        }

        #[tokio::test]
        async fn lost_store_is_reopened_on_next_use() {
            let ws = TempWorkspace::new();
            ws.write("memory/shipping.md", "# Shipping\n\nOrders leave the Berlin warehouse daily.\n");
            let engine = engine(&ws).await;
            engine.run_sync(&SyncRequest::new("first", false)).await.unwrap();

            engine.store.load_full().db().close().await.unwrap();
            engine.mark_store_lost();
            assert_eq!(top_path(&engine, "Berlin warehouse").await, "memory/shipping.md");
            let report = engine.run_sync(&SyncRequest::new("after", false)).await.unwrap();
            assert_eq!(report.files_skipped, 1);
        }

        #[tokio::test]
        async fn change_during_a_run_is_picked_up_by_a_follow_up() {
            let ws = TempWorkspace::new();
            ws.write("memory/shipping.md", "# Shipping\n\nOrders leave the Berlin warehouse daily.\n");
            let engine = Arc::new(engine(&ws).await);
            let (tx, handle) = spawn_sync_worker(Arc::clone(&engine), CancellationToken::new());

            // On the run's first progress report its sources are already
            // listed: add a file, flag it, and queue a request that joins.
            let (joined_tx, joined_rx) = oneshot::channel();
            let joined_tx = std::sync::Mutex::new(Some(joined_tx));
            let late = ws.path().join("memory/late.md");
            let progress: ProgressCallback = {
                let engine = Arc::clone(&engine);
                let tx = tx.clone();
                Arc::new(move |update: SyncProgress| {
                    let Some(reply) = joined_tx.lock().unwrap().take() else {
                        return;
                    };
                    assert_eq!(update.completed, 0);
                    std::fs::write(&late, "# Late\n\nThe Lisbon office opens in May.\n").unwrap();
                    engine.mark_dirty();
                    tx.try_send(SyncCommand::Sync {
                        request: SyncRequest::new("watch", false),
                        reply: Some(reply),
                    })
                    .unwrap();
                })
            };

            let (first_tx, first_rx) = oneshot::channel();
            let mut request = SyncRequest::new("first", false);
            request.progress = Some(progress);
            tx.send(SyncCommand::Sync {
                request,
                reply: Some(first_tx),
            })
            .await
            .unwrap();
            assert_eq!(first_rx.await.unwrap().unwrap().files_indexed, 1);
            assert_eq!(joined_rx.await.unwrap().unwrap().files_indexed, 1);

            // Nothing else is queued, so only the follow-up can index it.
            let mut files = 0;
            for _ in 0..100 {
                files = engine.store.load_full().counts().await.unwrap().files;
                if files == 2 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            assert_eq!(files, 2);

            drop(tx);
            handle.await.unwrap();
        }
    }
}
