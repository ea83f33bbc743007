// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! State shared by the sync actor, search and the manager facade.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use memdex_config::MemdexConfig;
use memdex_core::{EmbeddingProvider, MemdexError};
use memdex_storage::Database;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::delta::SessionDeltaTracker;
use crate::embedding::EmbeddingOrchestrator;
use crate::indexer::IndexTarget;
use crate::keyword::KeywordIndex;
use crate::l1::L1Generator;
use crate::metrics::record_provider_fallback;
use crate::sources::SourceLayout;
use crate::store::{IndexStore, WriteCaps};
use crate::types::IndexMeta;
use crate::vector::VectorIndex;

/// Why the index runs on its fallback provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FallbackState {
    pub from: String,
    pub reason: String,
}

pub(crate) struct IndexEngine {
    pub config: MemdexConfig,
    pub layout: SourceLayout,
    pub db_path: PathBuf,
    /// Live store; replaced wholesale by a full reindex.
    pub store: Arc<ArcSwap<IndexStore>>,
    pub embedder: ArcSwap<EmbeddingOrchestrator>,
    /// Taken on first use; the switch is one-way.
    fallback: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
    pub fallback_state: Mutex<Option<FallbackState>>,
    pub vector: VectorIndex,
    pub keyword: KeywordIndex,
    pub delta: SessionDeltaTracker,
    pub l1: Arc<L1Generator>,
    /// Held for reading by search, for writing by the store swap.
    pub swap_lock: RwLock<()>,
    dirty: AtomicBool,
    closed: AtomicBool,
    /// Set when a swap left no open store behind.
    store_lost: AtomicBool,
}

impl IndexEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MemdexConfig,
        layout: SourceLayout,
        db_path: PathBuf,
        store: Arc<ArcSwap<IndexStore>>,
        embedder: EmbeddingOrchestrator,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        vector: VectorIndex,
        keyword: KeywordIndex,
        l1: Arc<L1Generator>,
    ) -> Self {
        let delta = SessionDeltaTracker::new(&config.sync.sessions);
        Self {
            config,
            layout,
            db_path,
            store,
            embedder: ArcSwap::from_pointee(embedder),
            fallback: Mutex::new(fallback),
            fallback_state: Mutex::new(None),
            vector,
            keyword,
            delta,
            l1,
            swap_lock: RwLock::new(()),
            dirty: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            store_lost: AtomicBool::new(false),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Clears the dirty flag, returning its previous value. Changes seen
    /// while a sync runs set it again.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns false if the engine was already closed.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn ensure_open(&self) -> Result<(), MemdexError> {
        if self.is_closed() {
            Err(MemdexError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn mark_store_lost(&self) {
        self.store_lost.store(true, Ordering::SeqCst);
    }

    /// Opens the store file at `db_path` with the optional indexes prepared.
    pub async fn open_store(&self) -> Result<Arc<IndexStore>, MemdexError> {
        let db = Database::open(&self.db_path).await?;
        self.vector.prepare(&db).await;
        self.keyword.prepare(&db).await;
        if let Err(e) = self.vector.refresh_dims(&db).await {
            let _ = db.close().await;
            return Err(e);
        }
        Ok(Arc::new(IndexStore::new(db)))
    }

    /// Reopens the live store if a failed swap left it closed.
    pub async fn recover_store(&self) -> Result<(), MemdexError> {
        if !self.store_lost.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.swap_lock.write().await;
        if !self.store_lost.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.store.store(self.open_store().await?);
        self.store_lost.store(false, Ordering::SeqCst);
        info!(path = %self.db_path.display(), "live index store reopened");
        Ok(())
    }

    /// Fingerprint of the live configuration and provider.
    pub async fn expected_meta(&self) -> IndexMeta {
        let embedder = self.embedder.load();
        let vector_dims = if self.vector.is_available().await {
            self.vector.dims().await
        } else {
            None
        };
        IndexMeta {
            provider: embedder.provider_id().to_string(),
            model: embedder.model().to_string(),
            provider_key: embedder.provider_key(),
            chunk_tokens: self.config.chunking.tokens,
            chunk_overlap: self.config.chunking.overlap,
            vector_dims,
        }
    }

    pub async fn write_caps(&self) -> WriteCaps {
        WriteCaps {
            vector: self.vector.is_available().await,
            fts: self.keyword.is_available().await,
        }
    }

    /// Worker pool size for one sync.
    pub async fn concurrency(&self, embedder: &EmbeddingOrchestrator) -> usize {
        let n = if embedder.batch_active().await {
            self.config.batch.concurrency
        } else {
            self.config.sync.concurrency
        };
        n.max(1)
    }

    /// Builds the write context for `store` with the current provider.
    pub async fn target<'a>(
        &'a self,
        store: &'a IndexStore,
        embedder: &'a EmbeddingOrchestrator,
    ) -> IndexTarget<'a> {
        IndexTarget {
            store,
            embedder,
            vector: &self.vector,
            fts: self.keyword.is_available().await,
            chunking: &self.config.chunking,
        }
    }

    /// Switches to the fallback provider after `error`. Returns false when
    /// there is none (or it is already in use).
    pub async fn activate_fallback(&self, error: &MemdexError) -> bool {
        let Some(provider) = self.fallback.lock().await.take() else {
            return false;
        };
        let from = self.embedder.load().provider_id().to_string();
        let to = provider.id().to_string();
        warn!(
            from = %from,
            to = %to,
            model = %provider.model(),
            error = %error,
            "embedding provider failed, switching to fallback"
        );
        self.embedder.store(Arc::new(EmbeddingOrchestrator::new(
            provider,
            self.config.cache.enabled,
            self.config.embedding.clone(),
            self.config.batch.clone(),
        )));
        *self.fallback_state.lock().await = Some(FallbackState {
            from: from.clone(),
            reason: error.to_string(),
        });
        record_provider_fallback(&from, &to);
        true
    }
}
