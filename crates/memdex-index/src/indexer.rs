// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns one document's text into embedded chunk rows.
//!
//! Shared by file sync, full reindex and `index_content`, so every path
//! chunks, summarizes and embeds a document the same way.

use memdex_config::model::ChunkingConfig;
use memdex_core::MemdexError;
use tracing::debug;

use crate::chunker::chunk_markdown;
use crate::embedding::{EmbedItem, EmbeddingOrchestrator};
use crate::store::{IndexStore, WriteCaps};
use crate::summary::{file_l0_abstract, l0_abstract};
use crate::types::{chunk_id, hash_text, now_ms, ChunkRecord, FileRecord};
use crate::vector::VectorIndex;

/// A document ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub path: String,
    pub source: String,
    pub text: String,
    /// Content digest of `text`.
    pub hash: String,
    pub mtime: i64,
    pub size: i64,
}

impl DocumentInput {
    /// A document with no on-disk metadata (ad-hoc content).
    pub fn from_text(path: impl Into<String>, source: impl Into<String>, text: String) -> Self {
        let size = text.len() as i64;
        Self {
            path: path.into(),
            source: source.into(),
            hash: hash_text(&text),
            text,
            mtime: now_ms(),
            size,
        }
    }
}

/// Everything a document write needs besides the document.
pub struct IndexTarget<'a> {
    pub store: &'a IndexStore,
    pub embedder: &'a EmbeddingOrchestrator,
    pub vector: &'a VectorIndex,
    pub fts: bool,
    pub chunking: &'a ChunkingConfig,
}

/// Chunks, embeds and writes `doc`, replacing any previous version.
/// Returns the number of chunks written.
pub async fn index_document(target: &IndexTarget<'_>, doc: DocumentInput) -> Result<usize, MemdexError> {
    let model = target.embedder.model().to_string();
    let pieces: Vec<_> = chunk_markdown(&doc.text, target.chunking.tokens, target.chunking.overlap)
        .into_iter()
        .filter(|chunk| !chunk.text.trim().is_empty())
        .collect();

    let abstracts: Vec<Option<String>> = pieces.iter().map(|c| l0_abstract(&c.text)).collect();
    let file_l0 = file_l0_abstract(abstracts.iter().flatten().map(String::as_str));

    let mut items: Vec<EmbedItem> = pieces
        .iter()
        .map(|c| EmbedItem {
            key: chunk_id(&doc.source, &doc.path, c.start_line, c.end_line, &c.hash, &model),
            hash: c.hash.clone(),
            text: c.text.clone(),
        })
        .collect();
    if let Some(l0) = &file_l0 {
        items.push(EmbedItem {
            key: format!("file:{}:{}", doc.source, doc.path),
            hash: hash_text(l0),
            text: l0.clone(),
        });
    }

    let mut vectors = target.embedder.embed_items(target.store.db(), &items).await?;
    if let Some(dims) = vectors.first().map(Vec::len) {
        target.vector.ensure_dims(target.store.db(), dims).await?;
    }
    let file_embedding = if file_l0.is_some() { vectors.pop() } else { None };

    let updated_at = now_ms();
    let chunks: Vec<ChunkRecord> = pieces
        .into_iter()
        .zip(items)
        .zip(vectors)
        .zip(abstracts)
        .map(|(((piece, item), embedding), l0)| ChunkRecord {
            id: item.key,
            path: doc.path.clone(),
            source: doc.source.clone(),
            start_line: piece.start_line,
            end_line: piece.end_line,
            hash: piece.hash,
            model: model.clone(),
            text: piece.text,
            embedding,
            updated_at,
            l0_abstract: l0,
            l1_overview: None,
        })
        .collect();

    let file = FileRecord {
        path: doc.path,
        source: doc.source,
        hash: doc.hash,
        mtime: doc.mtime,
        size: doc.size,
        l0_abstract: file_l0,
        l0_embedding: file_embedding,
    };
    let caps = WriteCaps {
        vector: target.vector.is_available().await,
        fts: target.fts,
    };
    debug!(path = %file.path, source = %file.source, chunks = chunks.len(), "indexing document");
    target.store.replace_document(file, chunks, caps).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use memdex_config::model::{BatchConfig, EmbeddingConfig, VectorConfig};
    use memdex_storage::Database;
    use memdex_test_utils::MockEmbeddingProvider;

    use super::*;
    use crate::store::Scope;

    struct Fixture {
        store: IndexStore,
        embedder: EmbeddingOrchestrator,
        vector: VectorIndex,
        chunking: ChunkingConfig,
    }

    impl Fixture {
        async fn new(provider: Arc<MockEmbeddingProvider>) -> Self {
            let store = IndexStore::new(Database::open_in_memory().await.unwrap());
            let vector = VectorIndex::new(&VectorConfig {
                enabled: false,
                ..VectorConfig::default()
            });
            Self {
                store,
                embedder: EmbeddingOrchestrator::new(
                    provider,
                    true,
                    EmbeddingConfig::default(),
                    BatchConfig::default(),
                ),
                vector,
                chunking: ChunkingConfig {
                    tokens: 100,
                    overlap: 20,
                },
            }
        }

        fn target(&self) -> IndexTarget<'_> {
            IndexTarget {
                store: &self.store,
                embedder: &self.embedder,
                vector: &self.vector,
                fts: false,
                chunking: &self.chunking,
            }
        }
    }

    #[tokio::test]
    async fn long_document_is_chunked_with_abstracts() {
        let provider = Arc::new(MockEmbeddingProvider::new());
        let fixture = Fixture::new(provider.clone()).await;
        let text: String = (0..60)
            .map(|i| format!("## Section {i}\n\nRefunds are processed within {i} days.\n\n"))
            .collect();
        let doc = DocumentInput::from_text("memory/policy.md", "memory", text);

        let written = index_document(&fixture.target(), doc).await.unwrap();
        assert!(written >= 2);

        let hits = fixture
            .store
            .search_vector(
                provider.vector_for("Refunds are processed"),
                fixture.embedder.model().to_string(),
                written,
                Some(Scope::new("memory/policy.md", "memory")),
                false,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), written);
        assert!(hits.iter().all(|h| h.l0_abstract.is_some()));
        assert!(hits.iter().all(|h| h.text.chars().count() <= 400));

        let files = fixture
            .store
            .search_files_vector(provider.vector_for("Section"), 5, false)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn empty_document_still_records_the_file() {
        let fixture = Fixture::new(Arc::new(MockEmbeddingProvider::new())).await;
        let doc = DocumentInput::from_text("memory/empty.md", "memory", "  \n\n".into());
        assert_eq!(index_document(&fixture.target(), doc).await.unwrap(), 0);
        let counts = fixture.store.counts().await.unwrap();
        assert_eq!((counts.files, counts.chunks), (1, 0));
    }

    #[tokio::test]
    async fn reindexing_unchanged_text_hits_the_cache() {
        let provider = Arc::new(MockEmbeddingProvider::new());
        let fixture = Fixture::new(provider.clone()).await;
        let text = "# Notes\n\nShipping is free over fifty dollars.".to_string();
        index_document(&fixture.target(), DocumentInput::from_text("a.md", "memory", text.clone()))
            .await
            .unwrap();
        let embedded = provider.embedded_texts();
        index_document(&fixture.target(), DocumentInput::from_text("a.md", "memory", text))
            .await
            .unwrap();
        assert_eq!(provider.embedded_texts(), embedded);
    }
}
