// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed index store: files, chunks, fingerprint, ad-hoc documents
//! and the L1 work list.
//!
//! Every document rewrite happens in one transaction that also maintains the
//! optional FTS5 and vec0 tables, so a document is never half-indexed.

use std::collections::HashMap;

use memdex_core::MemdexError;
use memdex_storage::{map_tr_err, Database};
use rusqlite::{OptionalExtension, Row};
use tracing::warn;

use crate::keyword;
use crate::types::{
    blob_to_vec, now_ms, vec_to_blob, ChunkHit, ChunkRecord, FileHit, FileRecord, IndexMeta,
    META_KEY,
};
use crate::vector::{self, file_vec_id, CHUNKS_VEC, FILES_VEC};

/// Columns read into a [`ChunkHit`], in [`row_to_hit`] order. Alias `c`.
pub(crate) const HIT_COLUMNS: &str = "c.id, c.path, c.source, c.start_line, c.end_line, c.text, \
     c.updated_at, c.embedding, c.l0_abstract, c.l1_overview";

pub(crate) fn row_to_hit(row: &Row<'_>, score: f32) -> rusqlite::Result<ChunkHit> {
    let start_line: i64 = row.get(3)?;
    let end_line: i64 = row.get(4)?;
    let blob: Vec<u8> = row.get(7)?;
    Ok(ChunkHit {
        id: row.get(0)?,
        path: row.get(1)?,
        source: row.get(2)?,
        start_line: start_line as usize,
        end_line: end_line as usize,
        text: row.get(5)?,
        updated_at: row.get(6)?,
        embedding: blob_to_vec(&blob),
        l0_abstract: row.get(8)?,
        l1_overview: row.get(9)?,
        score,
    })
}

/// One logical document, identified by path within its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    pub path: String,
    pub source: String,
}

impl Scope {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Which optional tables a write must maintain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCaps {
    /// The ANN extension is loaded; vec0 tables are kept in step if present.
    pub vector: bool,
    pub fts: bool,
}

/// Processing state of a chunk's L1 overview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Status {
    Pending,
    Done,
    Error,
}

impl L1Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// A document registered through `index_content` rather than found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdHocDocument {
    pub path: String,
    pub source: String,
    pub hash: String,
    pub text: String,
    pub updated_at: i64,
}

/// Per-source counts for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub files: usize,
    pub chunks: usize,
    /// `(source, files, chunks)`, sorted by source.
    pub sources: Vec<(String, usize, usize)>,
}

/// Typed access to one index database.
#[derive(Clone)]
pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Reads the fingerprint row. An unreadable row counts as missing.
    pub async fn read_meta(&self) -> Result<Option<IndexMeta>, MemdexError> {
        let raw = self
            .db
            .connection()
            .call(|conn| -> Result<Option<String>, rusqlite::Error> {
                conn.query_row("SELECT value FROM meta WHERE key = ?1", [META_KEY], |row| {
                    row.get(0)
                })
                .optional()
            })
            .await
            .map_err(map_tr_err)?;
        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(error = %e, "index fingerprint unreadable, treating as missing");
                None
            }
        }))
    }

    pub async fn write_meta(&self, meta: &IndexMeta) -> Result<(), MemdexError> {
        let value = serde_json::to_string(meta)
            .map_err(|e| MemdexError::Internal(format!("failed to encode index meta: {e}")))?;
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    [META_KEY, value.as_str()],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Content hash of an indexed document.
    pub async fn file_hash(&self, scope: &Scope) -> Result<Option<String>, MemdexError> {
        let scope = scope.clone();
        self.db
            .connection()
            .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
                conn.query_row(
                    "SELECT hash FROM files WHERE path = ?1 AND source = ?2",
                    [&scope.path, &scope.source],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Every indexed document with its content hash.
    pub async fn list_files(&self) -> Result<HashMap<Scope, String>, MemdexError> {
        self.db
            .connection()
            .call(|conn| -> Result<HashMap<Scope, String>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT path, source, hash FROM files")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((Scope::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?), row.get(2)?))
                    })?
                    .collect::<Result<HashMap<_, _>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Replaces every row of one document: old chunks and their index rows
    /// are deleted, the new ones inserted, all in a single transaction.
    ///
    /// L1 overviews of chunks whose id survives are carried over.
    pub async fn replace_document(
        &self,
        file: FileRecord,
        chunks: Vec<ChunkRecord>,
        caps: WriteCaps,
    ) -> Result<usize, MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;

                let previous: HashMap<String, String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id, l1_overview FROM chunks
                         WHERE path = ?1 AND source = ?2 AND l1_status = 'done'
                           AND l1_overview IS NOT NULL",
                    )?;
                    let rows = stmt
                        .query_map([&file.path, &file.source], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<Result<_, _>>()?;
                    rows
                };

                let vector_dims = if caps.vector {
                    vector::vec_table_dims(&tx)?
                } else {
                    None
                };
                delete_document_rows(&tx, &file.path, &file.source, caps.fts, vector_dims)?;

                {
                    let mut insert = tx.prepare(
                        "INSERT OR REPLACE INTO chunks
                            (id, path, source, start_line, end_line, hash, model, text, embedding,
                             updated_at, l0_abstract, l1_overview, l1_status)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    )?;
                    for chunk in &chunks {
                        let carried = previous.get(&chunk.id).cloned().or(chunk.l1_overview.clone());
                        let status = if carried.is_some() {
                            L1Status::Done
                        } else {
                            L1Status::Pending
                        };
                        insert.execute(rusqlite::params![
                            chunk.id,
                            chunk.path,
                            chunk.source,
                            chunk.start_line as i64,
                            chunk.end_line as i64,
                            chunk.hash,
                            chunk.model,
                            chunk.text,
                            vec_to_blob(&chunk.embedding),
                            chunk.updated_at,
                            chunk.l0_abstract,
                            carried,
                            status.as_str(),
                        ])?;
                        if caps.fts {
                            keyword::insert_chunk_fts(
                                &tx,
                                &chunk.id,
                                &chunk.path,
                                &chunk.source,
                                &chunk.model,
                                chunk.start_line,
                                chunk.end_line,
                                &chunk.text,
                            )?;
                        }
                        if vector_dims == Some(chunk.embedding.len()) {
                            vector::upsert_vec(&tx, CHUNKS_VEC, &chunk.id, &chunk.embedding)?;
                        }
                    }
                }

                tx.execute(
                    "INSERT INTO files (path, source, hash, mtime, size, l0_abstract, l0_embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(path, source) DO UPDATE SET
                        hash = excluded.hash,
                        mtime = excluded.mtime,
                        size = excluded.size,
                        l0_abstract = excluded.l0_abstract,
                        l0_embedding = excluded.l0_embedding",
                    rusqlite::params![
                        file.path,
                        file.source,
                        file.hash,
                        file.mtime,
                        file.size,
                        file.l0_abstract,
                        file.l0_embedding.as_deref().map(vec_to_blob),
                    ],
                )?;
                if caps.fts
                    && let Some(l0) = &file.l0_abstract
                {
                    keyword::insert_file_fts(&tx, &file.path, &file.source, l0)?;
                }
                if let Some(embedding) = &file.l0_embedding
                    && vector_dims == Some(embedding.len())
                {
                    vector::upsert_vec(
                        &tx,
                        FILES_VEC,
                        &file_vec_id(&file.source, &file.path),
                        embedding,
                    )?;
                }

                tx.commit()?;
                Ok(chunks.len())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Removes a document and all of its chunk and index rows.
    pub async fn delete_document(&self, scope: &Scope, caps: WriteCaps) -> Result<(), MemdexError> {
        let scope = scope.clone();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                let vector_dims = if caps.vector {
                    vector::vec_table_dims(&tx)?
                } else {
                    None
                };
                delete_document_rows(&tx, &scope.path, &scope.source, caps.fts, vector_dims)?;
                tx.execute(
                    "DELETE FROM files WHERE path = ?1 AND source = ?2",
                    [&scope.path, &scope.source],
                )?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn counts(&self) -> Result<StoreCounts, MemdexError> {
        self.db
            .connection()
            .call(|conn| -> Result<StoreCounts, rusqlite::Error> {
                let mut per_source: HashMap<String, (usize, usize)> = HashMap::new();
                let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM files GROUP BY source")?;
                for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))? {
                    let (source, n) = row?;
                    per_source.entry(source).or_default().0 = n as usize;
                }
                let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM chunks GROUP BY source")?;
                for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))? {
                    let (source, n) = row?;
                    per_source.entry(source).or_default().1 = n as usize;
                }
                let mut sources: Vec<(String, usize, usize)> = per_source
                    .into_iter()
                    .map(|(source, (files, chunks))| (source, files, chunks))
                    .collect();
                sources.sort();
                Ok(StoreCounts {
                    files: sources.iter().map(|s| s.1).sum(),
                    chunks: sources.iter().map(|s| s.2).sum(),
                    sources,
                })
            })
            .await
            .map_err(map_tr_err)
    }

    /// Chunks embedded with `model`. Used by tests and the vector-dims check.
    pub async fn chunk_count(&self, model: Option<&str>) -> Result<usize, MemdexError> {
        let model = model.map(str::to_string);
        self.db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let n: i64 = match &model {
                    Some(model) => conn.query_row(
                        "SELECT COUNT(*) FROM chunks WHERE model = ?1",
                        [model],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?,
                };
                Ok(n as usize)
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn document_chunk_count(&self, scope: &Scope) -> Result<usize, MemdexError> {
        let scope = scope.clone();
        self.db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE path = ?1 AND source = ?2",
                    [&scope.path, &scope.source],
                    |row| row.get(0),
                )?;
                Ok(n as usize)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Chunk-level vector search; `ann` selects the vec0 table over a scan.
    pub async fn search_vector(
        &self,
        query: Vec<f32>,
        model: String,
        limit: usize,
        scope: Option<Scope>,
        ann: bool,
    ) -> Result<Vec<ChunkHit>, MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<ChunkHit>, rusqlite::Error> {
                if ann {
                    vector::search_chunks_ann(conn, &query, &model, limit, scope.as_ref())
                } else {
                    vector::search_chunks_brute(conn, &query, &model, limit, scope.as_ref())
                }
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn search_keyword(
        &self,
        match_expr: String,
        model: String,
        limit: usize,
        scope: Option<Scope>,
    ) -> Result<Vec<ChunkHit>, MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<ChunkHit>, rusqlite::Error> {
                keyword::search_chunks(conn, &match_expr, &model, limit, scope.as_ref())
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn search_files_vector(
        &self,
        query: Vec<f32>,
        limit: usize,
        ann: bool,
    ) -> Result<Vec<FileHit>, MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<FileHit>, rusqlite::Error> {
                if ann {
                    vector::search_files_ann(conn, &query, limit)
                } else {
                    vector::search_files_brute(conn, &query, limit)
                }
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn search_files_keyword(
        &self,
        match_expr: String,
        limit: usize,
    ) -> Result<Vec<FileHit>, MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<FileHit>, rusqlite::Error> {
                keyword::search_files(conn, &match_expr, limit)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Oldest chunks still waiting for an L1 overview.
    pub async fn pending_l1(&self, limit: usize) -> Result<Vec<(String, String)>, MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<(String, String)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, text FROM chunks WHERE l1_status = 'pending'
                     ORDER BY updated_at ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Text of one chunk, if it still exists.
    pub async fn chunk_text(&self, id: &str) -> Result<Option<String>, MemdexError> {
        let id = id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
                conn.query_row("SELECT text FROM chunks WHERE id = ?1", [id], |row| row.get(0))
                    .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Stores an L1 outcome. A chunk deleted meanwhile is silently skipped.
    pub async fn set_l1(
        &self,
        id: &str,
        overview: Option<String>,
        status: L1Status,
    ) -> Result<(), MemdexError> {
        let id = id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "UPDATE chunks SET l1_overview = ?1, l1_status = ?2 WHERE id = ?3",
                    rusqlite::params![overview, status.as_str(), id],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn upsert_ad_hoc(&self, doc: AdHocDocument) -> Result<(), MemdexError> {
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO ad_hoc_documents (path, source, hash, text, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(path, source) DO UPDATE SET
                        hash = excluded.hash,
                        text = excluded.text,
                        updated_at = excluded.updated_at",
                    rusqlite::params![doc.path, doc.source, doc.hash, doc.text, doc.updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Forgets an ad-hoc document. Returns whether it existed.
    pub async fn remove_ad_hoc(&self, scope: &Scope) -> Result<bool, MemdexError> {
        let scope = scope.clone();
        self.db
            .connection()
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let n = conn.execute(
                    "DELETE FROM ad_hoc_documents WHERE path = ?1 AND source = ?2",
                    [&scope.path, &scope.source],
                )?;
                Ok(n > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn list_ad_hoc(&self) -> Result<Vec<AdHocDocument>, MemdexError> {
        self.db
            .connection()
            .call(|conn| -> Result<Vec<AdHocDocument>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT path, source, hash, text, updated_at FROM ad_hoc_documents
                     ORDER BY source, path",
                )?;
                let docs = stmt
                    .query_map([], |row| {
                        Ok(AdHocDocument {
                            path: row.get(0)?,
                            source: row.get(1)?,
                            hash: row.get(2)?,
                            text: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(docs)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Copies ad-hoc documents into another store (full reindex).
    pub async fn copy_ad_hoc_to(&self, other: &IndexStore) -> Result<usize, MemdexError> {
        let docs = self.list_ad_hoc().await?;
        let copied = docs.len();
        for doc in docs {
            other.upsert_ad_hoc(doc).await?;
        }
        Ok(copied)
    }
}

impl AdHocDocument {
    pub fn new(scope: &Scope, hash: String, text: String) -> Self {
        Self {
            path: scope.path.clone(),
            source: scope.source.clone(),
            hash,
            text,
            updated_at: now_ms(),
        }
    }
}

/// Deletes chunk, FTS and vector rows of one document (not the file row).
fn delete_document_rows(
    conn: &rusqlite::Connection,
    path: &str,
    source: &str,
    fts: bool,
    vector_dims: Option<usize>,
) -> rusqlite::Result<()> {
    if vector_dims.is_some() {
        let ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM chunks WHERE path = ?1 AND source = ?2")?;
            let rows = stmt
                .query_map([path, source], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            rows
        };
        for id in &ids {
            vector::delete_vec(conn, CHUNKS_VEC, id)?;
        }
        vector::delete_vec(conn, FILES_VEC, &file_vec_id(source, path))?;
    }
    if fts {
        keyword::delete_document_fts(conn, path, source)?;
    }
    conn.execute(
        "DELETE FROM chunks WHERE path = ?1 AND source = ?2",
        [path, source],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{chunk_id, hash_text};

    fn file(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            path: path.into(),
            source: "memory".into(),
            hash: hash.into(),
            mtime: 1,
            size: 10,
            l0_abstract: Some("Refund policy".into()),
            l0_embedding: Some(vec![1.0, 0.0]),
        }
    }

    fn chunk(path: &str, text: &str, line: usize, embedding: Vec<f32>) -> ChunkRecord {
        let hash = hash_text(text);
        ChunkRecord {
            id: chunk_id("memory", path, line, line, &hash, "m"),
            path: path.into(),
            source: "memory".into(),
            start_line: line,
            end_line: line,
            hash,
            model: "m".into(),
            text: text.into(),
            embedding,
            updated_at: now_ms(),
            l0_abstract: None,
            l1_overview: None,
        }
    }

    async fn store() -> IndexStore {
        let db = Database::open_in_memory().await.unwrap();
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> { keyword::ensure_fts_tables(conn) })
            .await
            .unwrap();
        IndexStore::new(db)
    }

    const CAPS: WriteCaps = WriteCaps {
        vector: false,
        fts: true,
    };

    #[tokio::test]
    async fn meta_round_trips() {
        let store = store().await;
        assert!(store.read_meta().await.unwrap().is_none());
        let meta = IndexMeta {
            provider: "mock".into(),
            model: "m".into(),
            provider_key: "k".into(),
            chunk_tokens: 400,
            chunk_overlap: 80,
            vector_dims: Some(2),
        };
        store.write_meta(&meta).await.unwrap();
        assert_eq!(store.read_meta().await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn replace_document_swaps_chunks() {
        let store = store().await;
        let first = vec![
            chunk("MEMORY.md", "refund policy", 1, vec![1.0, 0.0]),
            chunk("MEMORY.md", "shipping", 2, vec![0.0, 1.0]),
        ];
        assert_eq!(store.replace_document(file("MEMORY.md", "h1"), first, CAPS).await.unwrap(), 2);
        let second = vec![chunk("MEMORY.md", "returns desk", 1, vec![1.0, 1.0])];
        store.replace_document(file("MEMORY.md", "h2"), second, CAPS).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.files, 1);
        assert_eq!(counts.chunks, 1);
        assert_eq!(counts.sources, vec![("memory".to_string(), 1, 1)]);
        assert_eq!(
            store.file_hash(&Scope::new("MEMORY.md", "memory")).await.unwrap().as_deref(),
            Some("h2")
        );
        let stale = store
            .search_keyword("\"shipping\"".into(), "m".into(), 10, None)
            .await
            .unwrap();
        assert!(stale.is_empty(), "fts rows of replaced chunks are gone");
    }

    #[tokio::test]
    async fn brute_force_vector_search_ranks_by_cosine() {
        let store = store().await;
        let chunks = vec![
            chunk("a.md", "alpha", 1, vec![1.0, 0.0]),
            chunk("a.md", "beta", 2, vec![0.0, 1.0]),
        ];
        store.replace_document(file("a.md", "h"), chunks, CAPS).await.unwrap();
        let hits = store
            .search_vector(vec![0.9, 0.1], "m".into(), 5, None, false)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "alpha");
        assert!(hits[0].score > hits[1].score);

        let scoped = store
            .search_vector(vec![0.9, 0.1], "m".into(), 5, Some(Scope::new("b.md", "memory")), false)
            .await
            .unwrap();
        assert!(scoped.is_empty());
        let other_model = store
            .search_vector(vec![0.9, 0.1], "other".into(), 5, None, false)
            .await
            .unwrap();
        assert!(other_model.is_empty());
    }

    #[tokio::test]
    async fn knn_vector_search_matches_the_scan() {
        memdex_storage::register_vector_extension();
        let store = store().await;
        store
            .db()
            .connection()
            .call(|conn| -> Result<bool, rusqlite::Error> { vector::ensure_vec_tables(conn, 2) })
            .await
            .unwrap();
        let caps = WriteCaps { vector: true, fts: true };
        let chunks = vec![
            chunk("a.md", "alpha", 1, vec![1.0, 0.0]),
            chunk("a.md", "beta", 2, vec![0.0, 1.0]),
            chunk("a.md", "gamma", 3, vec![0.7, 0.7]),
        ];
        store.replace_document(file("a.md", "h"), chunks, caps).await.unwrap();

        let ann = store
            .search_vector(vec![0.9, 0.1], "m".into(), 2, None, true)
            .await
            .unwrap();
        let scan = store
            .search_vector(vec![0.9, 0.1], "m".into(), 2, None, false)
            .await
            .unwrap();
        let texts = |hits: &[ChunkHit]| hits.iter().map(|h| h.text.clone()).collect::<Vec<_>>();
        assert_eq!(texts(&ann), vec!["alpha", "gamma"]);
        assert_eq!(texts(&ann), texts(&scan));
        assert!((ann[0].score - scan[0].score).abs() < 1e-4);

        let files = store.search_files_vector(vec![1.0, 0.0], 5, true).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.md");
        assert!(files[0].score > 0.99);

        let scoped = store
            .search_vector(vec![0.9, 0.1], "m".into(), 5, Some(Scope::new("a.md", "memory")), true)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 3);
    }

    #[tokio::test]
    async fn delete_document_removes_everything() {
        let store = store().await;
        store
            .replace_document(file("a.md", "h"), vec![chunk("a.md", "alpha", 1, vec![1.0, 0.0])], CAPS)
            .await
            .unwrap();
        store.delete_document(&Scope::new("a.md", "memory"), CAPS).await.unwrap();
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
        assert!(store.search_files_keyword("\"Refund\"".into(), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn l1_overviews_survive_unchanged_chunks() {
        let store = store().await;
        let c = chunk("a.md", "alpha", 1, vec![1.0, 0.0]);
        let id = c.id.clone();
        store.replace_document(file("a.md", "h"), vec![c.clone()], CAPS).await.unwrap();
        assert_eq!(store.pending_l1(10).await.unwrap().len(), 1);

        store.set_l1(&id, Some("overview".into()), L1Status::Done).await.unwrap();
        assert!(store.pending_l1(10).await.unwrap().is_empty());

        store.replace_document(file("a.md", "h"), vec![c], CAPS).await.unwrap();
        assert!(store.pending_l1(10).await.unwrap().is_empty());
        let hits = store.search_vector(vec![1.0, 0.0], "m".into(), 1, None, false).await.unwrap();
        assert_eq!(hits[0].l1_overview.as_deref(), Some("overview"));
    }

    #[tokio::test]
    async fn ad_hoc_documents_round_trip() {
        let store = store().await;
        let scope = Scope::new("kb/faq", "kb");
        store
            .upsert_ad_hoc(AdHocDocument::new(&scope, "h".into(), "faq text".into()))
            .await
            .unwrap();
        let other = IndexStore::new(Database::open_in_memory().await.unwrap());
        assert_eq!(store.copy_ad_hoc_to(&other).await.unwrap(), 1);
        assert_eq!(other.list_ad_hoc().await.unwrap()[0].text, "faq text");
        assert!(store.remove_ad_hoc(&scope).await.unwrap());
        assert!(!store.remove_ad_hoc(&scope).await.unwrap());
    }
}
