// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! BM25 keyword index over chunk text (`chunks_fts`) and file abstracts
//! (`files_fts`).
//!
//! The FTS5 tables are created at runtime so that a SQLite build without
//! FTS5 degrades to vector-only search instead of failing to open.

use memdex_core::FtsStatus;
use memdex_storage::{map_tr_err, Database};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::{row_to_hit, Scope, HIT_COLUMNS};
use crate::types::{ChunkHit, FileHit};

const CREATE_FTS: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
        text,
        id UNINDEXED,
        path UNINDEXED,
        source UNINDEXED,
        model UNINDEXED,
        start_line UNINDEXED,
        end_line UNINDEXED
    );
    CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
        text,
        path UNINDEXED,
        source UNINDEXED
    );";

/// Turns free text into an FTS5 match expression: every alphanumeric token,
/// quoted, joined with `AND`. `None` when the text has no usable token.
pub fn build_fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" AND "))
    }
}

/// Maps an FTS5 `bm25()` rank (more negative is better) into `[0, 1)`.
///
/// Monotonic in relevance; a rank of 0 (or a positive one) scores 0.
pub fn bm25_rank_to_score(rank: f64) -> f32 {
    let relevance = (-rank).max(0.0);
    (relevance / (1.0 + relevance)) as f32
}

pub(crate) fn ensure_fts_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_FTS)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_chunk_fts(
    conn: &Connection,
    id: &str,
    path: &str,
    source: &str,
    model: &str,
    start_line: usize,
    end_line: usize,
    text: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chunks_fts (text, id, path, source, model, start_line, end_line)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![text, id, path, source, model, start_line as i64, end_line as i64],
    )?;
    Ok(())
}

pub(crate) fn delete_document_fts(conn: &Connection, path: &str, source: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM chunks_fts WHERE path = ?1 AND source = ?2",
        [path, source],
    )?;
    conn.execute(
        "DELETE FROM files_fts WHERE path = ?1 AND source = ?2",
        [path, source],
    )?;
    Ok(())
}

pub(crate) fn insert_file_fts(
    conn: &Connection,
    path: &str,
    source: &str,
    text: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO files_fts (text, path, source) VALUES (?1, ?2, ?3)",
        [text, path, source],
    )?;
    Ok(())
}

/// BM25 search over chunk text for the current model.
pub(crate) fn search_chunks(
    conn: &Connection,
    match_expr: &str,
    model: &str,
    limit: usize,
    scope: Option<&Scope>,
) -> rusqlite::Result<Vec<ChunkHit>> {
    let scope_sql = if scope.is_some() {
        " AND chunks_fts.path = ?4 AND chunks_fts.source = ?5"
    } else {
        ""
    };
    let sql = format!(
        "SELECT {HIT_COLUMNS}, bm25(chunks_fts) AS rank
         FROM chunks_fts JOIN chunks c ON c.id = chunks_fts.id
         WHERE chunks_fts MATCH ?1 AND chunks_fts.model = ?2{scope_sql}
         ORDER BY rank ASC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let limit = limit as i64;
    let map = |row: &rusqlite::Row<'_>| {
        let rank: f64 = row.get(10)?;
        row_to_hit(row, bm25_rank_to_score(rank))
    };
    let hits = match scope {
        Some(scope) => stmt
            .query_map(
                rusqlite::params![match_expr, model, limit, scope.path, scope.source],
                map,
            )?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![match_expr, model, limit], map)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(hits)
}

/// BM25 search over file-level abstracts.
pub(crate) fn search_files(
    conn: &Connection,
    match_expr: &str,
    limit: usize,
) -> rusqlite::Result<Vec<FileHit>> {
    let mut stmt = conn.prepare(
        "SELECT path, source, bm25(files_fts) AS rank
         FROM files_fts
         WHERE files_fts MATCH ?1
         ORDER BY rank ASC
         LIMIT ?2",
    )?;
    let hits = stmt
        .query_map(rusqlite::params![match_expr, limit as i64], |row| {
            let rank: f64 = row.get(2)?;
            Ok(FileHit {
                path: row.get(0)?,
                source: row.get(1)?,
                score: bm25_rank_to_score(rank),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

#[derive(Debug, Default)]
struct FtsState {
    probed: bool,
    available: bool,
    error: Option<String>,
}

/// Process-wide availability of FTS5.
#[derive(Debug)]
pub struct KeywordIndex {
    enabled: bool,
    state: Mutex<FtsState>,
}

impl KeywordIndex {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(FtsState::default()),
        }
    }

    /// Creates the FTS tables on `db`. The first failure disables keyword
    /// search for the rest of the process.
    pub async fn prepare(&self, db: &Database) -> bool {
        if !self.enabled {
            return false;
        }
        let mut state = self.state.lock().await;
        if state.probed && !state.available {
            return false;
        }
        let result = db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> { ensure_fts_tables(conn) })
            .await
            .map_err(map_tr_err);
        state.probed = true;
        match result {
            Ok(()) => {
                state.available = true;
                true
            }
            Err(e) => {
                warn!(error = %e, "full-text search unavailable, using vector search only");
                state.available = false;
                state.error = Some(e.to_string());
                false
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        let state = self.state.lock().await;
        self.enabled && state.available
    }

    pub async fn status(&self) -> FtsStatus {
        let state = self.state.lock().await;
        FtsStatus {
            enabled: self.enabled,
            available: state.available,
            error: state.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_quotes_and_joins_tokens() {
        assert_eq!(
            build_fts_query("refund policy").as_deref(),
            Some("\"refund\" AND \"policy\"")
        );
        assert_eq!(
            build_fts_query("what's the \"refund\"-policy?").as_deref(),
            Some("\"what\" AND \"s\" AND \"the\" AND \"refund\" AND \"policy\"")
        );
        assert_eq!(build_fts_query("snake_case ok").as_deref(), Some("\"snake_case\" AND \"ok\""));
    }

    #[test]
    fn fts_query_without_tokens_is_none() {
        assert!(build_fts_query("").is_none());
        assert!(build_fts_query("  ?! -- ").is_none());
    }

    #[test]
    fn bm25_score_is_monotonic_and_bounded() {
        assert_eq!(bm25_rank_to_score(0.0), 0.0);
        assert_eq!(bm25_rank_to_score(3.0), 0.0);
        let weak = bm25_rank_to_score(-0.5);
        let strong = bm25_rank_to_score(-8.0);
        assert!(weak > 0.0 && strong > weak && strong < 1.0);
        assert!((bm25_rank_to_score(-1.0) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_ranks_matching_chunks() {
        let db = Database::open_in_memory().await.unwrap();
        let index = KeywordIndex::new(true);
        assert!(index.prepare(&db).await);
        assert!(index.is_available().await);

        let hits = db
            .connection()
            .call(|conn| -> Result<Vec<ChunkHit>, rusqlite::Error> {
                for (id, text) in [
                    ("c1", "refund policy: thirty days for every refund"),
                    ("c2", "shipping takes two days"),
                ] {
                    conn.execute(
                        "INSERT INTO chunks (id, path, source, start_line, end_line, hash, model,
                                             text, embedding, updated_at)
                         VALUES (?1, 'MEMORY.md', 'memory', 1, 1, 'h', 'm', ?2, x'', 0)",
                        [id, text],
                    )?;
                    insert_chunk_fts(conn, id, "MEMORY.md", "memory", "m", 1, 1, text)?;
                }
                search_chunks(conn, "\"refund\" AND \"policy\"", "m", 10, None)
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c1");
        assert!(hits[0].score > 0.0 && hits[0].score < 1.0);
    }

    #[tokio::test]
    async fn disabled_index_reports_unavailable() {
        let db = Database::open_in_memory().await.unwrap();
        let index = KeywordIndex::new(false);
        assert!(!index.prepare(&db).await);
        let status = index.status().await;
        assert!(!status.enabled && !status.available);
    }
}
