// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional ANN vector index (sqlite-vec) with a brute-force fallback.
//!
//! The extension is probed once per process. If it cannot be loaded the
//! index is marked unavailable for good and every vector lookup scans the
//! `chunks.embedding` column instead. While available, `chunks_vec` and
//! `files_vec` are kept sized to the current embedding dimensionality; a
//! different dimensionality drops and recreates both.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use memdex_config::model::VectorConfig;
use memdex_core::{Availability, MemdexError, VectorStatus};
use memdex_storage::{map_tr_err, register_vector_extension, Database};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{row_to_hit, Scope, HIT_COLUMNS};
use crate::types::{blob_to_vec, cosine_similarity, vec_to_blob, ChunkHit, FileHit};

pub(crate) const CHUNKS_VEC: &str = "chunks_vec";
pub(crate) const FILES_VEC: &str = "files_vec";

/// Neighbours fetched per requested chunk, covering rows of other models.
const KNN_OVERFETCH: usize = 2;
/// Largest `k` vec0 accepts.
const KNN_MAX_K: usize = 4096;

fn knn_k(limit: usize) -> i64 {
    (limit.max(1) * KNN_OVERFETCH).min(KNN_MAX_K) as i64
}

static DIMS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"float\[(\d+)\]").unwrap());

/// Row id of a document in `files_vec`.
pub(crate) fn file_vec_id(source: &str, path: &str) -> String {
    format!("{source}:{path}")
}

/// Dimensionality of the existing `chunks_vec` table, if there is one.
pub(crate) fn vec_table_dims(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [CHUNKS_VEC],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sql.and_then(|sql| {
        DIMS.captures(&sql)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }))
}

/// Creates both ANN tables for `dims`, replacing tables of another size.
///
/// Returns true if the tables were (re)created.
pub(crate) fn ensure_vec_tables(conn: &Connection, dims: usize) -> rusqlite::Result<bool> {
    if vec_table_dims(conn)? == Some(dims) {
        return Ok(false);
    }
    for table in [CHUNKS_VEC, FILES_VEC] {
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE VIRTUAL TABLE {table} USING vec0(\
                 id TEXT PRIMARY KEY, embedding float[{dims}] distance_metric=cosine);"
        ))?;
    }
    Ok(true)
}

/// vec0 has no upsert, so the old row is deleted first.
pub(crate) fn upsert_vec(
    conn: &Connection,
    table: &str,
    id: &str,
    embedding: &[f32],
) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
    conn.execute(
        &format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"),
        rusqlite::params![id, vec_to_blob(embedding)],
    )?;
    Ok(())
}

pub(crate) fn delete_vec(conn: &Connection, table: &str, id: &str) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
    Ok(())
}

/// Nearest chunks through a vec0 KNN query. Score is `1 - cosine distance`.
///
/// The KNN runs over the whole table before the model filter, so it fetches
/// `limit * KNN_OVERFETCH` neighbours. A document-scoped lookup only touches
/// that document's rows and is cheaper as a scan.
pub(crate) fn search_chunks_ann(
    conn: &Connection,
    query: &[f32],
    model: &str,
    limit: usize,
    scope: Option<&Scope>,
) -> rusqlite::Result<Vec<ChunkHit>> {
    if scope.is_some() {
        return search_chunks_brute(conn, query, model, limit, scope);
    }
    let mut stmt = conn.prepare(&format!(
        "WITH knn AS (
             SELECT id, distance FROM {CHUNKS_VEC}
             WHERE embedding MATCH ?1 AND k = ?2
         )
         SELECT {HIT_COLUMNS}, knn.distance
         FROM knn JOIN chunks c ON c.id = knn.id
         WHERE c.model = ?3
         ORDER BY knn.distance ASC
         LIMIT ?4"
    ))?;
    let hits = stmt
        .query_map(
            rusqlite::params![vec_to_blob(query), knn_k(limit), model, limit as i64],
            |row| {
                let dist: f64 = row.get(10)?;
                row_to_hit(row, (1.0 - dist) as f32)
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Nearest chunks by scanning stored embeddings in process.
pub(crate) fn search_chunks_brute(
    conn: &Connection,
    query: &[f32],
    model: &str,
    limit: usize,
    scope: Option<&Scope>,
) -> rusqlite::Result<Vec<ChunkHit>> {
    let (scope_sql, path, source) = scope_clause(scope, 2);
    let sql = format!("SELECT {HIT_COLUMNS} FROM chunks c WHERE c.model = ?1{scope_sql}");
    let mut stmt = conn.prepare(&sql)?;
    let map = |row: &rusqlite::Row<'_>| row_to_hit(row, 0.0);
    let mut hits = match (path, source) {
        (Some(path), Some(source)) => stmt
            .query_map(rusqlite::params![model, path, source], map)?
            .collect::<Result<Vec<_>, _>>()?,
        _ => stmt
            .query_map(rusqlite::params![model], map)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    for hit in &mut hits {
        hit.score = cosine_similarity(query, &hit.embedding);
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    Ok(hits)
}

/// Nearest documents by file-level embedding, through a vec0 KNN query.
pub(crate) fn search_files_ann(
    conn: &Connection,
    query: &[f32],
    limit: usize,
) -> rusqlite::Result<Vec<FileHit>> {
    let mut stmt = conn.prepare(&format!(
        "WITH knn AS (
             SELECT id, distance FROM {FILES_VEC}
             WHERE embedding MATCH ?1 AND k = ?2
         )
         SELECT f.path, f.source, knn.distance
         FROM knn JOIN files f ON knn.id = f.source || ':' || f.path
         ORDER BY knn.distance ASC"
    ))?;
    let mut hits = stmt
        .query_map(rusqlite::params![vec_to_blob(query), knn_k(limit)], |row| {
            let dist: f64 = row.get(2)?;
            Ok(FileHit {
                path: row.get(0)?,
                source: row.get(1)?,
                score: (1.0 - dist) as f32,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    hits.truncate(limit);
    Ok(hits)
}

/// Nearest documents by scanning `files.l0_embedding`.
pub(crate) fn search_files_brute(
    conn: &Connection,
    query: &[f32],
    limit: usize,
) -> rusqlite::Result<Vec<FileHit>> {
    let mut stmt = conn.prepare(
        "SELECT path, source, l0_embedding FROM files WHERE l0_embedding IS NOT NULL",
    )?;
    let mut hits = stmt
        .query_map([], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok(FileHit {
                path: row.get(0)?,
                source: row.get(1)?,
                score: cosine_similarity(query, &blob_to_vec(&blob)),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    Ok(hits)
}

/// SQL and parameters restricting a chunk query to one document.
fn scope_clause(scope: Option<&Scope>, first_param: usize) -> (String, Option<String>, Option<String>) {
    match scope {
        Some(scope) => (
            format!(
                " AND c.path = ?{} AND c.source = ?{}",
                first_param,
                first_param + 1
            ),
            Some(scope.path.clone()),
            Some(scope.source.clone()),
        ),
        None => (String::new(), None, None),
    }
}

#[derive(Debug, Default)]
struct VectorState {
    available: Availability,
    load_error: Option<String>,
    dims: Option<usize>,
}

/// Process-wide state of the ANN extension.
#[derive(Debug)]
pub struct VectorIndex {
    enabled: bool,
    extension_path: Option<PathBuf>,
    load_timeout: Duration,
    state: Mutex<VectorState>,
}

impl VectorIndex {
    pub fn new(config: &VectorConfig) -> Self {
        let extension_path = config.extension_path.as_ref().map(PathBuf::from);
        if config.enabled && extension_path.is_none() {
            // Must run before any store connection is opened.
            register_vector_extension();
        }
        Self {
            enabled: config.enabled,
            extension_path,
            load_timeout: Duration::from_secs(config.load_timeout_secs),
            state: Mutex::new(VectorState::default()),
        }
    }

    /// Makes the extension usable on `db`. The first call decides
    /// availability for the rest of the process.
    pub async fn prepare(&self, db: &Database) -> bool {
        if !self.enabled {
            return false;
        }
        let mut state = self.state.lock().await;
        if state.available == Availability::Unavailable {
            return false;
        }

        let extension_path = self.extension_path.clone();
        let probe = db
            .connection()
            .call(move |conn| -> Result<(String, Option<usize>), rusqlite::Error> {
                if let Some(path) = &extension_path {
                    // SAFETY: loading a trusted, operator-configured extension.
                    unsafe {
                        let _guard = rusqlite::LoadExtensionGuard::new(conn)?;
                        conn.load_extension(path, None::<&str>)?;
                    }
                }
                let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
                Ok((version, vec_table_dims(conn)?))
            });

        let outcome = match tokio::time::timeout(self.load_timeout, probe).await {
            Ok(result) => result.map_err(|e| map_tr_err(e).to_string()),
            Err(_) => Err(format!(
                "extension load timed out after {}s",
                self.load_timeout.as_secs()
            )),
        };

        match outcome {
            Ok((version, dims)) => {
                if state.available == Availability::Unknown {
                    info!(version = %version, "vector extension available");
                }
                state.available = Availability::Available;
                if dims.is_some() {
                    state.dims = dims;
                }
                true
            }
            Err(message) => {
                warn!(error = %message, "vector extension unavailable, using brute-force search");
                state.available = Availability::Unavailable;
                state.load_error = Some(message);
                false
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        self.state.lock().await.available == Availability::Available
    }

    /// Dimensionality of the ANN tables on the live store.
    pub async fn dims(&self) -> Option<usize> {
        self.state.lock().await.dims
    }

    /// Sizes the ANN tables on `db` for `dims`. Returns the dims the tables
    /// now have, or `None` when the extension is not in use.
    pub async fn ensure_dims(
        &self,
        db: &Database,
        dims: usize,
    ) -> Result<Option<usize>, MemdexError> {
        if dims == 0 || !self.is_available().await {
            return Ok(None);
        }
        let recreated = db
            .connection()
            .call(move |conn| -> Result<bool, rusqlite::Error> { ensure_vec_tables(conn, dims) })
            .await
            .map_err(map_tr_err)?;
        if recreated {
            debug!(dims, "vector tables created");
        }
        self.state.lock().await.dims = Some(dims);
        Ok(Some(dims))
    }

    /// Re-reads the ANN table size from `db`, e.g. after a store swap.
    pub async fn refresh_dims(&self, db: &Database) -> Result<Option<usize>, MemdexError> {
        if !self.is_available().await {
            return Ok(None);
        }
        let dims = db
            .connection()
            .call(|conn| -> Result<Option<usize>, rusqlite::Error> { vec_table_dims(conn) })
            .await
            .map_err(map_tr_err)?;
        self.state.lock().await.dims = dims;
        Ok(dims)
    }

    pub async fn status(&self) -> VectorStatus {
        let state = self.state.lock().await;
        VectorStatus {
            enabled: self.enabled,
            available: state.available,
            extension_path: self.extension_path.clone(),
            dims: state.dims,
            load_error: state.load_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VectorConfig {
        VectorConfig::default()
    }

    #[tokio::test]
    async fn static_extension_is_available() {
        let index = VectorIndex::new(&config());
        let db = Database::open_in_memory().await.unwrap();
        assert!(index.prepare(&db).await);
        assert_eq!(index.status().await.available, Availability::Available);
        assert_eq!(index.ensure_dims(&db, 4).await.unwrap(), Some(4));
        assert_eq!(index.dims().await, Some(4));
    }

    #[tokio::test]
    async fn missing_extension_disables_for_good() {
        let index = VectorIndex::new(&VectorConfig {
            extension_path: Some("/nonexistent/vec0.so".into()),
            ..config()
        });
        let db = Database::open_in_memory().await.unwrap();
        assert!(!index.prepare(&db).await);
        assert!(!index.prepare(&db).await);
        let status = index.status().await;
        assert_eq!(status.available, Availability::Unavailable);
        assert!(status.load_error.is_some());
        assert_eq!(index.ensure_dims(&db, 4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn disabled_index_never_probes() {
        let index = VectorIndex::new(&VectorConfig {
            enabled: false,
            ..config()
        });
        let db = Database::open_in_memory().await.unwrap();
        assert!(!index.prepare(&db).await);
        assert_eq!(index.status().await.available, Availability::Unknown);
    }

    #[tokio::test]
    async fn dimension_change_recreates_tables() {
        register_vector_extension();
        let db = Database::open_in_memory().await.unwrap();
        let (dims, created, rows) = db
            .connection()
            .call(|conn| -> Result<(Vec<Option<usize>>, Vec<bool>, i64), rusqlite::Error> {
                let mut dims = vec![vec_table_dims(conn)?];
                let mut created = vec![ensure_vec_tables(conn, 3)?, ensure_vec_tables(conn, 3)?];
                upsert_vec(conn, CHUNKS_VEC, "a", &[1.0, 0.0, 0.0])?;
                upsert_vec(conn, CHUNKS_VEC, "a", &[0.0, 1.0, 0.0])?;
                dims.push(vec_table_dims(conn)?);
                created.push(ensure_vec_tables(conn, 5)?);
                dims.push(vec_table_dims(conn)?);
                let rows = conn.query_row("SELECT COUNT(*) FROM chunks_vec", [], |row| row.get(0))?;
                Ok((dims, created, rows))
            })
            .await
            .unwrap();
        assert_eq!(dims, vec![None, Some(3), Some(5)]);
        assert_eq!(created, vec![true, false, true]);
        assert_eq!(rows, 0);
    }

    #[test]
    fn parses_dims_from_schema_sql() {
        let sql = "CREATE VIRTUAL TABLE chunks_vec USING vec0(id TEXT PRIMARY KEY, embedding float[1536])";
        let dims: Option<usize> = DIMS
            .captures(sql)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        assert_eq!(dims, Some(1536));
    }
}
