// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed embedding cache.
//!
//! Entries are keyed by `(provider, model, provider_key, hash)` where `hash`
//! is the digest of the embedded text. Every operation is a no-op when the
//! cache is disabled.

use std::collections::HashMap;

use memdex_core::MemdexError;
use memdex_storage::{map_tr_err, Database};
use tracing::debug;

use crate::types::{blob_to_vec, now_ms, vec_to_blob};

/// Hashes per lookup statement, below SQLite's bound-parameter limit.
const LOAD_BATCH: usize = 400;

/// Cache scoped to one effective provider.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    enabled: bool,
    provider: String,
    model: String,
    provider_key: String,
}

impl EmbeddingCache {
    pub fn new(
        enabled: bool,
        provider: impl Into<String>,
        model: impl Into<String>,
        provider_key: impl Into<String>,
    ) -> Self {
        Self {
            enabled,
            provider: provider.into(),
            model: model.into(),
            provider_key: provider_key.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Looks up vectors for the given text hashes. Misses are simply absent.
    pub async fn load(
        &self,
        db: &Database,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>, MemdexError> {
        if !self.enabled || hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut unique: Vec<String> = hashes.to_vec();
        unique.sort();
        unique.dedup();

        let mut found = HashMap::with_capacity(unique.len());
        for batch in unique.chunks(LOAD_BATCH) {
            let mut params = vec![
                self.provider.clone(),
                self.model.clone(),
                self.provider_key.clone(),
            ];
            params.extend(batch.iter().cloned());

            let rows = db
                .connection()
                .call(move |conn| -> Result<Vec<(String, Vec<u8>)>, rusqlite::Error> {
                    let placeholders: Vec<String> =
                        (4..=params.len()).map(|i| format!("?{i}")).collect();
                    let sql = format!(
                        "SELECT hash, embedding FROM embedding_cache
                         WHERE provider = ?1 AND model = ?2 AND provider_key = ?3
                           AND hash IN ({})",
                        placeholders.join(", ")
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                            Ok((row.get(0)?, row.get(1)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await
                .map_err(map_tr_err)?;

            for (hash, blob) in rows {
                found.insert(hash, blob_to_vec(&blob));
            }
        }

        debug!(requested = unique.len(), hits = found.len(), "embedding cache lookup");
        Ok(found)
    }

    /// Inserts or replaces vectors, stamping them with the current time.
    pub async fn upsert(
        &self,
        db: &Database,
        entries: Vec<(String, Vec<f32>)>,
    ) -> Result<(), MemdexError> {
        self.upsert_at(db, entries, now_ms()).await
    }

    async fn upsert_at(
        &self,
        db: &Database,
        entries: Vec<(String, Vec<f32>)>,
        updated_at: i64,
    ) -> Result<(), MemdexError> {
        if !self.enabled || entries.is_empty() {
            return Ok(());
        }
        let provider = self.provider.clone();
        let model = self.model.clone();
        let provider_key = self.provider_key.clone();

        db.connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO embedding_cache
                            (provider, model, provider_key, hash, embedding, dims, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(provider, model, provider_key, hash) DO UPDATE SET
                            embedding = excluded.embedding,
                            dims = excluded.dims,
                            updated_at = excluded.updated_at",
                    )?;
                    for (hash, embedding) in &entries {
                        stmt.execute(rusqlite::params![
                            provider,
                            model,
                            provider_key,
                            hash,
                            vec_to_blob(embedding),
                            embedding.len() as i64,
                            updated_at,
                        ])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Deletes the oldest entries (across all providers) beyond `max_entries`.
    ///
    /// Returns the number of rows removed.
    pub async fn prune(&self, db: &Database, max_entries: usize) -> Result<usize, MemdexError> {
        if !self.enabled {
            return Ok(0);
        }
        let removed = db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
                let excess = count - max_entries as i64;
                if excess <= 0 {
                    return Ok(0);
                }
                conn.execute(
                    "DELETE FROM embedding_cache WHERE rowid IN (
                        SELECT rowid FROM embedding_cache ORDER BY updated_at ASC LIMIT ?1
                     )",
                    [excess],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if removed > 0 {
            debug!(removed, max_entries, "embedding cache pruned");
        }
        Ok(removed)
    }

    /// Number of entries in the whole cache table.
    pub async fn count(&self, db: &Database) -> Result<usize, MemdexError> {
        if !self.enabled {
            return Ok(0);
        }
        db.connection()
            .call(|conn| -> Result<usize, rusqlite::Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Copies every cache row of `from` into `to`, keeping timestamps.
    ///
    /// Used to give a freshly built store the vectors the live one already has.
    pub async fn seed(&self, from: &Database, to: &Database) -> Result<usize, MemdexError> {
        if !self.enabled {
            return Ok(0);
        }
        type Row = (String, String, String, String, Vec<u8>, i64, i64);
        let rows = from
            .connection()
            .call(|conn| -> Result<Vec<Row>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT provider, model, provider_key, hash, embedding, dims, updated_at
                     FROM embedding_cache",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)?;

        let copied = rows.len();
        to.connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO embedding_cache
                            (provider, model, provider_key, hash, embedding, dims, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )?;
                    for row in &rows {
                        stmt.execute(rusqlite::params![
                            row.0, row.1, row.2, row.3, row.4, row.5, row.6
                        ])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)?;
        debug!(copied, "embedding cache seeded");
        Ok(copied)
    }

    /// Dimensionality recorded for one cached hash, if present.
    #[cfg(test)]
    async fn dims_of(&self, db: &Database, hash: &str) -> Result<Option<usize>, MemdexError> {
        use rusqlite::OptionalExtension;

        if !self.enabled {
            return Ok(None);
        }
        let params = [
            self.provider.clone(),
            self.model.clone(),
            self.provider_key.clone(),
            hash.to_string(),
        ];
        db.connection()
            .call(move |conn| -> Result<Option<usize>, rusqlite::Error> {
                let dims: Option<i64> = conn
                    .query_row(
                        "SELECT dims FROM embedding_cache
                         WHERE provider = ?1 AND model = ?2 AND provider_key = ?3 AND hash = ?4",
                        rusqlite::params_from_iter(params.iter()),
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(dims.map(|d| d as usize))
            })
            .await
            .map_err(map_tr_err)
    }
}
