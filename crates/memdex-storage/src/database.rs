// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::{Path, PathBuf};
use std::sync::Once;

use memdex_core::MemdexError;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::migrations::run_migrations;

static VEC_EXTENSION: Once = Once::new();

/// Converts tokio-rusqlite errors into [`MemdexError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> MemdexError {
    MemdexError::Storage {
        source: Box::new(e),
    }
}

fn map_call_err(e: tokio_rusqlite::Error<MemdexError>) -> MemdexError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner,
        other => MemdexError::Storage {
            source: format!("{other}").into(),
        },
    }
}

/// Registers the statically linked sqlite-vec extension for every
/// connection opened afterwards in this process. Idempotent.
pub fn register_vector_extension() {
    VEC_EXTENSION.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the extension entry point exported by
        // the sqlite-vec crate. `sqlite3_auto_extension` takes it as the
        // untyped `Option<unsafe extern "C" fn()>` SQLite stores internally.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
        debug!("sqlite-vec registered as auto extension");
    });
}

/// One SQLite store file with its single writer connection.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Opens (or creates) the store at `path`, applies PRAGMAs and migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MemdexError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemdexError::io(parent, e))?;
        }

        let conn = Connection::open(&path)
            .await
            .map_err(|e| MemdexError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn, path };
        db.initialize().await?;
        debug!(path = %db.path.display(), "index store opened");
        Ok(db)
    }

    /// Opens a private in-memory store. Used by tests.
    pub async fn open_in_memory() -> Result<Self, MemdexError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| MemdexError::Storage {
                source: Box::new(e),
            })?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<(), MemdexError> {
        self.conn
            .call(|conn| -> Result<(), MemdexError> {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;
                     PRAGMA foreign_keys = ON;",
                )
                .map_err(|e| MemdexError::Storage {
                    source: Box::new(e),
                })?;
                run_migrations(conn)
            })
            .await
            .map_err(map_call_err)
    }

    /// The single writer connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Path of the store file (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Folds the WAL back into the main file.
    pub async fn checkpoint(&self) -> Result<(), MemdexError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoints the WAL and closes the connection.
    ///
    /// Every clone of this `Database` shares the connection, so later calls on
    /// any of them fail.
    pub async fn close(&self) -> Result<(), MemdexError> {
        self.checkpoint().await?;
        self.conn.clone().close().await.map_err(map_tr_err)?;
        debug!(path = %self.path.display(), "index store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_names(db: &Database) -> Vec<String> {
        db.connection()
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nested/index.sqlite"))
            .await
            .unwrap();
        let names = table_names(&db).await;
        for table in ["ad_hoc_documents", "chunks", "embedding_cache", "files", "meta"] {
            assert!(names.iter().any(|n| n == table), "missing {table}: {names:?}");
        }
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopen_keeps_data_and_skips_applied_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");

        let db = Database::open(&path).await.unwrap();
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('k', 'v')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        db.close().await.unwrap();

        let db = Database::open(&path).await.unwrap();
        let value: String = db
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("SELECT value FROM meta WHERE key = 'k'", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(value, "v");
    }

    #[tokio::test]
    async fn closed_database_rejects_calls() {
        let db = Database::open_in_memory().await.unwrap();
        let clone = db.clone();
        db.close().await.unwrap();
        assert!(clone.checkpoint().await.is_err());
    }

    #[tokio::test]
    async fn vector_extension_registers_once() {
        register_vector_extension();
        register_vector_extension();
        let db = Database::open_in_memory().await.unwrap();
        let version: String = db
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("SELECT vec_version()", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert!(version.starts_with('v'));
    }
}
