// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throwaway agent workspaces for integration tests.
//!
//! `TempWorkspace` owns a temp directory holding both the memory sources and
//! the index file, and builds a configuration pointing at them with every
//! background trigger switched off.

use std::io::Write;
use std::path::{Path, PathBuf};

use memdex_config::MemdexConfig;
use tempfile::TempDir;

pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp workspace"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where [`Self::config`] puts the index.
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("index").join("memory.sqlite")
    }

    /// Writes `content` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write workspace file");
        path
    }

    /// Appends `content` to `rel`, creating it if needed.
    pub fn append(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .expect("open workspace file");
        file.write_all(content.as_bytes()).expect("append workspace file");
        path
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.dir.path().join(rel)).expect("remove workspace file");
    }

    /// A configuration for this workspace: no watcher, no interval or
    /// on-search syncs, no score thresholds and no vector extension.
    pub fn config(&self) -> MemdexConfig {
        let mut config = MemdexConfig::default();
        config.store.agent_id = "test".into();
        config.store.path = Some(self.db_path().to_string_lossy().into_owned());
        config.store.workspace_dir = self.dir.path().to_string_lossy().into_owned();
        config.vector.enabled = false;
        config.sync.watch = false;
        config.sync.on_search = false;
        config.sync.on_session_start = false;
        config.sync.interval_minutes = 0;
        config.query.min_score = 0.0;
        config.query.floor_score = 0.0;
        config.l1.enabled = false;
        config
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
