// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem watch on the memory sources.
//!
//! Raw notify events are debounced by `notify-debouncer-mini`; each
//! debounced batch touching a markdown file (or a directory) is forwarded as
//! one signal on a tokio channel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use memdex_core::MemdexError;
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keeps the OS watch alive; dropping it stops the watch.
pub(crate) struct SourceWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    roots: Vec<PathBuf>,
}

impl SourceWatcher {
    /// Watches `roots` and sends the changed paths of every relevant batch
    /// to `tx`. Returns `None` when there is nothing to watch.
    pub fn start(
        roots: Vec<PathBuf>,
        debounce: Duration,
        tx: mpsc::UnboundedSender<Vec<PathBuf>>,
    ) -> Result<Option<Self>, MemdexError> {
        if roots.is_empty() {
            debug!("no memory sources to watch");
            return Ok(None);
        }

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let changed: Vec<PathBuf> = events
                    .into_iter()
                    .map(|event| event.path)
                    .filter(|path| is_relevant(path))
                    .collect();
                if !changed.is_empty() {
                    let _ = tx.send(changed);
                }
            }
            Err(err) => warn!(error = %err, "memory watcher error"),
        })
        .map_err(|e| MemdexError::Internal(format!("failed to start memory watcher: {e}")))?;

        for root in &roots {
            let mode = if root.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            debouncer
                .watcher()
                .watch(root, mode)
                .map_err(|e| MemdexError::Internal(format!("failed to watch {}: {e}", root.display())))?;
        }
        info!(roots = roots.len(), debounce_ms = debounce.as_millis() as u64, "watching memory sources");
        Ok(Some(Self {
            _debouncer: debouncer,
            roots,
        }))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Markdown files, and extension-less paths that may be directories.
fn is_relevant(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case("md"),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn only_markdown_and_directories_are_relevant() {
        assert!(is_relevant(Path::new("/ws/memory/notes.md")));
        assert!(is_relevant(Path::new("/ws/MEMORY.MD")));
        assert!(is_relevant(Path::new("/ws/memory/projects")));
        assert!(!is_relevant(Path::new("/ws/memory/.notes.md.swp")));
        assert!(!is_relevant(Path::new("/ws/memory/image.png")));
    }

    #[tokio::test]
    #[traced_test]
    async fn nothing_to_watch_is_not_an_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = SourceWatcher::start(Vec::new(), Duration::from_millis(50), tx).unwrap();
        assert!(watcher.is_none());
        assert!(logs_contain("no memory sources to watch"));
    }

    #[tokio::test]
    async fn edits_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let memory = dir.path().join("memory");
        std::fs::create_dir_all(&memory).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = SourceWatcher::start(vec![memory.clone()], Duration::from_millis(50), tx)
            .unwrap()
            .unwrap();
        assert_eq!(watcher.roots(), &[memory.clone()]);

        std::fs::write(memory.join("notes.md"), "# Notes\n").unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("watch event")
            .unwrap();
        assert!(changed.iter().any(|p| p.ends_with("notes.md")));
    }
}
