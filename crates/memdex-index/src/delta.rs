// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Growth tracking for append-only session transcripts.
//!
//! Each file accumulates pending bytes and messages (newlines) since it was
//! last indexed. Crossing a threshold marks it dirty and consumes only the
//! threshold's worth of pending state.

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use memdex_config::model::SessionSyncConfig;
use memdex_core::MemdexError;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DeltaState {
    last_size: u64,
    pending_bytes: u64,
    pending_messages: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    files: HashMap<PathBuf, DeltaState>,
    dirty: HashSet<PathBuf>,
}

/// Decides when a session file has grown enough to re-index.
#[derive(Debug)]
pub struct SessionDeltaTracker {
    delta_bytes: u64,
    delta_messages: u64,
    state: Mutex<TrackerState>,
}

impl SessionDeltaTracker {
    pub fn new(config: &SessionSyncConfig) -> Self {
        Self {
            delta_bytes: config.delta_bytes,
            delta_messages: config.delta_messages,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Folds the file's current size into its pending counters. Returns true
    /// if this observation made the file dirty.
    pub async fn observe(&self, path: &Path) -> Result<bool, MemdexError> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut state = self.state.lock().await;
                state.files.remove(path);
                state.dirty.remove(path);
                return Ok(false);
            }
            Err(e) => return Err(MemdexError::io(path, e)),
        };

        let previous = self.state.lock().await.files.get(path).copied().unwrap_or_default();
        let (from, bytes) = if size < previous.last_size {
            // Truncated or rewritten: count from the start.
            (0, size)
        } else {
            (previous.last_size, size - previous.last_size)
        };
        if bytes == 0 && size >= previous.last_size {
            return Ok(false);
        }
        let messages = count_newlines(path, from, size).await?;

        let mut state = self.state.lock().await;
        let entry = state.files.entry(path.to_path_buf()).or_default();
        if size < entry.last_size {
            *entry = DeltaState::default();
        }
        entry.last_size = size;
        entry.pending_bytes += bytes;
        entry.pending_messages += messages;

        let bytes_hit = crossed(entry.pending_bytes, self.delta_bytes);
        let messages_hit = crossed(entry.pending_messages, self.delta_messages);
        if !bytes_hit && !messages_hit {
            return Ok(false);
        }
        if bytes_hit {
            entry.pending_bytes = consume(entry.pending_bytes, self.delta_bytes);
        }
        if messages_hit {
            entry.pending_messages = consume(entry.pending_messages, self.delta_messages);
        }
        debug!(
            path = %path.display(),
            pending_bytes = entry.pending_bytes,
            pending_messages = entry.pending_messages,
            "session transcript dirty"
        );
        state.dirty.insert(path.to_path_buf());
        Ok(true)
    }

    pub async fn is_dirty(&self, path: &Path) -> bool {
        self.state.lock().await.dirty.contains(path)
    }

    /// Paths waiting for a re-index.
    pub async fn dirty_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.lock().await.dirty.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Records a completed index of `path` at `size` bytes.
    pub async fn mark_indexed(&self, path: &Path, size: u64) {
        let mut state = self.state.lock().await;
        state.dirty.remove(path);
        state.files.insert(
            path.to_path_buf(),
            DeltaState {
                last_size: size,
                ..DeltaState::default()
            },
        );
    }

    /// Forgets everything, e.g. after a full reindex rebuilt all sessions.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.files.clear();
        state.dirty.clear();
    }
}

/// A zero threshold means any growth counts.
fn crossed(pending: u64, threshold: u64) -> bool {
    if threshold == 0 {
        pending > 0
    } else {
        pending >= threshold
    }
}

fn consume(pending: u64, threshold: u64) -> u64 {
    if threshold == 0 {
        0
    } else {
        pending.saturating_sub(threshold)
    }
}

async fn count_newlines(path: &Path, from: u64, to: u64) -> Result<u64, MemdexError> {
    if to <= from {
        return Ok(0);
    }
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| MemdexError::io(path, e))?;
    file.seek(SeekFrom::Start(from))
        .await
        .map_err(|e| MemdexError::io(path, e))?;

    let mut remaining = to - from;
    let mut buf = vec![0u8; READ_CHUNK];
    let mut newlines = 0u64;
    while remaining > 0 {
        let want = remaining.min(READ_CHUNK as u64) as usize;
        let n = file
            .read(&mut buf[..want])
            .await
            .map_err(|e| MemdexError::io(path, e))?;
        if n == 0 {
            break;
        }
        newlines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        remaining -= n as u64;
    }
    Ok(newlines)
}
