// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value types shared between the index and its callers.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Source tag for markdown memory files.
pub const SOURCE_MEMORY: &str = "memory";

/// Source tag for append-only session transcripts.
pub const SOURCE_SESSIONS: &str = "sessions";

/// A ranked hit returned by search. Ephemeral, computed per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk id.
    pub id: String,
    /// Logical, source-relative path of the document.
    pub path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub source: String,
    pub snippet: String,
    pub score: f32,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l0_abstract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_overview: Option<String>,
}

/// Per-call search overrides. `None` falls back to the configured default.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub max_results: Option<usize>,
    pub min_score: Option<f32>,
    /// Token budget for the diversity selector (~4 chars per token).
    pub token_budget: Option<usize>,
    /// Session the query comes from; used for warm-up sync triggers.
    pub session_key: Option<String>,
}

/// A single-document indexing request for non-filesystem callers.
#[derive(Debug, Clone)]
pub struct IndexContentRequest {
    pub path: String,
    pub text: String,
    /// Reindex even if the content hash is unchanged.
    pub force: bool,
    /// Source tag; defaults to [`SOURCE_MEMORY`].
    pub source: Option<String>,
}

/// Outcome of [`IndexContentRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexContentOutcome {
    pub chunks_indexed: usize,
    pub skipped: bool,
}

/// Progress of a running sync, reported after each document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    pub label: Option<String>,
}

/// Callback receiving [`SyncProgress`] updates.
pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// What a sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub reason: String,
    pub full_reindex: bool,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
}

/// Tri-state availability of an optional native capability.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum Availability {
    /// Not probed yet.
    #[default]
    Unknown,
    Available,
    Unavailable,
}

/// Vector extension state as reported by `status()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStatus {
    pub enabled: bool,
    pub available: Availability,
    pub extension_path: Option<PathBuf>,
    pub dims: Option<usize>,
    pub load_error: Option<String>,
}

/// Full-text index state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsStatus {
    pub enabled: bool,
    pub available: bool,
    pub error: Option<String>,
}

/// Embedding cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: Option<usize>,
}

/// Batch-API statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub enabled: bool,
    pub failures: usize,
    pub limit: usize,
    pub last_error: Option<String>,
}

/// Snapshot of an index returned by `status()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub files: usize,
    pub chunks: usize,
    /// `(source, files, chunks)` per source tag.
    pub sources: Vec<(String, usize, usize)>,
    pub dirty: bool,
    pub workspace_dir: PathBuf,
    pub db_path: PathBuf,
    pub provider: String,
    pub model: String,
    pub provider_key: String,
    pub fallback_from: Option<String>,
    pub fallback_reason: Option<String>,
    pub vector: VectorStatus,
    pub fts: FtsStatus,
    pub cache: CacheStats,
    pub batch: BatchStats,
    pub l1_queue: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn availability_round_trips_through_strings() {
        assert_eq!(Availability::Unknown.to_string(), "unknown");
        assert_eq!(Availability::from_str("available").unwrap(), Availability::Available);
        assert_eq!(Availability::from_str("unavailable").unwrap(), Availability::Unavailable);
        assert!(Availability::from_str("maybe").is_err());
    }

    #[test]
    fn search_result_omits_empty_summaries() {
        let result = SearchResult {
            id: "c1".into(),
            path: "memory/notes.md".into(),
            start_line: 1,
            end_line: 4,
            source: SOURCE_MEMORY.into(),
            snippet: "refund policy".into(),
            score: 0.9,
            timestamp: None,
            l0_abstract: None,
            l1_overview: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("l0_abstract"));
        assert!(json.contains("\"start_line\":1"));
    }

    #[test]
    fn default_report_is_empty() {
        let report = SyncReport::default();
        assert!(!report.full_reindex);
        assert_eq!(report.chunks_written, 0);
    }
}
