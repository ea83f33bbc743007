// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index domain types: persisted records, the configuration fingerprint and
//! the vector encoding helpers shared by every store module.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Meta key of the singleton fingerprint row.
pub const META_KEY: &str = "memory_index_meta_v1";

/// One indexed logical document.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Logical, source-relative path.
    pub path: String,
    pub source: String,
    /// Content digest.
    pub hash: String,
    /// Milliseconds since the Unix epoch.
    pub mtime: i64,
    pub size: i64,
    pub l0_abstract: Option<String>,
    pub l0_embedding: Option<Vec<f32>>,
}

/// One embedded chunk of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Deterministic id, see [`chunk_id`].
    pub id: String,
    pub path: String,
    pub source: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    /// Digest of `text`.
    pub hash: String,
    pub model: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
    pub l0_abstract: Option<String>,
    pub l1_overview: Option<String>,
}

/// A chunk returned by a vector or keyword lookup, with its raw score.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub id: String,
    pub path: String,
    pub source: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub updated_at: i64,
    pub embedding: Vec<f32>,
    pub l0_abstract: Option<String>,
    pub l1_overview: Option<String>,
    pub score: f32,
}

/// A document returned by a file-level lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHit {
    pub path: String,
    pub source: String,
    pub score: f32,
}

/// Fingerprint of the settings every vector in one index was produced with.
///
/// Any mismatch against the live configuration forces a full reindex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub provider: String,
    pub model: String,
    pub provider_key: String,
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_dims: Option<usize>,
}

impl IndexMeta {
    /// True when both fingerprints were produced by the same provider,
    /// model and chunking settings. Dimensions are compared separately.
    pub fn same_settings(&self, other: &IndexMeta) -> bool {
        self.provider == other.provider
            && self.model == other.model
            && self.provider_key == other.provider_key
            && self.chunk_tokens == other.chunk_tokens
            && self.chunk_overlap == other.chunk_overlap
    }
}

/// Hex SHA-256 of a text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk id.
///
/// Changes iff the chunk text (through its hash), its span, or the embedding
/// model changes, so re-inserting an unchanged chunk is an idempotent upsert.
pub fn chunk_id(
    source: &str,
    path: &str,
    start_line: usize,
    end_line: usize,
    chunk_hash: &str,
    model: &str,
) -> String {
    hash_text(&format!(
        "{source}|{path}|{start_line}|{end_line}|{chunk_hash}|{model}"
    ))
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert f32 vector to bytes for SQLite BLOB storage (little-endian).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector. Trailing partial floats are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity. Mismatched lengths or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rough token estimate used for budgets (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
