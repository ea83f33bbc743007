// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the memdex memory index.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level memdex configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemdexConfig {
    /// Where the index lives and whose it is.
    #[serde(default)]
    pub store: StoreConfig,

    /// Which documents get indexed.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Chunk window and overlap.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding call batching, retries and timeouts.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Provider-native batch API usage.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Content-addressed embedding cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Optional ANN extension.
    #[serde(default)]
    pub vector: VectorConfig,

    /// BM25 keyword index.
    #[serde(default)]
    pub keyword: KeywordConfig,

    /// Search-time ranking parameters.
    #[serde(default)]
    pub query: QueryConfig,

    /// Background sync triggers.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Background L1 overview generation.
    #[serde(default)]
    pub l1: L1Config,
}

/// Location of the on-disk index.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Agent owning this index. Substituted for `{agent_id}` in `path`.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Database file. Defaults to `<data dir>/memdex/{agent_id}.sqlite`.
    #[serde(default)]
    pub path: Option<String>,

    /// Root that logical document paths are relative to.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            path: None,
            workspace_dir: default_workspace_dir(),
        }
    }
}

impl StoreConfig {
    /// Resolves the database path, expanding `{agent_id}`.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path.replace("{agent_id}", &self.agent_id)),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("memdex")
                .join(format!("{}.sqlite", self.agent_id)),
        }
    }
}

fn default_agent_id() -> String {
    "main".to_string()
}

fn default_workspace_dir() -> String {
    ".".to_string()
}

/// Document sources.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    /// Index `MEMORY.md` and the memory directory.
    #[serde(default = "default_true")]
    pub memory: bool,

    /// Index session transcripts.
    #[serde(default)]
    pub sessions: bool,

    /// Memory directory, relative to the workspace.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,

    /// Extra markdown files or directories indexed as memory.
    #[serde(default)]
    pub extra_paths: Vec<String>,

    /// Directory holding `*.jsonl` session transcripts.
    #[serde(default)]
    pub sessions_dir: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            memory: true,
            sessions: false,
            memory_dir: default_memory_dir(),
            extra_paths: Vec::new(),
            sessions_dir: None,
        }
    }
}

fn default_memory_dir() -> String {
    "memory".to_string()
}

/// Chunking window. Tokens are approximated as 4 characters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub tokens: usize,

    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokens: default_chunk_tokens(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    400
}

fn default_chunk_overlap() -> usize {
    80
}

/// Non-batch embedding path.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Approximate token ceiling per `embed_batch` call.
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,

    /// Attempts per batch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_query_timeout_remote_secs")]
    pub query_timeout_remote_secs: u64,

    #[serde(default = "default_query_timeout_local_secs")]
    pub query_timeout_local_secs: u64,

    #[serde(default = "default_batch_timeout_remote_secs")]
    pub batch_timeout_remote_secs: u64,

    #[serde(default = "default_batch_timeout_local_secs")]
    pub batch_timeout_local_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_batch_tokens: default_max_batch_tokens(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            query_timeout_remote_secs: default_query_timeout_remote_secs(),
            query_timeout_local_secs: default_query_timeout_local_secs(),
            batch_timeout_remote_secs: default_batch_timeout_remote_secs(),
            batch_timeout_local_secs: default_batch_timeout_local_secs(),
        }
    }
}

fn default_max_batch_tokens() -> usize {
    8000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_query_timeout_remote_secs() -> u64 {
    60
}

fn default_query_timeout_local_secs() -> u64 {
    300
}

fn default_batch_timeout_remote_secs() -> u64 {
    120
}

fn default_batch_timeout_local_secs() -> u64 {
    600
}

/// Provider-native batch API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Wait for submitted jobs to finish (otherwise fall back immediately).
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Worker concurrency while batch mode is active.
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_batch_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Failures after which the batch API is abandoned for the process.
    #[serde(default = "default_failure_limit")]
    pub failure_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            wait: true,
            concurrency: default_batch_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_minutes: default_batch_timeout_minutes(),
            failure_limit: default_failure_limit(),
        }
    }
}

fn default_batch_concurrency() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_batch_timeout_minutes() -> u64 {
    60
}

fn default_failure_limit() -> usize {
    2
}

/// Embedding cache.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Oldest entries beyond this ceiling are pruned after a full reindex.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: None,
        }
    }
}

/// Optional ANN extension (sqlite-vec).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dynamic library to load instead of the statically linked extension.
    #[serde(default)]
    pub extension_path: Option<String>,

    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extension_path: None,
            load_timeout_secs: default_load_timeout_secs(),
        }
    }
}

fn default_load_timeout_secs() -> u64 {
    30
}

/// Full-text (FTS5) keyword index.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordConfig {
    /// When off, no `chunks_fts`/`files_fts` rows are written and search is
    /// vector-only.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Search ranking.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Base similarity threshold.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Retry threshold used when nothing clears `min_score`.
    #[serde(default = "default_floor_score")]
    pub floor_score: f32,

    /// Candidate pool size as a multiple of `max_results`.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    #[serde(default)]
    pub hybrid: HybridConfig,

    #[serde(default)]
    pub decay: DecayConfig,

    #[serde(default)]
    pub mmr: MmrConfig,

    #[serde(default)]
    pub hierarchical: HierarchicalConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_score: default_min_score(),
            floor_score: default_floor_score(),
            candidate_multiplier: default_candidate_multiplier(),
            hybrid: HybridConfig::default(),
            decay: DecayConfig::default(),
            mmr: MmrConfig::default(),
            hierarchical: HierarchicalConfig::default(),
        }
    }
}

fn default_max_results() -> usize {
    6
}

fn default_min_score() -> f32 {
    0.35
}

fn default_floor_score() -> f32 {
    0.2
}

fn default_candidate_multiplier() -> usize {
    4
}

/// Vector + keyword fusion weights.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HybridConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_text_weight")]
    pub text_weight: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
        }
    }
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_text_weight() -> f32 {
    0.3
}

/// Exponential time decay applied to fused scores.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DecayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `score *= exp(-lambda * age_hours)`.
    #[serde(default = "default_decay_lambda")]
    pub lambda_per_hour: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda_per_hour: default_decay_lambda(),
        }
    }
}

fn default_decay_lambda() -> f64 {
    // ~29 day half-life
    0.001
}

/// Maximal Marginal Relevance selection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MmrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Relevance vs novelty trade-off (1.0 = pure relevance).
    #[serde(default = "default_mmr_lambda")]
    pub lambda: f32,

    /// Selection stops once the best marginal gain drops below this.
    #[serde(default)]
    pub min_gain: f32,

    /// Default token budget for one result set.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: default_mmr_lambda(),
            min_gain: 0.0,
            token_budget: default_token_budget(),
        }
    }
}

fn default_mmr_lambda() -> f32 {
    0.7
}

fn default_token_budget() -> usize {
    4000
}

/// Two-phase file → chunk search.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchicalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_file_vector_weight")]
    pub file_vector_weight: f32,

    #[serde(default = "default_file_text_weight")]
    pub file_text_weight: f32,

    #[serde(default = "default_file_min_score")]
    pub file_min_score: f32,

    #[serde(default = "default_file_floor_score")]
    pub file_floor_score: f32,

    /// Upper bound on files scanned in phase 2.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// `final = alpha * chunk + (1 - alpha) * file`.
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Stable top-K rounds before stopping early.
    #[serde(default = "default_convergence_rounds")]
    pub convergence_rounds: usize,

    /// Ceiling on per-file chunk candidates.
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,
}

impl Default for HierarchicalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file_vector_weight: default_file_vector_weight(),
            file_text_weight: default_file_text_weight(),
            file_min_score: default_file_min_score(),
            file_floor_score: default_file_floor_score(),
            max_files: default_max_files(),
            alpha: default_alpha(),
            convergence_rounds: default_convergence_rounds(),
            max_chunks_per_file: default_max_chunks_per_file(),
        }
    }
}

fn default_file_vector_weight() -> f32 {
    0.6
}

fn default_file_text_weight() -> f32 {
    0.4
}

fn default_file_min_score() -> f32 {
    0.3
}

fn default_file_floor_score() -> f32 {
    0.15
}

fn default_max_files() -> usize {
    10
}

fn default_alpha() -> f32 {
    0.7
}

fn default_convergence_rounds() -> usize {
    2
}

fn default_max_chunks_per_file() -> usize {
    8
}

/// Background sync triggers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Request a background sync when searching a dirty index.
    #[serde(default = "default_true")]
    pub on_search: bool,

    /// Request a sync the first time a session is seen.
    #[serde(default = "default_true")]
    pub on_session_start: bool,

    /// Watch memory sources for changes.
    #[serde(default = "default_true")]
    pub watch: bool,

    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// Fixed-interval sync; 0 disables it.
    #[serde(default)]
    pub interval_minutes: u64,

    /// Indexing workers per sync.
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub sessions: SessionSyncConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            on_search: true,
            on_session_start: true,
            watch: true,
            watch_debounce_ms: default_watch_debounce_ms(),
            interval_minutes: 0,
            concurrency: default_sync_concurrency(),
            sessions: SessionSyncConfig::default(),
        }
    }
}

fn default_watch_debounce_ms() -> u64 {
    1500
}

fn default_sync_concurrency() -> usize {
    4
}

/// Session transcript delta thresholds. Zero means any growth counts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSyncConfig {
    #[serde(default = "default_delta_bytes")]
    pub delta_bytes: u64,

    #[serde(default = "default_delta_messages")]
    pub delta_messages: u64,

    #[serde(default = "default_session_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SessionSyncConfig {
    fn default() -> Self {
        Self {
            delta_bytes: default_delta_bytes(),
            delta_messages: default_delta_messages(),
            debounce_ms: default_session_debounce_ms(),
        }
    }
}

fn default_delta_bytes() -> u64 {
    100_000
}

fn default_delta_messages() -> u64 {
    50
}

fn default_session_debounce_ms() -> u64 {
    5000
}

/// L1 overview generator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct L1Config {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Use the injected LLM invoker instead of heuristic extraction.
    #[serde(default)]
    pub use_llm: bool,

    #[serde(default = "default_l1_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_l1_batch_size")]
    pub batch_size: usize,

    /// Hard cap; the oldest job is dropped on overflow.
    #[serde(default = "default_l1_max_queue")]
    pub max_queue: usize,

    /// Minimum spacing between LLM calls.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,

    #[serde(default = "default_l1_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            enabled: true,
            use_llm: false,
            interval_ms: default_l1_interval_ms(),
            batch_size: default_l1_batch_size(),
            max_queue: default_l1_max_queue(),
            min_call_interval_ms: default_min_call_interval_ms(),
            max_chars: default_l1_max_chars(),
            llm_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_l1_interval_ms() -> u64 {
    2000
}

fn default_l1_batch_size() -> usize {
    4
}

fn default_l1_max_queue() -> usize {
    500
}

fn default_min_call_interval_ms() -> u64 {
    1000
}

fn default_l1_max_chars() -> usize {
    2000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
