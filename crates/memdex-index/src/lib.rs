// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-agent hybrid memory index.
//!
//! Indexes markdown memory files, session transcripts and ad-hoc documents
//! into one SQLite store and answers natural-language queries with a
//! token-budgeted, diversity-aware set of snippets.
//!
//! ## Architecture
//!
//! - **chunker / summary**: markdown-aware chunking, L0 abstracts, heuristic L1
//! - **embedding / cache**: cached, batched, retried embedding calls
//! - **vector / keyword**: sqlite-vec ANN (brute-force fallback) and FTS5 BM25
//! - **hybrid / mmr / hierarchical**: fusion, decay, dedup, thresholds, MMR,
//!   two-phase file-then-chunk search
//! - **delta / l1**: session growth tracking and background L1 overviews
//! - **sync**: serialized incremental sync and atomic full reindex
//! - **MemoryIndexManager**: search / sync / index_content / status facade
//! - **IndexRegistry**: shared instances keyed by configuration fingerprint

pub mod cache;
pub mod chunker;
pub mod delta;
pub mod embedding;
mod engine;
pub mod hierarchical;
pub mod hybrid;
pub mod indexer;
pub mod keyword;
pub mod l1;
pub mod manager;
pub mod metrics;
pub mod mmr;
pub mod registry;
mod search;
pub mod sources;
pub mod store;
pub mod summary;
mod sync;
pub mod types;
pub mod vector;
mod watcher;

pub use manager::{FileExcerpt, MemoryIndexManager};
pub use registry::{fingerprint, IndexRegistry};
pub use store::{IndexStore, Scope};
pub use types::*;
