// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-phase search: pick relevant files by their abstracts, then search
//! chunks inside those files only.
//!
//! Phase 2 walks files best-first and stops once the top-K chunk ids have
//! been stable for `convergence_rounds` consecutive files.

use std::collections::HashMap;

use async_trait::async_trait;
use memdex_config::model::HierarchicalConfig;
use memdex_core::MemdexError;
use tracing::debug;

use crate::hybrid::sorted;
use crate::store::Scope;
use crate::types::{ChunkHit, FileHit};

/// Outcome of the file filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilePlan {
    /// Files to scan, best-first.
    Files(Vec<FileHit>),
    /// No file-level signal; run a flat chunk search instead.
    Bypass,
}

/// Fuses file-level vector and keyword hits and keeps the files above the
/// file threshold, falling back to the floor and then to the single best
/// file with a positive score.
pub fn plan_files(vector: Vec<FileHit>, keyword: Vec<FileHit>, config: &HierarchicalConfig) -> FilePlan {
    let fused = fuse_files(vector, keyword, config.file_vector_weight, config.file_text_weight);
    if fused.is_empty() {
        return FilePlan::Bypass;
    }

    let above = |threshold: f32| -> Vec<FileHit> {
        fused.iter().filter(|f| f.score >= threshold).cloned().collect()
    };
    let mut files = above(config.file_min_score);
    if files.is_empty() {
        files = above(config.file_floor_score);
    }
    if files.is_empty() {
        match fused.first() {
            Some(best) if best.score > 0.0 => files.push(best.clone()),
            _ => return FilePlan::Bypass,
        }
    }
    files.truncate(config.max_files.max(1));
    FilePlan::Files(files)
}

fn fuse_files(
    vector: Vec<FileHit>,
    keyword: Vec<FileHit>,
    vector_weight: f32,
    text_weight: f32,
) -> Vec<FileHit> {
    let weighted = !vector.is_empty() && !keyword.is_empty();
    let (vw, tw) = if weighted { (vector_weight, text_weight) } else { (1.0, 1.0) };

    let mut fused: HashMap<Scope, f32> = HashMap::new();
    for hit in vector {
        *fused.entry(Scope::new(hit.path, hit.source)).or_default() += vw * hit.score;
    }
    for hit in keyword {
        *fused.entry(Scope::new(hit.path, hit.source)).or_default() += tw * hit.score;
    }

    let mut files: Vec<FileHit> = fused
        .into_iter()
        .map(|(scope, score)| FileHit {
            path: scope.path,
            source: scope.source,
            score,
        })
        .collect();
    files.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| (&a.source, &a.path).cmp(&(&b.source, &b.path)))
    });
    files
}

/// Chunk search restricted to one document.
#[async_trait]
pub trait FileScopedSearch: Send + Sync {
    async fn search_file(&self, scope: &Scope, limit: usize) -> Result<Vec<ChunkHit>, MemdexError>;
}

/// Phase 2. Scores are propagated as `alpha * chunk + (1 - alpha) * file`.
///
/// `pool` is the total number of chunk candidates wanted and `top_k` the
/// window checked for convergence. Returns every collected chunk, best-first.
pub async fn search_within_files(
    files: &[FileHit],
    searcher: &dyn FileScopedSearch,
    pool: usize,
    top_k: usize,
    config: &HierarchicalConfig,
) -> Result<Vec<ChunkHit>, MemdexError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let per_file = pool
        .div_ceil(files.len())
        .min(config.max_chunks_per_file)
        .max(1);
    let alpha = config.alpha;

    let mut collected: HashMap<String, ChunkHit> = HashMap::new();
    let mut previous_top: Option<Vec<String>> = None;
    let mut stable_rounds = 0usize;

    for (round, file) in files.iter().enumerate() {
        let scope = Scope::new(file.path.clone(), file.source.clone());
        for mut hit in searcher.search_file(&scope, per_file).await? {
            hit.score = alpha * hit.score + (1.0 - alpha) * file.score;
            match collected.get(&hit.id) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    collected.insert(hit.id.clone(), hit);
                }
            }
        }

        let top = top_ids(&collected, top_k);
        if previous_top.as_ref() == Some(&top) {
            stable_rounds += 1;
        } else {
            stable_rounds = 0;
        }
        previous_top = Some(top);
        if config.convergence_rounds > 0 && stable_rounds >= config.convergence_rounds {
            debug!(
                scanned = round + 1,
                files = files.len(),
                "hierarchical search converged"
            );
            break;
        }
    }

    let mut hits = sorted(collected.into_values().collect());
    hits.truncate(pool.max(top_k));
    Ok(hits)
}

fn top_ids(collected: &HashMap<String, ChunkHit>, k: usize) -> Vec<String> {
    let mut scored: Vec<(&String, f32)> = collected.iter().map(|(id, h)| (id, h.score)).collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.into_iter().take(k).map(|(id, _)| id.clone()).collect()
}
