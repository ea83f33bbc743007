// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The query pipeline.
//!
//! query embedding -> (optional file-level pass) -> vector + keyword
//! candidates -> fusion -> time decay -> dedup -> threshold with floor ->
//! MMR or plain budget selection.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use memdex_core::{MemdexError, SearchOptions, SearchResult};
use tracing::{debug, warn};

use crate::engine::IndexEngine;
use crate::hierarchical::{plan_files, search_within_files, FilePlan, FileScopedSearch};
use crate::hybrid::{apply_time_decay, dedup_snippets, merge_hybrid};
use crate::keyword::build_fts_query;
use crate::metrics::record_search_latency;
use crate::mmr::{budget_select, mmr_select, threshold_filter, MmrParams};
use crate::store::{IndexStore, Scope};
use crate::types::{now_ms, ChunkHit, FileHit};

/// Upper bound on the candidate pool of one query.
const MAX_CANDIDATES: usize = 200;

/// Chunk retrieval against one store snapshot with a prepared query.
struct ChunkSearch {
    store: Arc<IndexStore>,
    query: Option<Vec<f32>>,
    match_expr: Option<String>,
    model: String,
    ann: bool,
    vector_weight: f32,
    text_weight: f32,
}

impl ChunkSearch {
    /// Vector and keyword candidates fused. One failing side degrades to
    /// the other; only when both fail is the error returned.
    async fn search(&self, scope: Option<&Scope>, limit: usize) -> Result<Vec<ChunkHit>, MemdexError> {
        let vector = match &self.query {
            Some(query) => Some(
                self.store
                    .search_vector(query.clone(), self.model.clone(), limit, scope.cloned(), self.ann)
                    .await,
            ),
            None => None,
        };
        let keyword = match &self.match_expr {
            Some(expr) => Some(
                self.store
                    .search_keyword(expr.clone(), self.model.clone(), limit, scope.cloned())
                    .await,
            ),
            None => None,
        };
        let (vector, keyword) = settle(vector, keyword, "chunk")?;
        Ok(merge_hybrid(vector, keyword, self.vector_weight, self.text_weight))
    }

    /// File-level candidates for the first hierarchical phase.
    async fn files(&self, limit: usize) -> Result<(Vec<FileHit>, Vec<FileHit>), MemdexError> {
        let vector = match &self.query {
            Some(query) => Some(self.store.search_files_vector(query.clone(), limit, self.ann).await),
            None => None,
        };
        let keyword = match &self.match_expr {
            Some(expr) => Some(self.store.search_files_keyword(expr.clone(), limit).await),
            None => None,
        };
        settle(vector, keyword, "file")
    }
}

/// Turns the two candidate lists into plain vectors, logging and dropping a
/// failed side. Errors only when every side that ran failed.
fn settle<T>(
    vector: Option<Result<Vec<T>, MemdexError>>,
    keyword: Option<Result<Vec<T>, MemdexError>>,
    level: &'static str,
) -> Result<(Vec<T>, Vec<T>), MemdexError> {
    let mut ran = 0;
    let mut failed = Vec::new();
    let mut take = |side: Option<Result<Vec<T>, MemdexError>>, kind: &'static str| match side {
        None => Vec::new(),
        Some(Ok(hits)) => {
            ran += 1;
            hits
        }
        Some(Err(e)) => {
            ran += 1;
            warn!(error = %e, tier = level, "{kind} search failed");
            failed.push(e);
            Vec::new()
        }
    };
    let vector = take(vector, "vector");
    let keyword = take(keyword, "keyword");
    if ran > 0 && failed.len() == ran {
        return Err(failed.swap_remove(0));
    }
    Ok((vector, keyword))
}

#[async_trait]
impl FileScopedSearch for ChunkSearch {
    async fn search_file(&self, scope: &Scope, limit: usize) -> Result<Vec<ChunkHit>, MemdexError> {
        self.search(Some(scope), limit).await
    }
}

impl IndexEngine {
    pub(crate) async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, MemdexError> {
        self.ensure_open()?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let settings = &self.config.query;
        let max_results = options.max_results.unwrap_or(settings.max_results).max(1);
        let min_score = options.min_score.unwrap_or(settings.min_score);
        let floor_score = settings.floor_score.min(min_score);
        let token_budget = options.token_budget.unwrap_or(settings.mmr.token_budget);
        let pool = (max_results * settings.candidate_multiplier.max(1))
            .min(MAX_CANDIDATES)
            .max(max_results);

        let embedder = self.embedder.load_full();
        let query_vector = match embedder.embed_query(query).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "query embedding failed, using keyword search only");
                None
            }
        };

        let keyword_on = self.keyword.is_available().await
            && (settings.hybrid.enabled || query_vector.is_none());
        let ann = match &query_vector {
            Some(vector) => {
                self.vector.is_available().await && self.vector.dims().await == Some(vector.len())
            }
            None => false,
        };
        let (vector_weight, text_weight) = if settings.hybrid.enabled {
            (settings.hybrid.vector_weight, settings.hybrid.text_weight)
        } else {
            (1.0, 1.0)
        };

        self.recover_store().await?;
        let guard = self.swap_lock.read().await;
        let searcher = ChunkSearch {
            store: self.store.load_full(),
            query: query_vector,
            match_expr: if keyword_on { build_fts_query(query) } else { None },
            model: embedder.model().to_string(),
            ann,
            vector_weight,
            text_weight,
        };
        if searcher.query.is_none() && searcher.match_expr.is_none() {
            return Ok(Vec::new());
        }

        let mut candidates = None;
        if settings.hierarchical.enabled {
            match self.hierarchical_candidates(&searcher, pool, max_results).await {
                Ok(Some(hits)) => candidates = Some(hits),
                Ok(None) => debug!("no file passed the file-level threshold, using flat search"),
                Err(e) => warn!(error = %e, "hierarchical search failed, using flat search"),
            }
        }
        let candidates = match candidates {
            Some(hits) => hits,
            None => searcher.search(None, pool).await?,
        };
        drop(guard);

        let mut hits = candidates;
        if settings.decay.enabled {
            hits = apply_time_decay(hits, settings.decay.lambda_per_hour, now_ms());
        }
        let hits = threshold_filter(dedup_snippets(hits), min_score, floor_score);
        let selected = if settings.mmr.enabled {
            mmr_select(
                hits,
                MmrParams {
                    lambda: settings.mmr.lambda,
                    min_gain: settings.mmr.min_gain,
                    token_budget,
                    max_results,
                },
            )
        } else {
            budget_select(hits, token_budget, max_results)
        };

        record_search_latency(started.elapsed().as_secs_f64());
        debug!(
            results = selected.len(),
            pool,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "memory search complete"
        );
        Ok(selected.into_iter().map(to_result).collect())
    }

    /// Runs both hierarchical phases. `None` means the file pass found
    /// nothing usable and the caller should search flat.
    async fn hierarchical_candidates(
        &self,
        searcher: &ChunkSearch,
        pool: usize,
        top_k: usize,
    ) -> Result<Option<Vec<ChunkHit>>, MemdexError> {
        let config = &self.config.query.hierarchical;
        let file_limit = config.max_files.max(1) * self.config.query.candidate_multiplier.max(1);
        let (vector, keyword) = searcher.files(file_limit).await?;
        match plan_files(vector, keyword, config) {
            FilePlan::Bypass => Ok(None),
            FilePlan::Files(files) => {
                let hits = search_within_files(&files, searcher, pool, top_k, config).await?;
                Ok((!hits.is_empty()).then_some(hits))
            }
        }
    }
}

fn to_result(hit: ChunkHit) -> SearchResult {
    SearchResult {
        id: hit.id,
        path: hit.path,
        start_line: hit.start_line,
        end_line: hit.end_line,
        source: hit.source,
        snippet: hit.text,
        score: hit.score,
        timestamp: Some(hit.updated_at),
        l0_abstract: hit.l0_abstract,
        l1_overview: hit.l1_overview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::tests::hit;

    #[test]
    fn results_carry_chunk_metadata() {
        let mut chunk = hit("c1", "Refunds within thirty days.", 0.8);
        chunk.updated_at = 1_700_000_000_000;
        chunk.l0_abstract = Some("Refunds".into());
        let result = to_result(chunk);
        assert_eq!(result.id, "c1");
        assert_eq!(result.snippet, "Refunds within thirty days.");
        assert_eq!(result.timestamp, Some(1_700_000_000_000));
        assert_eq!(result.l0_abstract.as_deref(), Some("Refunds"));
        assert!(result.l1_overview.is_none());
    }

    fn broken() -> MemdexError {
        MemdexError::Storage {
            source: "no such table: chunks_vec".into(),
        }
    }

    #[test]
    fn failed_vector_side_degrades_to_keyword() {
        let keyword = vec![hit("k1", "Berlin warehouse", 0.6)];
        let (vector, keyword) = settle(Some(Err(broken())), Some(Ok(keyword)), "chunk").unwrap();
        assert!(vector.is_empty());
        assert_eq!(keyword.len(), 1);
    }

    #[test]
    fn failed_keyword_side_degrades_to_vector() {
        let vector = vec![hit("v1", "Berlin warehouse", 0.9)];
        let (vector, keyword) = settle(Some(Ok(vector)), Some(Err(broken())), "chunk").unwrap();
        assert_eq!(vector.len(), 1);
        assert!(keyword.is_empty());
    }

    #[test]
    fn empty_but_healthy_sides_are_not_an_error() {
        let result = settle::<ChunkHit>(Some(Ok(Vec::new())), Some(Err(broken())), "file");
        assert!(result.is_ok());
    }

    #[test]
    fn every_side_failing_is_an_error() {
        let both = settle::<ChunkHit>(Some(Err(broken())), Some(Err(broken())), "chunk");
        assert!(matches!(both, Err(MemdexError::Storage { .. })));
        let only = settle::<ChunkHit>(None, Some(Err(broken())), "chunk");
        assert!(only.is_err());
    }
}
