// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector + keyword score fusion, time decay and snippet deduplication.

use std::collections::{HashMap, HashSet};

use crate::types::ChunkHit;

/// Characters of normalized text compared when deduplicating.
const DEDUP_PREFIX_CHARS: usize = 200;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Fuses two independently ranked candidate lists by chunk id.
///
/// When only one list has candidates its raw scores are kept. Otherwise each
/// item scores `vector_weight * vector + text_weight * text`, a missing side
/// contributing nothing. The result is sorted best-first.
pub fn merge_hybrid(
    vector: Vec<ChunkHit>,
    keyword: Vec<ChunkHit>,
    vector_weight: f32,
    text_weight: f32,
) -> Vec<ChunkHit> {
    if keyword.is_empty() {
        return sorted(vector);
    }
    if vector.is_empty() {
        return sorted(keyword);
    }

    let mut fused: HashMap<String, (ChunkHit, f32, f32)> = HashMap::new();
    for hit in vector {
        let score = hit.score;
        fused
            .entry(hit.id.clone())
            .and_modify(|entry| entry.1 = entry.1.max(score))
            .or_insert((hit, score, 0.0));
    }
    for hit in keyword {
        let score = hit.score;
        fused
            .entry(hit.id.clone())
            .and_modify(|entry| entry.2 = entry.2.max(score))
            .or_insert((hit, 0.0, score));
    }

    let merged = fused
        .into_values()
        .map(|(mut hit, v, t)| {
            hit.score = vector_weight * v + text_weight * t;
            hit
        })
        .collect();
    sorted(merged)
}

/// Multiplies each score by `exp(-lambda * age_hours)`, then re-sorts.
///
/// Timestamps in the future count as age zero.
pub fn apply_time_decay(mut hits: Vec<ChunkHit>, lambda_per_hour: f64, now_ms: i64) -> Vec<ChunkHit> {
    if lambda_per_hour <= 0.0 {
        return hits;
    }
    for hit in &mut hits {
        let age_hours = (now_ms - hit.updated_at).max(0) as f64 / MS_PER_HOUR;
        hit.score = (f64::from(hit.score) * (-lambda_per_hour * age_hours).exp()) as f32;
    }
    sorted(hits)
}

/// Collapses candidates whose normalized text prefix is identical, keeping
/// the best-scoring one. Output is best-first.
pub fn dedup_snippets(hits: Vec<ChunkHit>) -> Vec<ChunkHit> {
    let mut seen = HashSet::new();
    sorted(hits)
        .into_iter()
        .filter(|hit| seen.insert(normalized_prefix(&hit.text)))
        .collect()
}

fn normalized_prefix(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(DEDUP_PREFIX_CHARS)
        .collect()
}

/// Best-first, ties broken by id so results are deterministic.
pub(crate) fn sorted(mut hits: Vec<ChunkHit>) -> Vec<ChunkHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn hit(id: &str, text: &str, score: f32) -> ChunkHit {
        ChunkHit {
            id: id.into(),
            path: "MEMORY.md".into(),
            source: "memory".into(),
            start_line: 1,
            end_line: 1,
            text: text.into(),
            updated_at: 0,
            embedding: Vec::new(),
            l0_abstract: None,
            l1_overview: None,
            score,
        }
    }

    #[test]
    fn single_list_keeps_raw_scores() {
        let merged = merge_hybrid(vec![hit("a", "x", 0.4), hit("b", "y", 0.8)], vec![], 0.7, 0.3);
        assert_eq!(merged[0].id, "b");
        assert_eq!(merged[0].score, 0.8);

        let merged = merge_hybrid(vec![], vec![hit("k", "z", 0.5)], 0.7, 0.3);
        assert_eq!(merged[0].score, 0.5);
    }

    #[test]
    fn both_lists_are_weighted() {
        let merged = merge_hybrid(
            vec![hit("a", "x", 1.0), hit("b", "y", 0.5)],
            vec![hit("a", "x", 0.5), hit("c", "z", 1.0)],
            0.7,
            0.3,
        );
        let score = |id: &str| merged.iter().find(|h| h.id == id).unwrap().score;
        assert!((score("a") - 0.85).abs() < 1e-6);
        assert!((score("b") - 0.35).abs() < 1e-6);
        assert!((score("c") - 0.3).abs() < 1e-6);
        assert_eq!(merged[0].id, "a");
    }

    #[test]
    fn decay_halves_score_at_half_life() {
        let lambda = std::f64::consts::LN_2 / 24.0;
        let mut old = hit("old", "x", 1.0);
        old.updated_at = 0;
        let mut fresh = hit("fresh", "y", 0.8);
        fresh.updated_at = 24 * 3_600_000;
        let decayed = apply_time_decay(vec![old, fresh], lambda, 24 * 3_600_000);
        assert_eq!(decayed[0].id, "fresh");
        assert!((decayed[0].score - 0.8).abs() < 1e-6);
        assert!((decayed[1].score - 0.5).abs() < 1e-4);
    }

    #[test]
    fn zero_lambda_is_identity() {
        let hits = vec![hit("a", "x", 0.3)];
        assert_eq!(apply_time_decay(hits.clone(), 0.0, i64::MAX), hits);
    }

    #[test]
    fn duplicates_collapse_to_best() {
        let deduped = dedup_snippets(vec![
            hit("a", "Refund  policy: 30 days", 0.4),
            hit("b", "refund policy: 30 DAYS", 0.9),
            hit("c", "shipping", 0.5),
        ]);
        let ids: Vec<&str> = deduped.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
