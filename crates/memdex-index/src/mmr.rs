// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Threshold filtering and greedy Maximal Marginal Relevance selection
//! under a token budget.

use std::collections::HashSet;

use crate::types::{cosine_similarity, estimate_tokens, ChunkHit};

/// Keeps candidates scoring at least `min_score`; if none do, retries at
/// `floor_score`. Never pads the result with anything below the floor.
pub fn threshold_filter(hits: Vec<ChunkHit>, min_score: f32, floor_score: f32) -> Vec<ChunkHit> {
    if hits.iter().any(|h| h.score >= min_score) {
        return hits.into_iter().filter(|h| h.score >= min_score).collect();
    }
    hits.into_iter().filter(|h| h.score >= floor_score).collect()
}

/// Selection parameters for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrParams {
    /// 1.0 is pure relevance, 0.0 pure novelty.
    pub lambda: f32,
    pub min_gain: f32,
    /// Estimated tokens (~4 chars each) the selected snippets may use.
    pub token_budget: usize,
    pub max_results: usize,
}

/// Greedy MMR: repeatedly picks the candidate maximizing
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
///
/// Stops when the best gain drops below `min_gain`, when `max_results` is
/// reached, or at the first pick that would overrun the token budget. The
/// pick order does not depend on the budget, so a smaller budget always
/// selects a prefix of what a larger one selects.
pub fn mmr_select(candidates: Vec<ChunkHit>, params: MmrParams) -> Vec<ChunkHit> {
    let bigrams: Vec<HashSet<(char, char)>> =
        candidates.iter().map(|c| char_bigrams(&c.text)).collect();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::new();
    let mut used_tokens = 0usize;

    while selected.len() < params.max_results && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (slot, &i) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&j| similarity(&candidates[i], &candidates[j], &bigrams[i], &bigrams[j]))
                .fold(0.0f32, f32::max);
            let gain = params.lambda * candidates[i].score - (1.0 - params.lambda) * redundancy;
            if best.is_none_or(|(_, g)| gain > g) {
                best = Some((slot, gain));
            }
        }
        let Some((slot, gain)) = best else { break };
        if gain < params.min_gain {
            break;
        }
        let index = remaining[slot];
        let tokens = estimate_tokens(&candidates[index].text);
        if used_tokens + tokens > params.token_budget {
            break;
        }
        used_tokens += tokens;
        selected.push(index);
        remaining.remove(slot);
    }

    let mut slots: Vec<Option<ChunkHit>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// Top results by score, stopping at the first one over the budget.
pub fn budget_select(candidates: Vec<ChunkHit>, token_budget: usize, max_results: usize) -> Vec<ChunkHit> {
    let mut used = 0usize;
    candidates
        .into_iter()
        .take(max_results)
        .take_while(|c| {
            used += estimate_tokens(&c.text);
            used <= token_budget
        })
        .collect()
}

/// Embedding cosine when both sides carry comparable vectors, otherwise
/// character-bigram Jaccard over the text.
fn similarity(
    a: &ChunkHit,
    b: &ChunkHit,
    a_bigrams: &HashSet<(char, char)>,
    b_bigrams: &HashSet<(char, char)>,
) -> f32 {
    if !a.embedding.is_empty() && a.embedding.len() == b.embedding.len() {
        return cosine_similarity(&a.embedding, &b.embedding);
    }
    jaccard(a_bigrams, b_bigrams)
}

fn char_bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn jaccard(a: &HashSet<(char, char)>, b: &HashSet<(char, char)>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::tests::hit;
    use proptest::prelude::*;

    fn params(token_budget: usize) -> MmrParams {
        MmrParams {
            lambda: 0.7,
            min_gain: 0.0,
            token_budget,
            max_results: 10,
        }
    }

    #[test]
    fn refund_policy_threshold_scenario() {
        let hits = vec![hit("strong", "refund policy", 0.9), hit("weak", "refund", 0.2)];
        let kept = threshold_filter(hits, 0.72, 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "strong");

        let below = vec![hit("a", "refund policy", 0.6), hit("b", "refund", 0.3)];
        let kept = threshold_filter(below, 0.72, 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");

        let hopeless = vec![hit("a", "x", 0.1)];
        assert!(threshold_filter(hopeless, 0.72, 0.5).is_empty());
    }

    #[test]
    fn mmr_prefers_novel_candidates() {
        let candidates = vec![
            hit("a", "refund policy allows thirty days", 0.9),
            hit("b", "refund policy allows thirty days!", 0.88),
            hit("c", "shipping is free over fifty", 0.7),
        ];
        let picked = mmr_select(candidates, MmrParams { max_results: 2, ..params(1000) });
        let ids: Vec<&str> = picked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn mmr_uses_embeddings_when_present() {
        let mut a = hit("a", "alpha", 0.9);
        a.embedding = vec![1.0, 0.0];
        let mut b = hit("b", "totally different words", 0.85);
        b.embedding = vec![1.0, 0.0];
        let mut c = hit("c", "alpha", 0.6);
        c.embedding = vec![0.0, 1.0];
        let picked = mmr_select(vec![a, b, c], MmrParams { max_results: 2, ..params(1000) });
        assert_eq!(picked[1].id, "c");
    }

    #[test]
    fn budget_stops_at_first_overrun() {
        let candidates = vec![
            hit("a", &"x".repeat(40), 0.9),
            hit("b", &"y".repeat(400), 0.8),
            hit("c", &"z".repeat(4), 0.7),
        ];
        let picked = mmr_select(candidates, params(50));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "a");
    }

    #[test]
    fn min_gain_stops_selection() {
        let candidates = vec![hit("a", "one", 0.9), hit("b", "two", 0.1)];
        let picked = mmr_select(candidates, MmrParams { min_gain: 0.2, ..params(1000) });
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn budget_select_without_mmr() {
        let candidates = vec![hit("a", &"x".repeat(8), 0.9), hit("b", &"y".repeat(8), 0.8)];
        assert_eq!(budget_select(candidates.clone(), 2, 10).len(), 1);
        assert_eq!(budget_select(candidates.clone(), 4, 1).len(), 1);
        assert_eq!(budget_select(candidates, 4, 10).len(), 2);
    }

    proptest! {
        #[test]
        fn budget_is_respected_and_monotone(
            items in proptest::collection::vec(("[a-z ]{1,120}", 0.0f32..1.0), 0..12),
            small in 0usize..60,
            extra in 0usize..60,
        ) {
            let candidates: Vec<ChunkHit> = items
                .iter()
                .enumerate()
                .map(|(i, (text, score))| hit(&format!("c{i}"), text, *score))
                .collect();
            let large = small + extra;
            let few = mmr_select(candidates.clone(), params(small));
            let many = mmr_select(candidates, params(large));
            let tokens = |sel: &[ChunkHit]| sel.iter().map(|h| estimate_tokens(&h.text)).sum::<usize>();
            prop_assert!(tokens(&few) <= small);
            prop_assert!(tokens(&many) <= large);
            prop_assert!(few.len() <= many.len());
        }
    }
}
