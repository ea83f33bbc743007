// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Markdown-aware chunking with scored break points.
//!
//! Tokens are approximated as 4 characters. Text that fits in one window is
//! returned verbatim. Longer text is cut near each window end at the break
//! point with the best distance-decayed score, never inside a fenced code
//! block, and consecutive chunks share `overlap` tokens of text.

use crate::types::hash_text;

/// How far back from a target cut break points are considered, in chars.
const BREAK_WINDOW: usize = 800;

/// Weight of the squared-distance penalty.
const DISTANCE_DECAY: f64 = 0.7;

/// Smallest window, whatever the configured token count.
const MIN_CHUNK_CHARS: usize = 32;

const SCORE_H1: u32 = 100;
const SCORE_H2: u32 = 90;
const SCORE_H3: u32 = 80;
const SCORE_H4: u32 = 70;
const SCORE_H5: u32 = 60;
const SCORE_H6: u32 = 50;
const SCORE_FENCE: u32 = 80;
const SCORE_THEMATIC_BREAK: u32 = 60;
const SCORE_BLANK: u32 = 20;
const SCORE_LIST: u32 = 5;
const SCORE_NEWLINE: u32 = 1;

/// A chunk of the input text. Offsets are in chars, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub start_char: usize,
    pub end_char: usize,
    /// 1-based line of the first char.
    pub start_line: usize,
    /// 1-based line of the last char.
    pub end_line: usize,
    pub text: String,
    pub hash: String,
}

/// A candidate cut position (start of a line) and its priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BreakPoint {
    position: usize,
    score: u32,
}

/// Window sizes in chars for a `tokens`/`overlap` configuration.
pub fn window_chars(tokens: usize, overlap: usize) -> (usize, usize) {
    let chunk_chars = MIN_CHUNK_CHARS.max(tokens.saturating_mul(4));
    let overlap_chars = overlap.saturating_mul(4).min(chunk_chars - 1);
    (chunk_chars, overlap_chars)
}

/// Splits `text` into overlapping chunks.
pub fn chunk_markdown(text: &str, tokens: usize, overlap: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let line_of = line_numbers(&chars);
    let (chunk_chars, overlap_chars) = window_chars(tokens, overlap);
    if chars.len() <= chunk_chars {
        return vec![make_chunk(&chars, &line_of, 0, chars.len())];
    }

    let breaks = find_break_points(&chars);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let target = start + chunk_chars;
        if target >= chars.len() {
            chunks.push(make_chunk(&chars, &line_of, start, chars.len()));
            break;
        }
        let cut = best_cut(&breaks, start + overlap_chars, target).unwrap_or(target);
        chunks.push(make_chunk(&chars, &line_of, start, cut));
        start = cut - overlap_chars;
    }
    chunks
}

fn make_chunk(chars: &[char], line_of: &[usize], start: usize, end: usize) -> TextChunk {
    let text: String = chars[start..end].iter().collect();
    TextChunk {
        start_char: start,
        end_char: end,
        start_line: line_of[start],
        end_line: line_of[end - 1],
        hash: hash_text(&text),
        text,
    }
}

/// 1-based line number of every char.
fn line_numbers(chars: &[char]) -> Vec<usize> {
    let mut line = 1;
    chars
        .iter()
        .map(|c| {
            let current = line;
            if *c == '\n' {
                line += 1;
            }
            current
        })
        .collect()
}

/// Picks the best break point in `(floor, target]`, looking back at most
/// [`BREAK_WINDOW`] chars from `target`.
fn best_cut(breaks: &[BreakPoint], floor: usize, target: usize) -> Option<usize> {
    let window_start = target.saturating_sub(BREAK_WINDOW);
    let mut best: Option<(f64, usize)> = None;
    for bp in breaks {
        if bp.position <= floor || bp.position < window_start {
            continue;
        }
        if bp.position > target {
            break;
        }
        let distance = (target - bp.position) as f64 / BREAK_WINDOW as f64;
        let weighted = f64::from(bp.score) * (1.0 - distance * distance * DISTANCE_DECAY);
        // Later positions win ties, so equal scores keep chunks large.
        if best.is_none_or(|(score, _)| weighted >= score) {
            best = Some((weighted, bp.position));
        }
    }
    best.map(|(_, position)| position)
}

/// Scans the text once and scores every line start outside fenced blocks.
fn find_break_points(chars: &[char]) -> Vec<BreakPoint> {
    let mut breaks = Vec::new();
    let mut in_fence = false;
    let mut previous_blank = false;
    let mut previous_closed_fence = false;
    let mut line_start = 0;

    while line_start < chars.len() {
        let line_end = chars[line_start..]
            .iter()
            .position(|c| *c == '\n')
            .map_or(chars.len(), |p| line_start + p);
        let line: String = chars[line_start..line_end].iter().collect();
        let trimmed = line.trim_start();
        let is_fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");

        if line_start > 0 && !in_fence {
            let mut score = if is_fence {
                SCORE_FENCE
            } else {
                classify_line(trimmed)
            };
            if previous_blank {
                score = score.max(SCORE_BLANK);
            }
            if previous_closed_fence {
                score = score.max(SCORE_FENCE);
            }
            breaks.push(BreakPoint {
                position: line_start,
                score,
            });
        }

        previous_closed_fence = is_fence && in_fence;
        if is_fence {
            in_fence = !in_fence;
        }
        previous_blank = line.trim().is_empty();
        line_start = line_end + 1;
    }
    breaks
}

fn classify_line(trimmed: &str) -> u32 {
    if trimmed.is_empty() {
        return SCORE_BLANK;
    }
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
        return match hashes {
            1 => SCORE_H1,
            2 => SCORE_H2,
            3 => SCORE_H3,
            4 => SCORE_H4,
            5 => SCORE_H5,
            _ => SCORE_H6,
        };
    }
    if is_thematic_break(trimmed) {
        return SCORE_THEMATIC_BREAK;
    }
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("+ ") {
        return SCORE_LIST;
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && (trimmed[digits..].starts_with(". ") || trimmed[digits..].starts_with(") ")) {
        return SCORE_LIST;
    }
    SCORE_NEWLINE
}

fn is_thematic_break(trimmed: &str) -> bool {
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3 && ['-', '*', '_'].iter().any(|m| compact.chars().all(|c| c == *m))
}
