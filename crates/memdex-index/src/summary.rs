// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model-free summaries.
//!
//! L0 abstracts are computed synchronously while indexing: a chunk's first
//! line (a heading if there is one) plus the first sentence of the following
//! paragraph. The heuristic L1 overview walks the whole chunk and keeps every
//! heading and the first sentence of every paragraph.

use std::sync::LazyLock;

use regex::Regex;

/// Cap for a chunk-level L0 abstract, in chars.
pub const L0_MAX_CHARS: usize = 400;

/// Cap for a file-level L0 abstract, in chars.
pub const FILE_L0_MAX_CHARS: usize = 600;

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").unwrap());

static INLINE_MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_`~]+").unwrap());

static LINE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(#{1,6}\s+|>\s*|[-*+]\s+|\d+[.)]\s+)+").unwrap());

/// One markdown block: a heading line or a paragraph of consecutive lines.
enum Block {
    Heading(String),
    Paragraph(String),
}

/// Removes markdown syntax from one line of text.
pub fn strip_markdown(line: &str) -> String {
    let line = LINE_PREFIX.replace(line, "");
    let line = LINK.replace_all(&line, "$1");
    let line = INLINE_MARKUP.replace_all(&line, "");
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First sentence of a paragraph (up to `.`, `!` or `?` followed by space).
fn first_sentence(paragraph: &str) -> &str {
    let bytes = paragraph.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_none_or(|next| next.is_ascii_whitespace())
        {
            return &paragraph[..=i];
        }
    }
    paragraph
}

/// Truncates to at most `max` chars, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

fn blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut in_fence = false;

    let flush = |paragraph: &mut Vec<String>, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::Paragraph(paragraph.join(" ")));
            paragraph.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if in_fence {
            continue;
        }
        if trimmed.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if trimmed.starts_with('#') {
            flush(&mut paragraph, &mut blocks);
            let heading = strip_markdown(trimmed);
            if !heading.is_empty() {
                blocks.push(Block::Heading(heading));
            }
            continue;
        }
        let stripped = strip_markdown(trimmed);
        if !stripped.is_empty() {
            paragraph.push(stripped);
        }
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

/// L0 abstract of one chunk, or `None` for text with no content.
pub fn l0_abstract(text: &str) -> Option<String> {
    let blocks = blocks(text);
    let lead = blocks
        .iter()
        .position(|b| matches!(b, Block::Heading(_)))
        .unwrap_or(0);

    let mut parts: Vec<&str> = Vec::new();
    match blocks.get(lead)? {
        Block::Heading(heading) => {
            parts.push(heading);
            let next = blocks[lead + 1..]
                .iter()
                .find_map(|b| match b {
                    Block::Paragraph(p) => Some(first_sentence(p)),
                    Block::Heading(_) => None,
                });
            if let Some(sentence) = next
                && sentence != heading.as_str()
            {
                parts.push(sentence);
            }
        }
        Block::Paragraph(paragraph) => parts.push(first_sentence(paragraph)),
    }

    let joined = parts.join(": ");
    (!joined.is_empty()).then(|| truncate_chars(&joined, L0_MAX_CHARS))
}

/// File-level abstract: the distinct chunk abstracts joined in order.
pub fn file_l0_abstract<'a>(chunk_abstracts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut seen: Vec<&str> = Vec::new();
    for l0 in chunk_abstracts {
        if !l0.is_empty() && !seen.contains(&l0) {
            seen.push(l0);
        }
    }
    let joined = seen.join("\n");
    (!joined.is_empty()).then(|| truncate_chars(&joined, FILE_L0_MAX_CHARS))
}

/// Heuristic L1 overview: every heading and the first sentence of every
/// paragraph, one per line.
pub fn l1_heuristic(text: &str, max_chars: usize) -> Option<String> {
    let lines: Vec<String> = blocks(text)
        .into_iter()
        .map(|block| match block {
            Block::Heading(h) => h,
            Block::Paragraph(p) => first_sentence(&p).to_string(),
        })
        .collect();
    let joined = lines.join("\n");
    (!joined.is_empty()).then(|| truncate_chars(&joined, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_syntax() {
        assert_eq!(strip_markdown("## **Refund** policy"), "Refund policy");
        assert_eq!(strip_markdown("- see [the docs](http://x.y) now"), "see the docs now");
        assert_eq!(strip_markdown("> `code` and _em_"), "code and em");
        assert_eq!(strip_markdown("12. numbered item"), "numbered item");
    }

    #[test]
    fn l0_prefers_heading_plus_first_sentence() {
        let text = "intro words\n\n# Refunds\n\nCustomers get 30 days. Exceptions apply.\n";
        assert_eq!(
            l0_abstract(text).unwrap(),
            "Refunds: Customers get 30 days."
        );
    }

    #[test]
    fn l0_without_heading_uses_first_sentence() {
        let text = "Plain paragraph here. Second sentence.\nMore.";
        assert_eq!(l0_abstract(text).unwrap(), "Plain paragraph here.");
    }

    #[test]
    fn l0_of_blank_text_is_none() {
        assert!(l0_abstract("\n   \n").is_none());
        assert!(l0_abstract("```\nonly code\n```").is_none());
    }

    #[test]
    fn l0_is_capped() {
        let text = format!("# {}", "word ".repeat(200));
        let l0 = l0_abstract(&text).unwrap();
        assert!(l0.chars().count() <= L0_MAX_CHARS);
        assert!(l0.ends_with('…'));
    }

    #[test]
    fn file_l0_joins_distinct_abstracts() {
        let l0 = file_l0_abstract(["A", "B", "A", ""]).unwrap();
        assert_eq!(l0, "A\nB");
        assert!(file_l0_abstract(Vec::<&str>::new()).is_none());
        let long: Vec<String> = (0..50).map(|i| format!("abstract number {i}")).collect();
        let l0 = file_l0_abstract(long.iter().map(String::as_str)).unwrap();
        assert!(l0.chars().count() <= FILE_L0_MAX_CHARS);
    }

    #[test]
    fn l1_keeps_headings_and_lead_sentences() {
        let text = "# Policy\n\nRefunds take 30 days. Really.\n\n## Shipping\n\nShips in 2 days! Fast.\n";
        assert_eq!(
            l1_heuristic(text, 2000).unwrap(),
            "Policy\nRefunds take 30 days.\nShipping\nShips in 2 days!"
        );
    }

    #[test]
    fn l1_respects_cap() {
        let text = "Sentence one is here. More.\n\n".repeat(200);
        let l1 = l1_heuristic(&text, 100).unwrap();
        assert!(l1.chars().count() <= 100);
    }
}
