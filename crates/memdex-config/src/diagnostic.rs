// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration problems as miette diagnostics.
//!
//! Parse failures from any Figment layer and rule violations found by
//! [`validate_config`](crate::validation::validate_config) both end up as a
//! [`ConfigError`] naming the dotted key at fault. Hosts show the full list
//! with [`render_report`]; the index folds it into one line with
//! [`summarize`].

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use std::path::{Path, PathBuf};

use figment::error::Kind;
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a known key needs before it is offered as a fix.
const SUGGESTION_THRESHOLD: f64 = 0.75;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key that no section declares.
    #[error("`{key}` is not a memdex setting")]
    #[diagnostic(
        code(memdex::config::unknown_key),
        help("{}", unknown_key_help(section, suggestion.as_deref(), known))
    )]
    UnknownKey {
        /// Full dotted key, e.g. `query.mmr.lamda`.
        key: String,
        /// Section the key appeared in; empty at the top level.
        section: String,
        suggestion: Option<String>,
        known: &'static [&'static str],
        #[label("unknown key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong type, or one that breaks a range or ordering rule.
    #[error("`{key}` {problem}")]
    #[diagnostic(code(memdex::config::invalid_value))]
    InvalidValue { key: String, problem: String },

    /// A layer that could not be read at all.
    #[error("{0}")]
    #[diagnostic(code(memdex::config::unreadable))]
    Unreadable(String),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            problem: problem.into(),
        }
    }

    /// Dotted key the problem concerns, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::UnknownKey { key, .. } | Self::InvalidValue { key, .. } => Some(key),
            Self::Unreadable(_) => None,
        }
    }
}

fn unknown_key_help(section: &str, suggestion: Option<&str>, known: &[&str]) -> String {
    let place = if section.is_empty() {
        "at the top level".to_string()
    } else {
        format!("in [{section}]")
    };
    match suggestion {
        Some(key) => format!("did you mean `{key}`? Keys {place}: {}", known.join(", ")),
        None => format!("keys {place}: {}", known.join(", ")),
    }
}

/// Text of one TOML layer, kept for pointing at the offending line.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub path: PathBuf,
    pub text: String,
}

impl SourceText {
    /// Reads `path`, or `None` if it does not exist or cannot be read.
    pub fn read(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        Some(Self {
            path: std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
            text,
        })
    }

    pub fn inline(text: &str) -> Self {
        Self {
            path: PathBuf::from("memdex.toml (inline)"),
            text: text.to_string(),
        }
    }
}

/// Converts every error Figment collected into a [`ConfigError`].
pub fn from_figment(error: figment::Error, sources: &[SourceText]) -> Vec<ConfigError> {
    error.into_iter().map(|e| convert(&e, sources)).collect()
}

fn convert(error: &figment::Error, sources: &[SourceText]) -> ConfigError {
    let path = error.path.join(".");
    match &error.kind {
        Kind::UnknownField(field, known) => {
            let source = source_of(error, sources);
            let span = source
                .and_then(|s| key_offset(&s.text, &path, field))
                .map(|offset| SourceSpan::new(offset.into(), field.len()));
            let src = span
                .and(source)
                .map(|s| NamedSource::new(s.path.display().to_string(), s.text.clone()));
            ConfigError::UnknownKey {
                key: dotted(&path, field),
                section: path,
                suggestion: suggest_key(field, known),
                known: *known,
                span,
                src,
            }
        }
        Kind::MissingField(field) => ConfigError::invalid(dotted(&path, field), "is required"),
        Kind::InvalidType(found, expected) => {
            ConfigError::invalid(path, format!("expects {expected}, found {found}"))
        }
        Kind::InvalidValue(found, expected) => {
            ConfigError::invalid(path, format!("expects {expected}, found {found}"))
        }
        _ => ConfigError::Unreadable(error.to_string()),
    }
}

fn dotted(section: &str, field: &str) -> String {
    if section.is_empty() {
        field.to_string()
    } else {
        format!("{section}.{field}")
    }
}

/// The layer an error came from. A lone source is assumed to be it.
fn source_of<'a>(error: &figment::Error, sources: &'a [SourceText]) -> Option<&'a SourceText> {
    let file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| s.file_path())
        .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
    match file {
        Some(file) => sources.iter().find(|s| s.path == file),
        None if sources.len() == 1 => sources.first(),
        None => None,
    }
}

/// Byte offset of `field` used as a key inside `[section]`. An empty
/// section means the lines before the first header.
fn key_offset(text: &str, section: &str, field: &str) -> Option<usize> {
    let mut current = String::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            current = header.trim().to_string();
        } else if current == section
            && trimmed.split('=').next().map(str::trim) == Some(field)
        {
            return line.find(field).map(|column| offset + column);
        }
        offset += line.len();
    }
    None
}

/// Closest known key by Jaro-Winkler similarity, if any is close enough.
pub fn suggest_key(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// One line listing every problem, for error values and log fields.
pub fn summarize(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|error| match error {
            ConfigError::UnknownKey {
                suggestion: Some(suggestion),
                ..
            } => format!("{error} (did you mean `{suggestion}`?)"),
            _ => error.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every problem rendered as a miette report, source excerpts included.
pub fn render_report(errors: &[ConfigError]) -> String {
    let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
    let mut out = String::new();
    for error in errors {
        let mut report = String::new();
        match handler.render_report(&mut report, error as &dyn Diagnostic) {
            Ok(()) => out.push_str(&report),
            Err(_) => {
                out.push_str(&error.to_string());
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestions_pick_the_closest_key() {
        let mmr = &["enabled", "lambda", "min_gain", "token_budget"];
        assert_eq!(suggest_key("lamda", mmr), Some("lambda".to_string()));
        assert_eq!(suggest_key("overlpa", &["tokens", "overlap"]), Some("overlap".to_string()));
        assert_eq!(suggest_key("zzzzzz", &["tokens", "overlap"]), None);
    }

    #[test]
    fn key_offset_looks_inside_the_named_section() {
        let text = "[query]\nlamda = 1\n\n[query.mmr]\nlamda = 0.6\n";
        let offset = key_offset(text, "query.mmr", "lamda").unwrap();
        assert_eq!(offset, text.rfind("lamda").unwrap());
        assert_eq!(key_offset(text, "query", "lamda"), text.find("lamda"));
        assert_eq!(key_offset(text, "chunking", "lamda"), None);
    }

    #[test]
    fn top_level_keys_are_found_before_any_header() {
        let text = "verbose = true\n[store]\nverbose = 1\n";
        assert_eq!(key_offset(text, "", "verbose"), Some(0));
    }

    #[test]
    fn summary_lists_every_problem_on_one_line() {
        let errors = vec![
            ConfigError::invalid("chunking.overlap", "(80) must be smaller than chunking.tokens (80)"),
            ConfigError::UnknownKey {
                key: "query.mmr.lamda".into(),
                section: "query.mmr".into(),
                suggestion: Some("lambda".into()),
                known: &["lambda"],
                span: None,
                src: None,
            },
        ];
        let summary = summarize(&errors);
        assert!(!summary.contains('\n'));
        assert!(summary.starts_with("`chunking.overlap` (80) must be smaller"));
        assert!(summary.ends_with("`query.mmr.lamda` is not a memdex setting (did you mean `lambda`?)"));
    }

    #[test]
    fn report_carries_codes_and_help() {
        let errors = vec![ConfigError::UnknownKey {
            key: "chunking.overlpa".into(),
            section: "chunking".into(),
            suggestion: Some("overlap".into()),
            known: &["tokens", "overlap"],
            span: None,
            src: None,
        }];
        let report = render_report(&errors);
        assert!(report.contains("memdex::config::unknown_key"));
        assert!(report.contains("did you mean `overlap`? Keys in [chunking]: tokens, overlap"));
    }
}
