// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Compiled defaults, then `/etc/memdex/memdex.toml`,
//! `~/.config/memdex/memdex.toml` and `./memdex.toml`, then `MEMDEX_*`
//! environment variables. Later layers win.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::diagnostic::{from_figment, ConfigError, SourceText};
use crate::model::MemdexConfig;
use crate::validation::validate_config;

/// Nested sections, longest first so `query_hybrid_` wins over `query_`.
const SECTION_PREFIXES: &[(&str, &str)] = &[
    ("query_hierarchical_", "query.hierarchical."),
    ("query_hybrid_", "query.hybrid."),
    ("query_decay_", "query.decay."),
    ("query_mmr_", "query.mmr."),
    ("sync_sessions_", "sync.sessions."),
    ("store_", "store."),
    ("sources_", "sources."),
    ("chunking_", "chunking."),
    ("embedding_", "embedding."),
    ("batch_", "batch."),
    ("cache_", "cache."),
    ("vector_", "vector."),
    ("keyword_", "keyword."),
    ("query_", "query."),
    ("sync_", "sync."),
    ("l1_", "l1."),
];

/// Where a configuration is read from.
#[derive(Debug, Clone, Copy)]
pub enum ConfigSource<'a> {
    /// Defaults, the system, user and local files, then the environment.
    Layered,
    /// Defaults, one file, then the environment.
    File(&'a Path),
    /// Defaults and a TOML string. Files and the environment are ignored.
    Inline(&'a str),
}

/// Loads and validates a configuration, returning every problem found.
pub fn load(source: ConfigSource<'_>) -> Result<MemdexConfig, Vec<ConfigError>> {
    let config: MemdexConfig = figment_for(source)
        .extract()
        .map_err(|e| from_figment(e, &source_texts(source)))?;
    validate_config(&config)?;
    Ok(config)
}

/// TOML files of the layered lookup, lowest precedence first.
pub fn layered_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from("/etc/memdex/memdex.toml")];
    if let Some(dir) = dirs::config_dir() {
        files.push(dir.join("memdex/memdex.toml"));
    }
    files.push(PathBuf::from("memdex.toml"));
    files
}

fn figment_for(source: ConfigSource<'_>) -> Figment {
    let defaults = Figment::from(Serialized::defaults(MemdexConfig::default()));
    match source {
        ConfigSource::Layered => layered_files()
            .into_iter()
            .fold(defaults, |figment, file| figment.merge(Toml::file(file)))
            .merge(env_provider()),
        ConfigSource::File(path) => defaults.merge(Toml::file(path)).merge(env_provider()),
        ConfigSource::Inline(text) => defaults.merge(Toml::string(text)),
    }
}

fn source_texts(source: ConfigSource<'_>) -> Vec<SourceText> {
    match source {
        ConfigSource::Layered => layered_files()
            .iter()
            .filter_map(|file| SourceText::read(file))
            .collect(),
        ConfigSource::File(path) => SourceText::read(path).into_iter().collect(),
        ConfigSource::Inline(text) => vec![SourceText::inline(text)],
    }
}

/// Environment provider with explicit section mapping.
///
/// Uses `Env::map()` instead of `Env::split("_")` because key names contain
/// underscores: `MEMDEX_QUERY_MMR_MIN_GAIN` must become `query.mmr.min_gain`.
fn env_provider() -> Env {
    Env::prefixed("MEMDEX_").map(|key| map_env_key(key.as_str()).into())
}

/// Maps a lowercased, prefix-stripped env var name to a dotted config key.
pub fn map_env_key(key: &str) -> String {
    for (prefix, dotted) in SECTION_PREFIXES {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{dotted}{rest}");
        }
    }
    key.to_string()
}
