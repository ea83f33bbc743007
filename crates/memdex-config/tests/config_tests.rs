// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the memdex configuration system.

use memdex_config::diagnostic::suggest_key;
use memdex_config::model::MemdexConfig;
use memdex_config::{load, summarize, ConfigError, ConfigSource};

fn load_str(toml: &str) -> Result<MemdexConfig, Vec<ConfigError>> {
    load(ConfigSource::Inline(toml))
}

/// Valid TOML with known fields across sections deserializes successfully.
#[test]
fn valid_toml_deserializes_into_memdex_config() {
    let toml = r#"
[store]
agent_id = "ops"
path = "/tmp/memdex/{agent_id}.sqlite"
workspace_dir = "/srv/agent"

[sources]
sessions = true
sessions_dir = "/srv/agent/sessions"
extra_paths = ["notes/team.md"]

[chunking]
tokens = 200
overlap = 40

[cache]
max_entries = 5000

[query]
max_results = 4
min_score = 0.72
floor_score = 0.5

[sync]
watch = false
interval_minutes = 15
"#;

    let config = load_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.store.agent_id, "ops");
    assert_eq!(
        config.store.resolved_path(),
        std::path::PathBuf::from("/tmp/memdex/ops.sqlite")
    );
    assert!(config.sources.sessions);
    assert_eq!(config.sources.extra_paths, vec!["notes/team.md"]);
    assert_eq!(config.chunking.tokens, 200);
    assert_eq!(config.chunking.overlap, 40);
    assert_eq!(config.cache.max_entries, Some(5000));
    assert_eq!(config.query.max_results, 4);
    assert!(!config.sync.watch);
    assert_eq!(config.sync.interval_minutes, 15);
}

#[test]
fn empty_config_uses_defaults() {
    let config = load_str("").expect("empty config is valid");
    assert_eq!(config, MemdexConfig::default());
}

#[test]
fn unknown_top_level_section_produces_error() {
    let errors = load_str("[storag]\npath = \"x\"\n").unwrap_err();
    assert_eq!(errors[0].key(), Some("storag"));
    assert!(summarize(&errors).contains("did you mean `store`?"));
}

#[test]
fn unknown_key_produces_suggestion() {
    let toml = r#"
[chunking]
tokens = 200
overlpa = 40
"#;
    let errors = load_str(toml).unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "chunking.overlpa");
            assert_eq!(suggestion.as_deref(), Some("overlap"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_key_in_nested_section_is_reported() {
    let toml = r#"
[query]
min_score = 0.4

[query.mmr]
lamda = 0.5
"#;
    let errors = load_str(toml).unwrap_err();
    match &errors[0] {
        ConfigError::UnknownKey {
            key,
            section,
            suggestion,
            known,
            span,
            ..
        } => {
            assert_eq!(key, "query.mmr.lamda");
            assert_eq!(section, "query.mmr");
            assert_eq!(suggestion.as_deref(), Some("lambda"));
            assert!(known.contains(&"token_budget"));
            let offset = span.expect("inline source is located").offset();
            assert_eq!(&toml[offset..offset + 5], "lamda");
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn wrong_type_names_the_key() {
    let toml = r#"
[chunking]
tokens = "many"
"#;
    let errors = load_str(toml).unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidValue { key, .. } if key == "chunking.tokens")),
        "expected an invalid chunking.tokens, got {errors:?}"
    );
}

#[test]
fn semantic_validation_runs_after_parse() {
    let toml = r#"
[chunking]
tokens = 50
overlap = 60

[query]
min_score = 0.2
floor_score = 0.4
"#;
    let errors = load_str(toml).unwrap_err();
    assert_eq!(errors.len(), 2);
    let keys: Vec<_> = errors.iter().filter_map(ConfigError::key).collect();
    assert_eq!(keys, vec!["chunking.overlap", "query.floor_score"]);
}

#[test]
fn valid_config_passes_validation() {
    let toml = r#"
[query.hierarchical]
enabled = true
max_files = 5

[l1]
use_llm = true
min_call_interval_ms = 250
"#;
    let config = load_str(toml).expect("config should validate");
    assert!(config.query.hierarchical.enabled);
    assert_eq!(config.query.hierarchical.max_files, 5);
    assert!(config.l1.use_llm);
}

#[test]
fn suggest_key_handles_section_names() {
    let sections = &[
        "store", "sources", "chunking", "embedding", "batch", "cache", "vector", "keyword",
        "query", "sync", "l1",
    ];
    assert_eq!(suggest_key("chunkng", sections), Some("chunking".to_string()));
    assert_eq!(suggest_key("vectr", sections), Some("vector".to_string()));
}
