// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as weight ranges, chunk overlap, and threshold ordering.

use crate::diagnostic::ConfigError;
use crate::model::MemdexConfig;

/// Checks every rule and returns all violations, not just the first.
pub fn validate_config(config: &MemdexConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |key: &str, problem: String| errors.push(ConfigError::invalid(key, problem));

    if config.store.agent_id.trim().is_empty() {
        fail("store.agent_id", "must not be empty".into());
    }
    if let Some(path) = &config.store.path
        && path.trim().is_empty()
    {
        fail("store.path", "must not be empty when set".into());
    }
    if config.store.workspace_dir.trim().is_empty() {
        fail("store.workspace_dir", "must not be empty".into());
    }

    let chunking = &config.chunking;
    if chunking.tokens == 0 {
        fail("chunking.tokens", "must be greater than 0".into());
    }
    if chunking.overlap >= chunking.tokens && chunking.tokens > 0 {
        fail(
            "chunking.overlap",
            format!("({}) must be smaller than chunking.tokens ({})", chunking.overlap, chunking.tokens),
        );
    }

    let embedding = &config.embedding;
    if embedding.max_attempts == 0 {
        fail("embedding.max_attempts", "must be at least 1".into());
    }
    if embedding.max_batch_tokens == 0 {
        fail("embedding.max_batch_tokens", "must be greater than 0".into());
    }
    if embedding.base_delay_ms > embedding.max_delay_ms {
        fail(
            "embedding.base_delay_ms",
            format!(
                "({}) must not exceed embedding.max_delay_ms ({})",
                embedding.base_delay_ms, embedding.max_delay_ms
            ),
        );
    }

    if config.batch.concurrency == 0 {
        fail("batch.concurrency", "must be at least 1".into());
    }
    if config.sync.concurrency == 0 {
        fail("sync.concurrency", "must be at least 1".into());
    }

    let query = &config.query;
    if query.max_results == 0 {
        fail("query.max_results", "must be at least 1".into());
    }
    if query.candidate_multiplier == 0 {
        fail("query.candidate_multiplier", "must be at least 1".into());
    }
    check_unit(&mut fail, "query.min_score", query.min_score);
    check_unit(&mut fail, "query.floor_score", query.floor_score);
    if query.floor_score > query.min_score {
        fail(
            "query.floor_score",
            format!("({}) must not exceed query.min_score ({})", query.floor_score, query.min_score),
        );
    }
    check_unit(&mut fail, "query.hybrid.vector_weight", query.hybrid.vector_weight);
    check_unit(&mut fail, "query.hybrid.text_weight", query.hybrid.text_weight);
    if query.hybrid.vector_weight + query.hybrid.text_weight <= 0.0 {
        fail("query.hybrid", "weights must not both be zero".into());
    }
    if query.decay.lambda_per_hour < 0.0 {
        fail(
            "query.decay.lambda_per_hour",
            format!("must be non-negative, got {}", query.decay.lambda_per_hour),
        );
    }
    check_unit(&mut fail, "query.mmr.lambda", query.mmr.lambda);

    let hier = &query.hierarchical;
    check_unit(&mut fail, "query.hierarchical.alpha", hier.alpha);
    check_unit(&mut fail, "query.hierarchical.file_vector_weight", hier.file_vector_weight);
    check_unit(&mut fail, "query.hierarchical.file_text_weight", hier.file_text_weight);
    if hier.file_floor_score > hier.file_min_score {
        fail(
            "query.hierarchical.file_floor_score",
            format!(
                "({}) must not exceed file_min_score ({})",
                hier.file_floor_score, hier.file_min_score
            ),
        );
    }
    if hier.max_files == 0 {
        fail("query.hierarchical.max_files", "must be at least 1".into());
    }
    if hier.convergence_rounds == 0 {
        fail("query.hierarchical.convergence_rounds", "must be at least 1".into());
    }

    if config.l1.max_queue == 0 {
        fail("l1.max_queue", "must be at least 1".into());
    }
    if config.l1.batch_size == 0 {
        fail("l1.batch_size", "must be at least 1".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_unit(fail: &mut impl FnMut(&str, String), key: &str, value: f32) {
    if !(0.0..=1.0).contains(&value) {
        fail(key, format!("must be between 0.0 and 1.0, got {value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_error(errors: &[ConfigError], key: &str) -> bool {
        errors.iter().any(|e| e.key() == Some(key))
    }

    #[test]
    fn default_config_validates() {
        let config = MemdexConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn overlap_not_smaller_than_tokens_fails() {
        let mut config = MemdexConfig::default();
        config.chunking.tokens = 100;
        config.chunking.overlap = 100;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "chunking.overlap"));
    }

    #[test]
    fn zero_tokens_fails() {
        let mut config = MemdexConfig::default();
        config.chunking.tokens = 0;
        config.chunking.overlap = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "chunking.tokens"));
    }

    #[test]
    fn floor_above_min_score_fails() {
        let mut config = MemdexConfig::default();
        config.query.min_score = 0.3;
        config.query.floor_score = 0.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "query.floor_score"));
    }

    #[test]
    fn out_of_range_weights_fail() {
        let mut config = MemdexConfig::default();
        config.query.hybrid.vector_weight = 1.5;
        config.query.mmr.lambda = -0.1;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "query.hybrid.vector_weight"));
        assert!(has_error(&errors, "query.mmr.lambda"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = MemdexConfig::default();
        config.store.agent_id = " ".into();
        config.l1.max_queue = 0;
        config.sync.concurrency = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn nested_sections_deserialize() {
        let toml_str = r#"
[query]
min_score = 0.72
floor_score = 0.5

[query.mmr]
lambda = 0.6
token_budget = 1200

[query.hierarchical]
enabled = true
convergence_rounds = 3
"#;
        let config: MemdexConfig = toml::from_str(toml_str).unwrap();
        assert!((config.query.min_score - 0.72).abs() < f32::EPSILON);
        assert_eq!(config.query.mmr.token_budget, 1200);
        assert!(config.query.hierarchical.enabled);
        assert_eq!(config.query.hierarchical.convergence_rounds, 3);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn unknown_nested_field_is_rejected() {
        let toml_str = r#"
[query.mmr]
lamda = 0.6
"#;
        assert!(toml::from_str::<MemdexConfig>(toml_str).is_err());
    }
}
