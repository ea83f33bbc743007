// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is
//! a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all memdex metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("memdex_sync_total", "Completed index syncs by kind");
    describe_counter!("memdex_sync_failures_total", "Failed index syncs");
    describe_counter!("memdex_chunks_embedded_total", "Texts embedded by a provider");
    describe_counter!(
        "memdex_embedding_cache_hits_total",
        "Embeddings served from the cache"
    );
    describe_counter!("memdex_provider_fallbacks_total", "Switches to the fallback provider");
    describe_counter!("memdex_l1_generated_total", "L1 overviews generated by mode");
    describe_gauge!("memdex_l1_queue_depth", "Chunks waiting for an L1 overview");
    describe_histogram!(
        "memdex_search_latency_seconds",
        "End-to-end search latency in seconds"
    );
    describe_histogram!("memdex_sync_duration_seconds", "Sync duration in seconds");
}

/// Record a finished sync (`kind` is `full` or `incremental`).
pub fn record_sync(kind: &'static str, seconds: f64) {
    metrics::counter!("memdex_sync_total", "kind" => kind).increment(1);
    metrics::histogram!("memdex_sync_duration_seconds", "kind" => kind).record(seconds);
}

pub fn record_sync_failure() {
    metrics::counter!("memdex_sync_failures_total").increment(1);
}

pub fn record_chunks_embedded(count: usize) {
    metrics::counter!("memdex_chunks_embedded_total").increment(count as u64);
}

pub fn record_cache_hits(count: usize) {
    metrics::counter!("memdex_embedding_cache_hits_total").increment(count as u64);
}

pub fn record_provider_fallback(from: &str, to: &str) {
    metrics::counter!(
        "memdex_provider_fallbacks_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record one generated overview (`mode` is `heuristic` or `llm`).
pub fn record_l1_generated(mode: &'static str) {
    metrics::counter!("memdex_l1_generated_total", "mode" => mode).increment(1);
}

pub fn set_l1_queue_depth(depth: usize) {
    metrics::gauge!("memdex_l1_queue_depth").set(depth as f64);
}

/// Record search latency.
pub fn record_search_latency(seconds: f64) {
    metrics::histogram!("memdex_search_latency_seconds").record(seconds);
}
