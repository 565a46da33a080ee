// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for daylog-engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `daylog_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: add, remove, update
//! - `category`: exercise, food, sleep, weight, body_fat, steps, ...
//! - `status`: success, error, skipped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// AGGREGATION
// ═══════════════════════════════════════════════════════════════════════════

/// Record a delta application outcome
pub fn record_delta(kind: &str, category: &str, status: &str) {
    counter!(
        "daylog_engine_deltas_total",
        "kind" => kind.to_string(),
        "category" => category.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record delta latency (lock wait + load + persist)
pub fn record_delta_latency(kind: &str, duration: Duration) {
    histogram!(
        "daylog_engine_delta_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an invariant violation caught before persisting
pub fn record_consistency_violation(operation: &str) {
    counter!(
        "daylog_engine_consistency_violations_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Number of (user, date) keys currently holding a serialization lock
pub fn set_active_locks(count: usize) {
    gauge!("daylog_engine_active_locks").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// SYNC
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished sync run
pub fn record_sync_run(status: &str, duration: Duration) {
    counter!(
        "daylog_engine_sync_runs_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("daylog_engine_sync_seconds").record(duration.as_secs_f64());
}

/// Record a caller that joined an in-flight sync instead of starting one
pub fn record_sync_joined() {
    counter!("daylog_engine_sync_joined_total").increment(1);
}

/// Record pulled samples per category and outcome (imported, updated, skipped)
pub fn record_import(category: &str, outcome: &str, count: usize) {
    counter!(
        "daylog_engine_import_records_total",
        "category" => category.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(count as u64);
}

/// Record an export attempt
pub fn record_export(category: &str, status: &str) {
    counter!(
        "daylog_engine_exports_total",
        "category" => category.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an error returned by the health store adapter
pub fn record_health_store_error(operation: &str, error_type: &str) {
    counter!(
        "daylog_engine_health_store_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ANNOTATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Record which tier answered an annotation lookup
pub fn record_annotation_lookup(tier: &str, outcome: &str) {
    counter!(
        "daylog_engine_annotation_lookups_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a generator call outcome
pub fn record_generator_call(status: &str) {
    counter!(
        "daylog_engine_generator_calls_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set fast annotation tier stats gauges
pub fn set_annotation_cache_stats(entries: usize, hit_rate: f64) {
    gauge!("daylog_engine_annotation_cache_entries").set(entries as f64);
    gauge!("daylog_engine_annotation_cache_hit_rate").set(hit_rate);
}

// ═══════════════════════════════════════════════════════════════════════════
// STORAGE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a durable store operation outcome
pub fn record_storage_operation(operation: &str, status: &str) {
    counter!(
        "daylog_engine_storage_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a corrupt row detected on load
pub fn record_corruption(table: &str) {
    counter!(
        "daylog_engine_corruption_detected_total",
        "table" => table.to_string()
    )
    .increment(1);
}

/// Record durable store operation latency
pub fn record_storage_latency(operation: &str, duration: Duration) {
    histogram!(
        "daylog_engine_storage_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records storage latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_storage_latency(self.operation, self.start.elapsed());
    }
}
