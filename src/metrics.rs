// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the pipeline.
//!
//! Uses the `metrics` crate facade; install any compatible recorder
//! (Prometheus exporter, statsd, ...) in the host application. Without a
//! recorder every call here is a no-op.
//!
//! # Metric names
//!
//! - `sync_pipeline_sync_runs_total{domain, kind, outcome}`
//! - `sync_pipeline_sync_seconds{domain, kind}`
//! - `sync_pipeline_records_published_total{domain}`
//! - `sync_pipeline_publish_failures_total{domain}`
//! - `sync_pipeline_records_synced{domain}` (gauge, running total)
//! - `sync_pipeline_ingest_total{domain, outcome}`
//! - `sync_pipeline_buffered_records` (gauge)
//! - `sync_pipeline_idempotency_entries` (gauge)
//! - `sync_pipeline_idempotency_evictions_total{reason}`
//! - `sync_pipeline_flushes_total{reason, outcome}`
//! - `sync_pipeline_flush_records` / `sync_pipeline_flush_seconds`
//! - `sync_pipeline_retries_total{operation}` / `sync_pipeline_retries_exhausted_total{operation}`
//! - `sync_pipeline_errors_total{component, operation}`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// PRODUCER - sync runs and publishing
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished sync run. `outcome` is `published`, `empty` or `error`.
pub fn record_sync_run(domain: &str, kind: &str, outcome: &str, duration: Duration) {
    counter!(
        "sync_pipeline_sync_runs_total",
        "domain" => domain.to_string(),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "sync_pipeline_sync_seconds",
        "domain" => domain.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_published(domain: &str, records: usize) {
    counter!(
        "sync_pipeline_records_published_total",
        "domain" => domain.to_string()
    )
    .increment(records as u64);
}

pub fn record_publish_failure(domain: &str) {
    counter!(
        "sync_pipeline_publish_failures_total",
        "domain" => domain.to_string()
    )
    .increment(1);
}

/// Running total from the sync-state row
pub fn set_records_synced(domain: &str, total: u64) {
    gauge!(
        "sync_pipeline_records_synced",
        "domain" => domain.to_string()
    )
    .set(total as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONSUMER - ingest, dedup, merge, flush
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_ingest(domain: &str, outcome: &str) {
    counter!(
        "sync_pipeline_ingest_total",
        "domain" => domain.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn set_buffered_records(count: usize) {
    gauge!("sync_pipeline_buffered_records").set(count as f64);
}

pub fn set_idempotency_entries(count: usize) {
    gauge!("sync_pipeline_idempotency_entries").set(count as f64);
}

/// `reason` is `capacity` or `expired`
pub fn record_idempotency_evictions(reason: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "sync_pipeline_idempotency_evictions_total",
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Record a flush attempt. `outcome` is `delivered` or `dropped`.
pub fn record_flush(reason: &str, outcome: &str, records: usize, duration: Duration) {
    counter!(
        "sync_pipeline_flushes_total",
        "reason" => reason.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("sync_pipeline_flush_records").record(records as f64);
    histogram!("sync_pipeline_flush_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// RESILIENCE
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_retry(operation: &str) {
    counter!(
        "sync_pipeline_retries_total",
        "operation" => retry_label(operation)
    )
    .increment(1);
}

pub fn record_retry_exhausted(operation: &str) {
    counter!(
        "sync_pipeline_retries_exhausted_total",
        "operation" => retry_label(operation)
    )
    .increment(1);
}

/// Operation names carry page numbers and domains; keep the label set small.
fn retry_label(operation: &str) -> String {
    operation.split_whitespace().next().unwrap_or("unknown").to_string()
}

pub fn record_error(component: &str, operation: &str) {
    counter!(
        "sync_pipeline_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Times a sync run and records it on drop with the outcome set last.
pub struct SyncTimer {
    domain: String,
    kind: &'static str,
    outcome: &'static str,
    start: Instant,
}

impl SyncTimer {
    pub fn new(domain: &str, kind: &'static str) -> Self {
        Self {
            domain: domain.to_string(),
            kind,
            outcome: "error",
            start: Instant::now(),
        }
    }

    pub fn set_outcome(&mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for SyncTimer {
    fn drop(&mut self) {
        record_sync_run(&self.domain, self.kind, self.outcome, self.start.elapsed());
    }
}
