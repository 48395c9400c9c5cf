// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for sheet-sync.
//!
//! Uses the `metrics` crate facade. The host application picks the exporter
//! (Prometheus, OTEL, ...); without one installed every call is a no-op.
//!
//! # Metric Naming Convention
//! - `sheet_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: logical table name
//! - `kind`: CREATE, UPDATE, DELETE
//! - `outcome`: success, failure, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::operation::OperationKind;

// ═══════════════════════════════════════════════════════════════════════════
// OPERATION LOG
// ═══════════════════════════════════════════════════════════════════════════

/// A mutation was durably queued
pub fn record_enqueued(table: &str, kind: OperationKind) {
    counter!(
        "sheet_sync_enqueued_total",
        "table" => table.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// The worker claimed an operation for execution
pub fn record_claimed(kind: OperationKind, attempt: u32) {
    counter!("sheet_sync_claimed_total", "kind" => kind.as_str()).increment(1);
    histogram!("sheet_sync_claim_attempt").record(f64::from(attempt));
}

/// An operation reached a terminal failed status
pub fn record_parked(status: &'static str) {
    counter!("sheet_sync_parked_total", "status" => status).increment(1);
}

/// Records moved from PROCESSING back to RETRY during recovery
pub fn record_recovered(count: u64) {
    counter!("sheet_sync_recovered_total").increment(count);
}

/// Operator requeued a failed record
pub fn record_requeued() {
    counter!("sheet_sync_requeued_total").increment(1);
}

/// Current queue depth per status
pub fn set_queue_depth(status: &'static str, count: u64) {
    gauge!("sheet_sync_queue_depth", "status" => status).set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE STORE
// ═══════════════════════════════════════════════════════════════════════════

/// One remote call and its outcome
pub fn record_remote_call(operation: &'static str, outcome: &'static str) {
    counter!(
        "sheet_sync_remote_calls_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Remote call latency
pub fn record_remote_latency(operation: &'static str, duration: Duration) {
    histogram!("sheet_sync_remote_seconds", "operation" => operation).record(duration.as_secs_f64());
}

/// Reconciliation cycle outcome (idle, succeeded, rescheduled, ...)
pub fn record_cycle(outcome: &'static str) {
    counter!("sheet_sync_worker_cycles_total", "outcome" => outcome).increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// A full table refresh from the remote store
pub fn record_refresh(table: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "sheet_sync_cache_refresh_total",
        "table" => table.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Cache miss that triggered a remote read
pub fn record_read_through(table: &str) {
    counter!("sheet_sync_cache_read_through_total", "table" => table.to_string()).increment(1);
}

/// Rows touched by an optimistic patch
pub fn record_optimistic_patch(kind: OperationKind, rows: usize) {
    histogram!("sheet_sync_optimistic_rows", "kind" => kind.as_str()).record(rows as f64);
}

/// Cache size
pub fn set_cache_size(tables: usize, rows: usize) {
    gauge!("sheet_sync_cache_tables").set(tables as f64);
    gauge!("sheet_sync_cache_rows").set(rows as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Startup phase duration
pub fn record_startup_phase(phase: &'static str, duration: Duration) {
    histogram!("sheet_sync_startup_seconds", "phase" => phase).record(duration.as_secs_f64());
}

/// State machine transition
pub fn set_service_state(state: &str) {
    counter!(
        "sheet_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Times a remote call and records latency on drop.
pub struct RemoteTimer {
    operation: &'static str,
    start: Instant,
}

impl RemoteTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for RemoteTimer {
    fn drop(&mut self) {
        record_remote_latency(self.operation, self.start.elapsed());
    }
}
