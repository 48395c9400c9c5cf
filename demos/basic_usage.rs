// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic sheet-sync usage example.
//!
//! Demonstrates:
//! 1. Starting the service against an in-process remote store
//! 2. Queuing creates, updates and deletes (visible immediately)
//! 3. Querying the cache with filters, sorting and pagination
//! 4. Letting the background worker deliver the queue
//! 5. Inspecting a parked failure and requeueing it
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=sheet_sync=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use sheet_sync::{
    InMemoryRemote, RowFilter, ServiceState, SheetSync, SheetSyncConfig, SortKey, TableQuery,
    row_from,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything for the dump at the end)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             sheet-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the service
    // ─────────────────────────────────────────────────────────────────────────
    let db_path = std::env::temp_dir().join("sheet_sync_demo.sqlite3");
    let config = SheetSyncConfig {
        tables: vec!["Товары".into(), "Заказы".into()],
        db_path: db_path.to_string_lossy().into_owned(),
        // Quick turnaround for the demo
        worker_poll_interval_ms: 200,
        refresh_interval_ms: 10_000,
        max_attempts: 2,
        ..Default::default()
    };

    let remote = Arc::new(InMemoryRemote::new(["Товары", "Заказы"]));
    remote.seed(
        "Товары",
        vec![
            row_from(json!({"product_id": 1, "product_name": "Rose", "category": "Perfume", "price": 90.0})),
            row_from(json!({"product_id": 2, "product_name": "Amber", "category": "Perfume", "price": 120.0})),
            row_from(json!({"product_id": 3, "product_name": "Oat", "category": "Soap", "price": 7.5})),
        ],
    );

    let mut sync = SheetSync::new(config, remote.clone());
    println!("📦 State: {}", sync.state());

    println!("\n🚀 Starting (opening log, populating cache)...");
    sync.start().await?;
    assert_eq!(sync.state(), ServiceState::Ready);
    println!("   ✅ Ready. Cached tables: {:?}", sync.cache().table_names());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Queue mutations
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Queuing mutations (worker not running yet)...");

    let start = std::time::Instant::now();
    let created = sync
        .enqueue_create("Товары", row_from(json!({"product_id": 1001, "product_name": "Vetiver", "category": "Perfume", "price": 150.0})))
        .await?;
    println!("   └─ CREATE  op #{} ({:?})", created.operation_id, start.elapsed());

    let updated = sync
        .enqueue_update("Товары", RowFilter::new().eq("product_id", 1), row_from(json!({"price": 95.0})))
        .await?;
    println!("   └─ UPDATE  op #{} patched {} row(s)", updated.operation_id, updated.rows_patched);

    let deleted = sync
        .enqueue_delete("Товары", RowFilter::new().eq("category", "Soap"))
        .await?;
    println!("   └─ DELETE  op #{} patched {} row(s)", deleted.operation_id, deleted.rows_patched);

    // Targets a row that does not exist: will exhaust its attempts
    let doomed = sync
        .enqueue_update("Заказы", RowFilter::new().eq("order_id", 404), row_from(json!({"status": "paid"})))
        .await?;
    println!("   └─ UPDATE  op #{} (no matching row, will fail)", doomed.operation_id);

    println!("   📊 Queue: {:?}", sync.queue_stats().await?);
    println!("   🌐 Remote still has {} products", remote.len("Товары"));

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Query the cache
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Perfume by price, descending (optimistic view):");
    let perfume = sync
        .query(
            "Товары",
            &TableQuery::new()
                .filter(RowFilter::new().eq("category", "Perfume"))
                .sort_by(SortKey::desc("price")),
        )
        .await?;
    for row in &perfume {
        println!("   └─ {} → {}", row["product_name"], row["price"]);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Let the worker deliver
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚙️  Spawning background worker and refresh...");
    sync.run()?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("   📊 Queue: {:?}", sync.queue_stats().await?);
    println!("   🌐 Remote now has {} products", remote.len("Товары"));

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Inspect parked failures
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚨 Parked operations:");
    for op in sync.failed_operations(10).await? {
        println!(
            "   └─ #{} {} on '{}' after {} attempt(s): {}",
            op.id,
            op.kind,
            op.table,
            op.attempts,
            op.error_message.as_deref().unwrap_or("-")
        );
        // Fix the data on the remote, then hand the operation back
        remote.push_out_of_band("Заказы", row_from(json!({"order_id": 404, "status": "new"})));
        sync.requeue(op.id).await?;
        println!("      ↩️  requeued");
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("   📊 Queue: {:?}", sync.queue_stats().await?);

    let health = sync.health_check().await;
    println!("\n❤️  Health: healthy={} state={} cached_rows={}", health.healthy, health.state, health.cached_rows);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    sync.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", sync.state());

    for suffix in ["", "-shm", "-wal"] {
        let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, value) in &counters {
        println!("   │  └─ {} = {}", name, value);
    }
    println!("   ├─ Gauges");
    for (name, value) in &gauges {
        println!("   │  └─ {} = {:.2}", name, value);
    }
    println!("   └─ Histograms");
    for (name, count, sum) in &histograms {
        println!("      └─ {} count={} sum={:.4}", name, count, sum);
    }
}
