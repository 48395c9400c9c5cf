//! Integration Tests for Sheet Sync
//!
//! End-to-end scenarios through the public [`SheetSync`] API against the
//! in-process remote store. Every test gets its own SQLite file in a temp
//! directory, so they run in parallel without external services.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Only restart/recovery scenarios
//! cargo test --test integration restart
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: write-behind, reads, refresh
//! - `restart_*` - Durability across process restarts

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use sheet_sync::{
    CycleOutcome, InMemoryRemote, OperationLog, OperationStatus, RowFilter, ServiceState,
    SheetSync, SheetSyncConfig, SortKey, TableQuery, row_from,
};

// =============================================================================
// Helpers
// =============================================================================

const TABLES: [&str; 3] = ["Товары", "Заказы", "Пользователи"];

fn test_config(dir: &TempDir) -> SheetSyncConfig {
    SheetSyncConfig {
        tables: TABLES.iter().map(|t| t.to_string()).collect(),
        db_path: dir.path().join("sheet_operations_queue.sqlite3").to_string_lossy().into_owned(),
        worker_poll_interval_ms: 10,
        refresh_interval_ms: 60_000,
        shutdown_grace_ms: 1_000,
        ..Default::default()
    }
}

fn shop_remote() -> Arc<InMemoryRemote> {
    let remote = Arc::new(InMemoryRemote::new(TABLES));
    remote.seed(
        "Товары",
        vec![
            row_from(json!({"product_id": 1, "product_name": "Rose", "category": "Perfume", "price_per_unit": 90.0})),
            row_from(json!({"product_id": 2, "product_name": "Amber", "category": "Perfume", "price_per_unit": 120.0})),
            row_from(json!({"product_id": 3, "product_name": "Oat", "category": "Soap", "price_per_unit": 7.5})),
        ],
    );
    remote.seed(
        "Заказы",
        vec![
            row_from(json!({"order_id": 10, "user_id": 42, "status": "new"})),
            row_from(json!({"order_id": 11, "user_id": 43, "status": "paid"})),
        ],
    );
    remote
}

async fn started(dir: &TempDir, remote: Arc<InMemoryRemote>) -> SheetSync {
    let mut sync = SheetSync::new(test_config(dir), remote);
    sync.start().await.expect("start");
    sync
}

/// Wait until the operation log is empty (worker drained it).
async fn drained(sync: &SheetSync) {
    for _ in 0..200 {
        if sync.queue_stats().await.unwrap().total() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue not drained: {:?}", sync.queue_stats().await.unwrap());
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn happy_create_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let remote = shop_remote();
    let sync = started(&dir, remote.clone()).await;

    let receipt = sync
        .enqueue_create("Товары", row_from(json!({"product_id": 1001, "price_per_unit": 150.0})))
        .await
        .unwrap();
    assert_eq!(receipt.provisional.as_ref().unwrap()["price_per_unit"], json!(150.0));

    let by_id = TableQuery::new().filter(RowFilter::new().eq("product_id", 1001));

    // Visible before any remote call
    let rows = sync.query("Товары", &by_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["price_per_unit"], json!(150.0));
    assert_eq!(remote.len("Товары"), 3);

    // Worker delivers it and refreshes the table from remote
    assert_eq!(sync.tick().await.unwrap(), CycleOutcome::Succeeded(receipt.operation_id));
    assert_eq!(remote.len("Товары"), 4);
    let rows = sync.query("Товары", &by_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["price_per_unit"], json!(150.0));
    assert_eq!(sync.queue_stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn happy_background_worker_delivers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let remote = shop_remote();
    let sync = started(&dir, remote.clone()).await;
    sync.run().unwrap();

    sync.enqueue_create("Заказы", row_from(json!({"order_id": 12, "user_id": 42, "status": "new"})))
        .await
        .unwrap();
    sync.enqueue_update(
        "Заказы",
        RowFilter::new().eq("order_id", 12),
        row_from(json!({"status": "paid"})),
    )
    .await
    .unwrap();
    sync.enqueue_delete("Заказы", RowFilter::new().eq("order_id", 10)).await.unwrap();

    drained(&sync).await;

    let remote_rows = remote.rows("Заказы");
    assert_eq!(remote_rows.len(), 2);
    let created = remote_rows.iter().find(|r| r["order_id"] == json!(12)).unwrap();
    assert_eq!(created["status"], json!("paid"));

    let health = sync.health_check().await;
    assert!(health.healthy);
    assert_eq!(health.queue.unwrap().total(), 0);

    sync.shutdown().await;
    assert_eq!(sync.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn happy_query_filter_sort_paginate() {
    let dir = tempfile::tempdir().unwrap();
    let sync = started(&dir, shop_remote()).await;

    let perfume = sync
        .query(
            "Товары",
            &TableQuery::new()
                .filter(RowFilter::new().eq("category", "Perfume"))
                .sort_by(SortKey::desc("price_per_unit")),
        )
        .await
        .unwrap();
    let names: Vec<_> = perfume.iter().map(|r| r["product_name"].clone()).collect();
    assert_eq!(names, vec![json!("Amber"), json!("Rose")]);

    let page = sync
        .query("Товары", &TableQuery::new().sort_by(SortKey::asc("price_per_unit")).offset(1).limit(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["product_name"], json!("Rose"));
}

#[tokio::test]
async fn happy_filter_equality_is_type_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let sync = started(&dir, shop_remote()).await;

    let as_string = TableQuery::new().filter(RowFilter::new().eq("product_id", "1"));
    assert!(sync.query("Товары", &as_string).await.unwrap().is_empty());

    let as_float = TableQuery::new().filter(RowFilter::new().eq("product_id", 1.0));
    assert!(sync.query("Товары", &as_float).await.unwrap().is_empty());

    // Missing key compares as null
    let missing = TableQuery::new().filter(RowFilter::new().eq("discount", serde_json::Value::Null));
    assert_eq!(sync.query("Товары", &missing).await.unwrap().len(), 3);
}

#[tokio::test]
async fn happy_refresh_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let sync = started(&dir, shop_remote()).await;

    let query = TableQuery::new().sort_by(SortKey::asc("product_id"));
    sync.force_refresh(Some("Товары")).await.unwrap();
    let first = sync.query("Товары", &query).await.unwrap();
    sync.force_refresh(Some("Товары")).await.unwrap();
    let second = sync.query("Товары", &query).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn happy_out_of_band_edits_appear_after_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let remote = shop_remote();
    let sync = started(&dir, remote.clone()).await;

    remote.push_out_of_band("Пользователи", row_from(json!({"user_id": 42, "name": "Ирина"})));
    assert!(sync.get_table("Пользователи").await.unwrap().is_empty());

    let report = sync.force_refresh(None).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(sync.get_table("Пользователи").await.unwrap().len(), 1);
}

// =============================================================================
// Restart / Durability
// =============================================================================

#[tokio::test]
async fn restart_enqueued_operations_survive() {
    let dir = tempfile::tempdir().unwrap();
    let remote = shop_remote();

    let id = {
        let sync = started(&dir, remote.clone()).await;
        let receipt = sync
            .enqueue_create("Товары", row_from(json!({"product_id": 1001, "price_per_unit": 150.0})))
            .await
            .unwrap();
        sync.shutdown().await;
        receipt.operation_id
    };

    let sync = started(&dir, remote.clone()).await;
    assert_eq!(sync.queue_stats().await.unwrap().pending, 1);
    assert_eq!(sync.tick().await.unwrap(), CycleOutcome::Succeeded(id));
    assert_eq!(remote.len("Товары"), 4);
}

#[tokio::test]
async fn restart_in_flight_operation_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let remote = shop_remote();
    let config = test_config(&dir);

    // A worker claimed the record and died before completing it
    let id = {
        let log = OperationLog::open(&config.db_path, config.max_attempts).await.unwrap();
        let id = log
            .enqueue("Товары", &sheet_sync::Mutation::Delete { filter: RowFilter::new().eq("product_id", 3) })
            .await
            .unwrap();
        let claimed = log.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.status, OperationStatus::Processing);
        log.close().await;
        id
    };

    let sync = started(&dir, remote.clone()).await;
    let stats = sync.queue_stats().await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.retry, 1);

    assert_eq!(sync.tick().await.unwrap(), CycleOutcome::Succeeded(id));
    assert_eq!(remote.len("Товары"), 2);
}

#[tokio::test]
async fn restart_parked_operations_stay_parked() {
    let dir = tempfile::tempdir().unwrap();
    let remote = shop_remote();

    let id = {
        let mut config = test_config(&dir);
        config.max_attempts = 1;
        let mut sync = SheetSync::new(config, remote.clone());
        sync.start().await.unwrap();
        let receipt = sync
            .enqueue_update("Товары", RowFilter::new().eq("product_id", 404), row_from(json!({"price_per_unit": 1})))
            .await
            .unwrap();
        assert_eq!(sync.tick().await.unwrap(), CycleOutcome::Failed(receipt.operation_id));
        sync.shutdown().await;
        receipt.operation_id
    };

    let sync = started(&dir, remote).await;
    assert_eq!(sync.tick().await.unwrap(), CycleOutcome::Idle);
    let failed = sync.failed_operations(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert!(failed[0].error_message.as_deref().unwrap().contains("matched no rows"));
}
