//! Integration tests for workspace pool lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};
use workspace_db::config::PoolOptions;
use workspace_db::db::{PoolManager, QueryExecutor};
use workspace_db::models::DatabaseConfig;

fn sqlite_config(file: &NamedTempFile) -> DatabaseConfig {
    DatabaseConfig::sqlite(file.path().to_str().unwrap())
}

#[tokio::test]
async fn test_create_then_close_removes_pool() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = PoolManager::new();

    assert!(pools.create("w1", sqlite_config(&temp_file)).await);
    assert!(pools.has_pool("w1").await);

    assert!(pools.close("w1").await);
    assert!(!pools.has_pool("w1").await);

    // Second close is a no-op, not an error.
    assert!(!pools.close("w1").await);
}

#[tokio::test]
async fn test_failed_create_leaves_nothing_registered() {
    let pools = PoolManager::new();
    let config = DatabaseConfig::sqlite("/nonexistent-dir/deeper/ws.db");

    let result = pools.try_create("w1", config).await;
    assert_err!(result);
    assert!(!pools.has_pool("w1").await);

    // An invalid config is rejected before any connection attempt.
    assert!(!pools.create("w2", DatabaseConfig::sqlite("")).await);
    assert_eq!(pools.pool_count().await, 0);
}

#[tokio::test]
async fn test_connection_returned_after_failing_statement() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = Arc::new(PoolManager::new());
    let config = sqlite_config(&temp_file).with_pool_options(PoolOptions {
        max_connections: Some(1),
        acquire_timeout_secs: Some(2),
        ..Default::default()
    });
    assert!(pools.create("w1", config).await);
    let exec = QueryExecutor::new(Arc::clone(&pools));

    let before = pools.pool_stats("w1").await.unwrap();

    let failed = exec.execute("w1", "SELECT * FROM no_such_table").await;
    assert!(!failed.success);

    let after = pools.pool_stats("w1").await.unwrap();
    assert_eq!(before.num_idle, after.num_idle);
    assert_eq!(after.active_borrows, 0);

    // With a single connection, this only succeeds if the failed call gave it back.
    let ok = exec.execute("w1", "SELECT 1 AS one").await;
    assert!(ok.success, "{:?}", ok.error);
}

#[tokio::test]
async fn test_connection_returned_after_panic() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = Arc::new(PoolManager::new());
    let config = sqlite_config(&temp_file).with_pool_options(PoolOptions {
        max_connections: Some(1),
        acquire_timeout_secs: Some(2),
        ..Default::default()
    });
    assert!(pools.create("w1", config).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = pools.pool_stats("w1").await.unwrap();

    let task_pools = Arc::clone(&pools);
    let joined = tokio::spawn(async move {
        let _guard = task_pools.acquire("w1").await.unwrap();
        assert_eq!(task_pools.pool_stats("w1").await.unwrap().active_borrows, 1);
        panic!("statement handler crashed");
    })
    .await;
    assert!(joined.unwrap_err().is_panic());

    assert_eq!(pools.pool_stats("w1").await.unwrap().active_borrows, 0);

    // The single connection must be back before this acquire times out.
    let guard = assert_ok!(pools.acquire("w1").await);
    drop(guard);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pools.pool_stats("w1").await.unwrap().num_idle, before.num_idle);
}

#[tokio::test]
async fn test_guard_tracks_active_borrows() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = PoolManager::new();
    assert!(pools.create("w1", sqlite_config(&temp_file)).await);

    let guard = assert_ok!(pools.acquire("w1").await);
    assert_eq!(pools.pool_stats("w1").await.unwrap().active_borrows, 1);

    drop(guard);
    assert_eq!(pools.pool_stats("w1").await.unwrap().active_borrows, 0);
}

#[tokio::test]
async fn test_refresh_keeps_workspace_usable() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = Arc::new(PoolManager::new());
    assert!(pools.create("w1", sqlite_config(&temp_file)).await);
    assert!(!pools.refresh("missing").await);

    assert!(pools.refresh("w1").await);
    let exec = QueryExecutor::new(Arc::clone(&pools));
    assert!(exec.test_connection("w1").await);
}

#[tokio::test]
async fn test_introspect_reports_without_credentials() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = PoolManager::new();
    let config = sqlite_config(&temp_file).with_credentials("app", "s3cret");
    assert!(pools.create("w1", config).await);

    let info = pools.introspect("w1").await.unwrap();
    assert_eq!(info.workspace_id, "w1");
    assert!(info.server_version.is_some());

    let json = serde_json::to_string(&pools.introspect_all().await).unwrap();
    assert!(json.contains("\"workspace_id\":\"w1\""));
    assert!(!json.contains("s3cret"));
    assert!(json.contains("****"));
}

#[test]
fn test_close_all_blocking() {
    tokio_test::block_on(async {
        let a = NamedTempFile::new().unwrap();
        let b = NamedTempFile::new().unwrap();
        let pools = PoolManager::new();
        assert!(pools.create("a", sqlite_config(&a)).await);
        assert!(pools.create("b", sqlite_config(&b)).await);

        pools.close_all().await;
        assert_eq!(pools.pool_count().await, 0);
    });
}
