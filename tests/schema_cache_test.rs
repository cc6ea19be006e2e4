//! Integration tests for workspace schema caching and DDL patching.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::NamedTempFile;
use workspace_db::config::Config;
use workspace_db::db::{
    AnalyzerFactory, CatalogAnalyzerFactory, PoolManager, SchemaAnalyzer, SchemaCache,
    WorkspaceRegistry,
};
use workspace_db::error::{DbError, DbResult};
use workspace_db::models::{DatabaseConfig, TableKey, TableMetadata};
use workspace_db::service::WorkspaceService;

fn sqlite_config(file: &NamedTempFile) -> DatabaseConfig {
    DatabaseConfig::sqlite(file.path().to_str().unwrap())
}

fn service() -> WorkspaceService {
    WorkspaceService::from_config(&Config::default_config())
}

#[tokio::test]
async fn test_create_and_drop_table_patch_cache() {
    let temp_file = NamedTempFile::new().unwrap();
    let svc = service();
    assert!(svc.create_workspace("w1", sqlite_config(&temp_file), true).await);

    let created = svc
        .execute_atomic(
            "w1",
            &[
                "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)",
                "CREATE TABLE invoices (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id))",
            ],
        )
        .await;
    assert!(created.success, "{:?}", created.error);

    let cache = svc.schema("w1").await.unwrap();
    assert_eq!(cache.len(), 2);
    let key = TableKey::new("main", "customers");
    assert_eq!(cache.resolve_key("customers"), Some(key.clone()));
    assert_eq!(cache.resolve_key("main.customers"), Some(key));
    assert_eq!(cache.relationships().len(), 1);
    assert_eq!(cache.summary().total_tables, 2);

    let dropped = svc
        .execute_atomic("w1", &["DROP TABLE invoices", "DROP TABLE customers"])
        .await;
    assert!(dropped.success, "{:?}", dropped.error);

    let cache = svc.schema("w1").await.unwrap();
    assert!(cache.is_empty());
    assert!(cache.resolve("customers").is_none());
    assert!(cache.relationships().is_empty());
    svc.shutdown().await;
}

#[tokio::test]
async fn test_commented_ddl_patches_cache() {
    let temp_file = NamedTempFile::new().unwrap();
    let svc = service();
    assert!(svc.create_workspace("w1", sqlite_config(&temp_file), true).await);

    let created = svc
        .execute_atomic("w1", &["CREATE TABLE t (id INTEGER)", "CREATE TABLE u (id INTEGER)"])
        .await;
    assert!(created.success, "{:?}", created.error);

    let dropped = svc
        .execute_atomic("w1", &["/* cleanup */ DROP TABLE t"])
        .await;
    assert!(dropped.success, "{:?}", dropped.error);
    let cache = svc.schema("w1").await.unwrap();
    assert!(cache.resolve("t").is_none());
    assert!(cache.resolve("u").is_some());

    let altered = svc
        .execute("w1", "-- add a label\nALTER TABLE u ADD COLUMN label TEXT")
        .await;
    assert!(altered.success, "{:?}", altered.error);
    let cache = svc.schema("w1").await.unwrap();
    let u = cache.resolve("u").unwrap();
    assert!(u.columns.iter().any(|c| c.name == "label"));
    svc.shutdown().await;
}

#[tokio::test]
async fn test_alter_and_index_refresh_single_table() {
    let temp_file = NamedTempFile::new().unwrap();
    let svc = service();
    assert!(svc.create_workspace("w1", sqlite_config(&temp_file), false).await);
    assert!(svc.execute("w1", "CREATE TABLE a (id INTEGER PRIMARY KEY)").await.success);
    assert!(svc.execute("w1", "CREATE TABLE b (id INTEGER PRIMARY KEY)").await.success);
    assert!(svc.ensure_schema_analyzed("w1").await);

    let results = svc
        .execute_batches_with_savepoints(
            "w1",
            &[
                vec!["ALTER TABLE a ADD COLUMN label TEXT"],
                vec!["CREATE INDEX idx_a_label ON a (label)"],
            ],
        )
        .await;
    assert!(results.iter().all(|r| r.success), "{:?}", results);

    let cache = svc.schema("w1").await.unwrap();
    let a = cache.resolve("a").unwrap();
    assert!(a.columns.iter().any(|c| c.name == "label"));
    assert!(a.indexes.iter().any(|i| i.name == "idx_a_label"));
    assert_eq!(cache.resolve("b").unwrap().columns.len(), 1);

    assert!(svc.execute("w1", "DROP INDEX idx_a_label").await.success);
    let cache = svc.schema("w1").await.unwrap();
    assert!(cache.resolve("a").unwrap().indexes.iter().all(|i| i.name != "idx_a_label"));
    svc.shutdown().await;
}

#[tokio::test]
async fn test_failed_batch_ddl_is_not_patched() {
    let temp_file = NamedTempFile::new().unwrap();
    let svc = service();
    assert!(svc.create_workspace("w1", sqlite_config(&temp_file), true).await);

    let results = svc
        .execute_batches_with_savepoints(
            "w1",
            &[
                vec!["CREATE TABLE kept (id INTEGER)"],
                vec!["CREATE TABLE discarded (id INTEGER)", "INSERT INTO nowhere VALUES (1)"],
            ],
        )
        .await;
    assert!(results[0].success);
    assert!(!results[1].success);

    let cache = svc.schema("w1").await.unwrap();
    assert!(cache.resolve("kept").is_some());
    assert!(cache.resolve("discarded").is_none());
    svc.shutdown().await;
}

#[tokio::test]
async fn test_unrecognized_ddl_invalidates_cache() {
    let temp_file = NamedTempFile::new().unwrap();
    let pools = Arc::new(PoolManager::new());
    let registry = WorkspaceRegistry::new(pools, Arc::new(CatalogAnalyzerFactory));
    assert!(registry.create_workspace("w1", sqlite_config(&temp_file), true).await);

    assert!(
        registry
            .apply_schema_changes("w1", &["SELECT 1"])
            .await
            .is_none()
    );

    let report = registry
        .apply_schema_changes("w1", &["CREATE SCHEMA audit"])
        .await
        .unwrap();
    assert!(report.invalidated);
    assert!(!registry.is_schema_analyzed("w1").await);

    assert!(registry.ensure_schema_analyzed("w1").await);
    assert!(registry.is_schema_analyzed("w1").await);
    registry.close_all().await;
}

struct RefusingFactory;

impl AnalyzerFactory for RefusingFactory {
    fn bind(
        &self,
        _workspace_id: &str,
        _config: &DatabaseConfig,
        _pools: Arc<PoolManager>,
    ) -> DbResult<Arc<dyn SchemaAnalyzer>> {
        Err(DbError::internal("analyzer unavailable"))
    }
}

struct BrokenAnalyzer;

#[async_trait]
impl SchemaAnalyzer for BrokenAnalyzer {
    fn default_schema(&self) -> &str {
        "main"
    }

    async fn analyze_schema(&self) -> DbResult<SchemaCache> {
        Err(DbError::schema("catalog unreadable", "main"))
    }

    async fn table_info(&self, table: &str, _schema: Option<&str>) -> DbResult<TableMetadata> {
        Err(DbError::schema("catalog unreadable", table))
    }
}

struct BrokenFactory;

impl AnalyzerFactory for BrokenFactory {
    fn bind(
        &self,
        _workspace_id: &str,
        _config: &DatabaseConfig,
        _pools: Arc<PoolManager>,
    ) -> DbResult<Arc<dyn SchemaAnalyzer>> {
        Ok(Arc::new(BrokenAnalyzer))
    }
}

#[tokio::test]
async fn test_create_workspace_is_all_or_nothing() {
    let temp_file = NamedTempFile::new().unwrap();

    let pools = Arc::new(PoolManager::new());
    let registry = WorkspaceRegistry::new(Arc::clone(&pools), Arc::new(RefusingFactory));
    assert!(!registry.create_workspace("w1", sqlite_config(&temp_file), true).await);
    assert!(!registry.has_workspace("w1").await);
    assert!(!pools.has_pool("w1").await);

    let pools = Arc::new(PoolManager::new());
    let registry = WorkspaceRegistry::new(Arc::clone(&pools), Arc::new(BrokenFactory));
    assert!(!registry.create_workspace("w1", sqlite_config(&temp_file), true).await);
    assert!(!registry.has_workspace("w1").await);
    assert!(!pools.has_pool("w1").await);

    // Without the analysis step the same analyzer is never consulted.
    assert!(registry.create_workspace("w1", sqlite_config(&temp_file), false).await);
    assert!(!registry.ensure_schema_analyzed("w1").await);
    assert!(registry.status("w1").await.is_some_and(|s| !s.schema_analyzed));
    registry.close_all().await;
}

#[tokio::test]
async fn test_status_reports_summary() {
    let temp_file = NamedTempFile::new().unwrap();
    let svc = service();
    assert!(svc.create_workspace("w1", sqlite_config(&temp_file), false).await);
    assert!(
        svc.execute_atomic(
            "w1",
            &["CREATE TABLE t (id INTEGER)", "INSERT INTO t VALUES (1), (2)"]
        )
        .await
        .success
    );
    assert!(svc.refresh_workspace("w1").await);

    let status = svc.status("w1").await.unwrap();
    assert!(status.schema_analyzed);
    let summary = status.schema_summary.unwrap();
    assert_eq!(summary.total_tables, 1);
    assert_eq!(summary.total_rows, 2);
    assert!(status.pool.is_some());

    let all = svc.all_status().await;
    assert_eq!(all.len(), 1);
    svc.shutdown().await;
}
