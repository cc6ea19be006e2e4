//! Consumer-facing service.
//!
//! Composes the pool manager, cleanup scheduler, workspace registry, executor
//! and transaction coordinator into one object created at process bootstrap and
//! shared behind an `Arc`.

use crate::config::Config;
use crate::db::{
    AnalyzerFactory, CatalogAnalyzerFactory, CleanupScheduler, CleanupStatus, PatchReport,
    PoolManager, QueryExecutor, SchemaCache, TransactionCoordinator, WorkspaceRegistry,
    WorkspaceStatus,
};
use crate::error::DbResult;
use crate::models::{DatabaseConfig, ExecutionOutcome, StatementKind, TransactionResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct WorkspaceService {
    pools: Arc<PoolManager>,
    registry: Arc<WorkspaceRegistry>,
    executor: QueryExecutor,
    transactions: TransactionCoordinator,
    cleanup: CleanupScheduler,
}

impl WorkspaceService {
    /// Build a service from process configuration, using the built-in catalog
    /// analyzer. The cleanup scheduler is not started.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(PoolManager::with_defaults(config.pool_defaults())),
            Arc::new(CatalogAnalyzerFactory),
            config.cleanup_interval_duration(),
            config.inactivity_timeout_duration(),
        )
    }

    pub fn new(
        pools: Arc<PoolManager>,
        factory: Arc<dyn AnalyzerFactory>,
        cleanup_interval: Duration,
        inactivity_timeout: Duration,
    ) -> Self {
        let registry = Arc::new(WorkspaceRegistry::new(Arc::clone(&pools), factory));
        Self {
            executor: QueryExecutor::new(Arc::clone(&pools)),
            transactions: TransactionCoordinator::with_registry(Arc::clone(&registry)),
            cleanup: CleanupScheduler::new(&pools, cleanup_interval, inactivity_timeout),
            pools,
            registry,
        }
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn registry(&self) -> &Arc<WorkspaceRegistry> {
        &self.registry
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    /// Start the idle-pool sweep. False if it is already running.
    pub fn start_cleanup(&self) -> bool {
        self.cleanup.start()
    }

    pub fn cleanup_status(&self) -> CleanupStatus {
        self.cleanup.status()
    }

    /// Run one sweep now. Returns the evicted workspace ids.
    pub async fn force_cleanup(&self) -> Vec<String> {
        self.cleanup.force_cleanup().await
    }

    pub async fn create_workspace(
        &self,
        workspace_id: &str,
        config: DatabaseConfig,
        analyze_schema: bool,
    ) -> bool {
        self.registry
            .create_workspace(workspace_id, config, analyze_schema)
            .await
    }

    pub async fn try_create_workspace(
        &self,
        workspace_id: &str,
        config: DatabaseConfig,
        analyze_schema: bool,
    ) -> DbResult<()> {
        self.registry
            .try_create_workspace(workspace_id, config, analyze_schema)
            .await
    }

    pub async fn close_workspace(&self, workspace_id: &str) -> bool {
        self.registry.close_workspace(workspace_id).await
    }

    pub async fn refresh_workspace(&self, workspace_id: &str) -> bool {
        if let Err(e) = self.registry.ensure_pool(workspace_id).await {
            warn!(workspace_id = %workspace_id, error = %e, "Cannot refresh workspace");
            return false;
        }
        self.registry.refresh_workspace(workspace_id).await
    }

    /// Rebuild the workspace pool from its stored config.
    pub async fn refresh_pool(&self, workspace_id: &str) -> bool {
        self.pools.refresh(workspace_id).await
    }

    pub async fn ensure_schema_analyzed(&self, workspace_id: &str) -> bool {
        if let Err(e) = self.registry.ensure_pool(workspace_id).await {
            warn!(workspace_id = %workspace_id, error = %e, "Cannot analyze schema");
            return false;
        }
        self.registry.ensure_schema_analyzed(workspace_id).await
    }

    pub async fn schema(&self, workspace_id: &str) -> Option<SchemaCache> {
        self.registry.schema_snapshot(workspace_id).await
    }

    pub async fn status(&self, workspace_id: &str) -> Option<WorkspaceStatus> {
        self.registry.status(workspace_id).await
    }

    pub async fn all_status(&self) -> Vec<WorkspaceStatus> {
        self.registry.all_status().await
    }

    pub async fn test_connection(&self, workspace_id: &str) -> bool {
        match self.registry.ensure_pool(workspace_id).await {
            Ok(()) => self.executor.test_connection(workspace_id).await,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Run one statement. DDL that succeeds is patched into the cached schema.
    pub async fn execute(&self, workspace_id: &str, sql: &str) -> ExecutionOutcome {
        if let Err(e) = self.registry.ensure_pool(workspace_id).await {
            return ExecutionOutcome::failed(e.sanitized());
        }
        let outcome = self.executor.execute(workspace_id, sql).await;
        if outcome.success && StatementKind::classify(sql) == StatementKind::Write {
            self.patch_schema(workspace_id, &[sql]).await;
        }
        outcome
    }

    pub async fn execute_atomic<S: AsRef<str> + Sync>(
        &self,
        workspace_id: &str,
        statements: &[S],
    ) -> TransactionResult {
        if let Err(e) = self.registry.ensure_pool(workspace_id).await {
            return TransactionResult::failed(Vec::new(), e.sanitized());
        }
        self.transactions
            .execute_atomic(workspace_id, statements)
            .await
    }

    pub async fn execute_batches_with_savepoints<S: AsRef<str> + Sync>(
        &self,
        workspace_id: &str,
        batches: &[Vec<S>],
    ) -> Vec<TransactionResult> {
        if let Err(e) = self.registry.ensure_pool(workspace_id).await {
            let message = e.sanitized();
            return batches
                .iter()
                .map(|_| TransactionResult::failed(Vec::new(), message.clone()))
                .collect();
        }
        self.transactions
            .execute_batches_with_savepoints(workspace_id, batches)
            .await
    }

    /// Stop the sweep and close every workspace.
    pub async fn shutdown(&self) {
        info!("Shutting down workspace service");
        self.cleanup.stop().await;
        self.registry.close_all().await;
        info!("Workspace service stopped");
    }

    async fn patch_schema(&self, workspace_id: &str, statements: &[&str]) -> Option<PatchReport> {
        self.registry
            .apply_schema_changes(workspace_id, statements)
            .await
    }
}

impl std::fmt::Debug for WorkspaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceService")
            .field("pools", &self.pools)
            .field("cleanup", &self.cleanup.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service() -> WorkspaceService {
        WorkspaceService::from_config(&Config::default_config())
    }

    fn sqlite_config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig::sqlite(dir.path().join("svc.db").to_string_lossy().to_string())
    }

    #[tokio::test]
    async fn test_single_statement_ddl_patches_cache() {
        let dir = TempDir::new().unwrap();
        let svc = service();
        assert!(svc.create_workspace("w1", sqlite_config(&dir), true).await);
        assert_eq!(svc.schema("w1").await.unwrap().len(), 0);

        let outcome = svc
            .execute("w1", "CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .await;
        assert!(outcome.success, "{:?}", outcome.error);

        let cache = svc.schema("w1").await.unwrap();
        assert!(cache.resolve("items").is_some());
        assert!(cache.resolve("main.items").is_some());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_evicted_pool_reopens_on_use() {
        let dir = TempDir::new().unwrap();
        let svc = service();
        assert!(svc.create_workspace("w1", sqlite_config(&dir), false).await);

        assert!(svc.pools().close("w1").await);
        assert!(svc.test_connection("w1").await);
        assert!(svc.pools().has_pool("w1").await);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_workspace() {
        let svc = service();
        let outcome = svc.execute("nope", "SELECT 1").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("nope"));
        assert!(!svc.close_workspace("nope").await);
        assert!(!svc.test_connection("nope").await);
    }
}
