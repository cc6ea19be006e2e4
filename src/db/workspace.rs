//! Workspace registry.
//!
//! Binds each workspace id to its pool, its schema analyzer and its cached
//! schema. Creation is all-or-nothing: a failure at any step closes the pool and
//! leaves nothing registered.
//!
//! Per-workspace state sits behind its own async mutex, so a long schema
//! analysis in one workspace never blocks another. Concurrent callers of
//! [`WorkspaceRegistry::ensure_schema_analyzed`] for the same workspace wait for
//! the first analysis instead of starting their own.

use crate::config::validate_workspace_id;
use crate::db::analyzer::{AnalyzerFactory, SchemaAnalyzer};
use crate::db::patcher::{self, PatchReport, SchemaCachePatcher};
use crate::db::pool::{PoolDiagnostics, PoolManager};
use crate::db::schema_cache::SchemaCache;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseConfig, SchemaSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

struct WorkspaceState {
    config: DatabaseConfig,
    analyzer: Arc<dyn SchemaAnalyzer>,
    created_at: DateTime<Utc>,
    schema: Option<SchemaCache>,
    schema_analyzed_at: Option<DateTime<Utc>>,
}

impl WorkspaceState {
    fn discard_schema(&mut self) {
        self.schema = None;
        self.schema_analyzed_at = None;
    }

    async fn analyze(&mut self, workspace_id: &str) -> DbResult<()> {
        let cache = self.analyzer.analyze_schema().await?;
        info!(
            workspace_id = %workspace_id,
            tables = cache.len(),
            "Schema analyzed"
        );
        self.schema = Some(cache);
        self.schema_analyzed_at = Some(Utc::now());
        Ok(())
    }
}

/// Status snapshot of one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub workspace_id: String,
    pub schema_analyzed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_analyzed_at: Option<DateTime<Utc>>,
    pub default_schema: String,
    /// `None` while the pool is evicted for inactivity.
    pub pool: Option<PoolDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_summary: Option<SchemaSummary>,
}

/// Registry of workspaces and their schema caches.
pub struct WorkspaceRegistry {
    pools: Arc<PoolManager>,
    factory: Arc<dyn AnalyzerFactory>,
    workspaces: RwLock<HashMap<String, Arc<Mutex<WorkspaceState>>>>,
    /// Serializes create and close.
    lifecycle: Mutex<()>,
}

impl WorkspaceRegistry {
    pub fn new(pools: Arc<PoolManager>, factory: Arc<dyn AnalyzerFactory>) -> Self {
        Self {
            pools,
            factory,
            workspaces: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    /// Create (or replace) a workspace. Returns false, with nothing left
    /// registered, if any step fails.
    pub async fn create_workspace(
        &self,
        workspace_id: &str,
        config: DatabaseConfig,
        analyze_schema: bool,
    ) -> bool {
        match self
            .try_create_workspace(workspace_id, config, analyze_schema)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(workspace_id = %workspace_id, error = %e, "Failed to create workspace");
                false
            }
        }
    }

    /// Like [`create_workspace`](Self::create_workspace) but reports the failure.
    pub async fn try_create_workspace(
        &self,
        workspace_id: &str,
        config: DatabaseConfig,
        analyze_schema: bool,
    ) -> DbResult<()> {
        validate_workspace_id(workspace_id).map_err(DbError::invalid_input)?;
        let _lifecycle = self.lifecycle.lock().await;

        info!(
            workspace_id = %workspace_id,
            db_type = %config.db_type,
            database = %config.database,
            "Creating workspace"
        );

        // Replacing a workspace discards its schema before the pool is swapped.
        self.workspaces.write().await.remove(workspace_id);

        self.pools.try_create(workspace_id, config.clone()).await?;

        let analyzer = match self
            .factory
            .bind(workspace_id, &config, Arc::clone(&self.pools))
        {
            Ok(analyzer) => analyzer,
            Err(e) => {
                self.pools.close(workspace_id).await;
                return Err(e);
            }
        };

        let mut state = WorkspaceState {
            config,
            analyzer,
            created_at: Utc::now(),
            schema: None,
            schema_analyzed_at: None,
        };

        if analyze_schema {
            if let Err(e) = state.analyze(workspace_id).await {
                self.pools.close(workspace_id).await;
                return Err(e);
            }
        } else {
            debug!(workspace_id = %workspace_id, "Schema analysis skipped");
        }

        self.workspaces
            .write()
            .await
            .insert(workspace_id.to_string(), Arc::new(Mutex::new(state)));
        info!(workspace_id = %workspace_id, "Workspace created");
        Ok(())
    }

    /// Close the pool and discard the cached schema. False if the workspace did
    /// not exist.
    pub async fn close_workspace(&self, workspace_id: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let removed = self.workspaces.write().await.remove(workspace_id).is_some();
        let pool_closed = self.pools.close(workspace_id).await;

        if removed || pool_closed {
            info!(workspace_id = %workspace_id, "Workspace closed");
        } else {
            debug!(workspace_id = %workspace_id, "No workspace to close");
        }
        removed || pool_closed
    }

    pub async fn has_workspace(&self, workspace_id: &str) -> bool {
        self.workspaces.read().await.contains_key(workspace_id)
    }

    pub async fn workspace_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.workspaces.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_schema_analyzed(&self, workspace_id: &str) -> bool {
        match self.state(workspace_id).await {
            Some(state) => state.lock().await.schema.is_some(),
            None => false,
        }
    }

    /// Analyze the schema unless a cache already exists.
    pub async fn ensure_schema_analyzed(&self, workspace_id: &str) -> bool {
        let Some(state) = self.state(workspace_id).await else {
            warn!(workspace_id = %workspace_id, "Workspace not found");
            return false;
        };

        let mut state = state.lock().await;
        if state.schema.is_some() {
            return true;
        }
        match state.analyze(workspace_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(workspace_id = %workspace_id, error = %e, "Schema analysis failed");
                false
            }
        }
    }

    /// Drop the cached schema and analyze again from scratch.
    pub async fn refresh_workspace(&self, workspace_id: &str) -> bool {
        let Some(state) = self.state(workspace_id).await else {
            warn!(workspace_id = %workspace_id, "Workspace not found for refresh");
            return false;
        };

        let mut state = state.lock().await;
        state.discard_schema();
        match state.analyze(workspace_id).await {
            Ok(()) => {
                info!(workspace_id = %workspace_id, "Workspace refreshed");
                true
            }
            Err(e) => {
                error!(workspace_id = %workspace_id, error = %e, "Failed to refresh workspace");
                false
            }
        }
    }

    /// Drop the cached schema; the next `ensure_schema_analyzed` rebuilds it.
    pub async fn invalidate_schema(&self, workspace_id: &str) -> bool {
        match self.state(workspace_id).await {
            Some(state) => {
                state.lock().await.discard_schema();
                info!(workspace_id = %workspace_id, "Schema cache invalidated");
                true
            }
            None => false,
        }
    }

    /// Clone of the cached schema, if analyzed.
    pub async fn schema_snapshot(&self, workspace_id: &str) -> Option<SchemaCache> {
        let state = self.state(workspace_id).await?;
        let state = state.lock().await;
        state.schema.clone()
    }

    /// Re-describe one table into the cache. False if the workspace is unknown,
    /// not analyzed, or the table cannot be described.
    pub async fn refresh_table(&self, workspace_id: &str, table: &str, schema: Option<&str>) -> bool {
        let Some(state) = self.state(workspace_id).await else {
            return false;
        };
        let mut state = state.lock().await;
        let state = &mut *state;
        let Some(cache) = state.schema.as_mut() else {
            return false;
        };

        let key = cache.key_for(table, schema);
        match patcher::refresh_table(cache, state.analyzer.as_ref(), &key).await {
            Ok(()) => {
                info!(workspace_id = %workspace_id, table = %key, "Refreshed table schema");
                true
            }
            Err(e) => {
                warn!(workspace_id = %workspace_id, table = %key, error = %e, "Failed to refresh table schema");
                false
            }
        }
    }

    /// Patch the cached schema for executed statements.
    ///
    /// Returns `None` when there is nothing to patch: unknown workspace, no DDL,
    /// or no cache yet. An unpatchable statement discards the cache.
    pub async fn apply_schema_changes<S: AsRef<str>>(
        &self,
        workspace_id: &str,
        statements: &[S],
    ) -> Option<PatchReport> {
        if !SchemaCachePatcher::detect_ddl(statements) {
            return None;
        }
        let state = self.state(workspace_id).await?;
        let mut state = state.lock().await;
        let state = &mut *state;
        let cache = state.schema.as_mut()?;

        let report = SchemaCachePatcher::apply(statements, cache, state.analyzer.as_ref()).await;
        if report.invalidated {
            state.discard_schema();
            warn!(workspace_id = %workspace_id, "Schema cache invalidated after unpatchable DDL");
        }
        Some(report)
    }

    /// Re-open the pool from the stored config if it was evicted for
    /// inactivity. Fails if the workspace is unknown.
    pub async fn ensure_pool(&self, workspace_id: &str) -> DbResult<()> {
        if self.pools.has_pool(workspace_id).await {
            return Ok(());
        }
        let state = self
            .state(workspace_id)
            .await
            .ok_or_else(|| DbError::workspace_not_found(workspace_id))?;
        let config = state.lock().await.config.clone();

        let _lifecycle = self.lifecycle.lock().await;
        if self.pools.has_pool(workspace_id).await {
            return Ok(());
        }
        if !self.has_workspace(workspace_id).await {
            return Err(DbError::workspace_not_found(workspace_id));
        }
        info!(workspace_id = %workspace_id, "Re-opening evicted pool");
        self.pools.try_create(workspace_id, config).await
    }

    pub async fn status(&self, workspace_id: &str) -> Option<WorkspaceStatus> {
        let state = self.state(workspace_id).await?;
        let state = state.lock().await;
        Some(WorkspaceStatus {
            workspace_id: workspace_id.to_string(),
            schema_analyzed: state.schema.is_some(),
            created_at: state.created_at,
            schema_analyzed_at: state.schema_analyzed_at,
            default_schema: state.analyzer.default_schema().to_string(),
            pool: self.pools.introspect(workspace_id).await,
            schema_summary: state.schema.as_ref().map(|s| s.summary().clone()),
        })
    }

    /// Status of every workspace, ordered by id.
    pub async fn all_status(&self) -> Vec<WorkspaceStatus> {
        let mut all = Vec::new();
        for workspace_id in self.workspace_ids().await {
            if let Some(status) = self.status(&workspace_id).await {
                all.push(status);
            }
        }
        all
    }

    /// Forget every workspace and close every pool.
    pub async fn close_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.workspaces.write().await.clear();
        self.pools.close_all().await;
    }

    async fn state(&self, workspace_id: &str) -> Option<Arc<Mutex<WorkspaceState>>> {
        self.workspaces.read().await.get(workspace_id).cloned()
    }
}

impl std::fmt::Debug for WorkspaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceRegistry")
            .field("pools", &self.pools)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::CatalogAnalyzerFactory;
    use tempfile::TempDir;

    fn registry() -> WorkspaceRegistry {
        WorkspaceRegistry::new(Arc::new(PoolManager::new()), Arc::new(CatalogAnalyzerFactory))
    }

    fn sqlite_config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig::sqlite(dir.path().join("ws.db").to_string_lossy().to_string())
    }

    #[tokio::test]
    async fn test_create_status_close() {
        let dir = TempDir::new().unwrap();
        let registry = registry();

        assert!(registry.create_workspace("w1", sqlite_config(&dir), true).await);
        assert!(registry.has_workspace("w1").await);
        assert!(registry.is_schema_analyzed("w1").await);

        let status = registry.status("w1").await.unwrap();
        assert!(status.schema_analyzed);
        assert!(status.schema_analyzed_at.is_some());
        assert_eq!(status.default_schema, "main");
        assert!(status.pool.is_some());

        assert!(registry.close_workspace("w1").await);
        assert!(!registry.close_workspace("w1").await);
        assert!(!registry.pools().has_pool("w1").await);
        assert!(registry.status("w1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_workspace_id_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        assert!(!registry.create_workspace("", sqlite_config(&dir), false).await);
        assert_eq!(registry.pools().pool_count().await, 0);
    }

    #[tokio::test]
    async fn test_lazy_analysis_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let registry = registry();

        assert!(registry.create_workspace("w1", sqlite_config(&dir), false).await);
        assert!(!registry.is_schema_analyzed("w1").await);
        assert!(registry.schema_snapshot("w1").await.is_none());

        assert!(registry.ensure_schema_analyzed("w1").await);
        assert!(registry.ensure_schema_analyzed("w1").await);
        assert!(registry.schema_snapshot("w1").await.is_some());

        assert!(registry.invalidate_schema("w1").await);
        assert!(!registry.is_schema_analyzed("w1").await);
        assert!(registry.refresh_workspace("w1").await);
        assert!(registry.is_schema_analyzed("w1").await);

        assert!(!registry.ensure_schema_analyzed("missing").await);
        assert!(!registry.refresh_workspace("missing").await);
    }

    #[tokio::test]
    async fn test_ensure_pool_reopens_evicted_pool() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        assert!(registry.create_workspace("w1", sqlite_config(&dir), false).await);

        assert!(registry.pools().close("w1").await);
        assert!(registry.status("w1").await.unwrap().pool.is_none());

        registry.ensure_pool("w1").await.unwrap();
        assert!(registry.pools().has_pool("w1").await);
        assert!(matches!(
            registry.ensure_pool("nope").await,
            Err(DbError::WorkspaceNotFound { .. })
        ));
    }
}
