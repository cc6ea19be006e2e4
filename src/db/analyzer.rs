//! Schema analyzer abstraction.
//!
//! The registry and the cache patcher never query catalogs directly. They go
//! through a [`SchemaAnalyzer`] bound to one workspace, so callers can plug in
//! their own discovery logic.

use crate::db::pool::PoolManager;
use crate::db::schema_cache::SchemaCache;
use crate::error::DbResult;
use crate::models::{DatabaseConfig, TableMetadata};
use async_trait::async_trait;
use std::sync::Arc;

/// Discovers schema metadata for one workspace.
#[async_trait]
pub trait SchemaAnalyzer: Send + Sync {
    /// Schema that unqualified table names resolve against.
    fn default_schema(&self) -> &str;

    /// Case folding the backend applies to an unquoted identifier.
    fn normalize_identifier(&self, ident: &str) -> String {
        ident.to_string()
    }

    /// Full analysis: every table with its relationships and summary counters.
    async fn analyze_schema(&self) -> DbResult<SchemaCache>;

    /// Describe a single table. `schema` falls back to [`default_schema`](Self::default_schema).
    async fn table_info(&self, table: &str, schema: Option<&str>) -> DbResult<TableMetadata>;
}

/// Binds a [`SchemaAnalyzer`] to a workspace at creation time.
pub trait AnalyzerFactory: Send + Sync {
    fn bind(
        &self,
        workspace_id: &str,
        config: &DatabaseConfig,
        pools: Arc<PoolManager>,
    ) -> DbResult<Arc<dyn SchemaAnalyzer>>;
}
