//! Database access layer.
//!
//! This module provides the workspace-scoped database machinery:
//! - Connection pools keyed by workspace, with idle eviction
//! - Statement execution, atomic transactions and savepoint batches
//! - Schema analysis, caching and DDL-driven cache patching
//! - Row decoding into JSON records
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod analyzer;
pub mod cleanup;
pub mod executor;
pub mod patcher;
pub mod pool;
pub mod schema;
pub mod schema_cache;
pub mod transaction;
pub mod types;
pub mod workspace;

pub use analyzer::{AnalyzerFactory, SchemaAnalyzer};
pub use cleanup::{CleanupScheduler, CleanupStatus};
pub use executor::QueryExecutor;
pub use patcher::{PatchReport, SchemaCachePatcher, SchemaChange, SchemaChangeSummary};
pub use pool::{ConnectionGuard, DbPool, PoolDiagnostics, PoolHandle, PoolManager, PoolStats};
pub use schema::{CatalogAnalyzer, CatalogAnalyzerFactory};
pub use schema_cache::SchemaCache;
pub use transaction::TransactionCoordinator;
pub use workspace::{WorkspaceRegistry, WorkspaceStatus};
