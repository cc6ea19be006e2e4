//! Atomic transactions and savepoint batches.
//!
//! Both modes pin one connection for their whole duration. Savepoints are sqlx
//! nested transactions: `begin` on a connection that is already inside a
//! transaction issues `SAVEPOINT`, and rolling the nested transaction back
//! issues `ROLLBACK TO SAVEPOINT` without touching the enclosing one.
//!
//! After a commit the executed DDL is handed to the workspace registry so the
//! cached schema follows the database. The connection is returned first, since
//! re-describing a table needs a connection of its own.

use crate::db::pool::{PoolManager, PooledConnection};
use crate::db::workspace::WorkspaceRegistry;
use crate::error::DbError;
use crate::models::{StatementRecord, TransactionResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Statements that ran before a failure, plus the failure.
#[derive(Debug)]
struct Aborted {
    records: Vec<StatementRecord>,
    error: DbError,
}

impl Aborted {
    fn new(records: Vec<StatementRecord>, error: impl Into<DbError>) -> Self {
        Self {
            records,
            error: error.into(),
        }
    }
}

/// Runs multi-statement units of work on workspace pools.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    pools: Arc<PoolManager>,
    registry: Option<Arc<WorkspaceRegistry>>,
}

impl TransactionCoordinator {
    /// Coordinator that never patches a schema cache.
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self {
            pools,
            registry: None,
        }
    }

    /// Coordinator that patches the registry's schema cache after commits.
    pub fn with_registry(registry: Arc<WorkspaceRegistry>) -> Self {
        Self {
            pools: Arc::clone(registry.pools()),
            registry: Some(registry),
        }
    }

    /// Run every statement in one transaction.
    ///
    /// Commits only if all succeed. On the first failure the transaction is
    /// rolled back and the result carries the statements that ran before it.
    pub async fn execute_atomic<S: AsRef<str> + Sync>(
        &self,
        workspace_id: &str,
        statements: &[S],
    ) -> TransactionResult {
        if statements.is_empty() {
            return TransactionResult::committed(Vec::new());
        }

        let mut guard = match self.pools.acquire(workspace_id).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Cannot start transaction");
                return TransactionResult::failed(Vec::new(), e.sanitized());
            }
        };
        let statement_timeout = guard.statement_timeout();

        debug!(
            workspace_id = %workspace_id,
            statements = statements.len(),
            "Starting atomic transaction"
        );

        let outcome = impl_db_dispatch!(PooledConnection, guard.connection(), {
            MySql(c) => mysql::atomic(&mut **c, statements, statement_timeout).await,
            Postgres(c) => postgres::atomic(&mut **c, statements, statement_timeout).await,
            SQLite(c) => sqlite::atomic(&mut **c, statements, statement_timeout).await,
        });
        guard.release();

        match outcome {
            Ok(records) => {
                info!(
                    workspace_id = %workspace_id,
                    statements = records.len(),
                    "Transaction committed"
                );
                self.patch_schema(workspace_id, statements).await;
                TransactionResult::committed(records)
            }
            Err(aborted) => {
                warn!(
                    workspace_id = %workspace_id,
                    error = %aborted.error,
                    "Transaction rolled back"
                );
                TransactionResult::failed(aborted.records, aborted.error.sanitized())
            }
        }
    }

    /// Run each batch under its own savepoint inside one outer transaction.
    ///
    /// A failing batch is rolled back to its savepoint and the next batch still
    /// runs. Successful batches are committed together at the end. If the outer
    /// transaction itself fails, every batch is reported failed.
    pub async fn execute_batches_with_savepoints<S: AsRef<str> + Sync>(
        &self,
        workspace_id: &str,
        batches: &[Vec<S>],
    ) -> Vec<TransactionResult> {
        if batches.is_empty() {
            return Vec::new();
        }

        let mut guard = match self.pools.acquire(workspace_id).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Cannot start batch transaction");
                let message = e.sanitized();
                return batches
                    .iter()
                    .map(|_| TransactionResult::failed(Vec::new(), message.clone()))
                    .collect();
            }
        };
        let statement_timeout = guard.statement_timeout();

        debug!(
            workspace_id = %workspace_id,
            batches = batches.len(),
            "Starting savepoint batches"
        );

        let results = impl_db_dispatch!(PooledConnection, guard.connection(), {
            MySql(c) => mysql::batches(&mut **c, batches, statement_timeout).await,
            Postgres(c) => postgres::batches(&mut **c, batches, statement_timeout).await,
            SQLite(c) => sqlite::batches(&mut **c, batches, statement_timeout).await,
        });
        guard.release();

        let committed: Vec<&str> = batches
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.success)
            .flat_map(|(batch, _)| batch.iter().map(|s| s.as_ref()))
            .collect();

        info!(
            workspace_id = %workspace_id,
            batches = batches.len(),
            succeeded = results.iter().filter(|r| r.success).count(),
            "Savepoint batches finished"
        );

        self.patch_schema(workspace_id, &committed).await;
        results
    }

    async fn patch_schema<S: AsRef<str>>(&self, workspace_id: &str, statements: &[S]) {
        let Some(registry) = &self.registry else {
            return;
        };
        if let Some(report) = registry.apply_schema_changes(workspace_id, statements).await {
            debug!(
                workspace_id = %workspace_id,
                applied = report.applied,
                skipped = report.skipped.len(),
                invalidated = report.invalidated,
                "Schema cache patched"
            );
        }
    }
}

fn batch_error(batch_number: usize, error: &DbError) -> String {
    format!("Batch {} failed: {}", batch_number, error.sanitized())
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

macro_rules! backend_transactions {
    ($name:ident, $conn:ty) => {
        mod $name {
            use super::*;
            use crate::db::executor::$name::run_statement;
            use sqlx::Connection;

            pub async fn atomic<S: AsRef<str> + Sync>(
                conn: &mut $conn,
                statements: &[S],
                statement_timeout: Duration,
            ) -> Result<Vec<StatementRecord>, Aborted> {
                let mut tx = Connection::begin(conn)
                    .await
                    .map_err(|e| Aborted::new(Vec::new(), e))?;

                let mut records = Vec::with_capacity(statements.len());
                for (idx, sql) in statements.iter().enumerate() {
                    let sql = sql.as_ref();
                    match run_statement(&mut *tx, sql, statement_timeout).await {
                        Ok(result) => records.push(StatementRecord {
                            statement_number: idx + 1,
                            sql: sql.to_string(),
                            result,
                        }),
                        Err(e) => {
                            if let Err(rollback) = tx.rollback().await {
                                warn!(error = %rollback, "Rollback failed");
                            }
                            return Err(Aborted::new(
                                records,
                                DbError::transaction_aborted(idx + 1, e),
                            ));
                        }
                    }
                }

                match tx.commit().await {
                    Ok(()) => Ok(records),
                    Err(e) => Err(Aborted::new(records, e)),
                }
            }

            pub async fn batches<S: AsRef<str> + Sync>(
                conn: &mut $conn,
                batches: &[Vec<S>],
                statement_timeout: Duration,
            ) -> Vec<TransactionResult> {
                let mut outer = match Connection::begin(conn).await {
                    Ok(tx) => tx,
                    Err(e) => {
                        let error = DbError::from(e);
                        return (1..=batches.len())
                            .map(|n| TransactionResult::failed(Vec::new(), batch_error(n, &error)))
                            .collect();
                    }
                };

                let mut results = Vec::with_capacity(batches.len());
                for (idx, batch) in batches.iter().enumerate() {
                    let batch_number = idx + 1;
                    let mut savepoint = match Connection::begin(&mut *outer).await {
                        Ok(savepoint) => savepoint,
                        Err(e) => {
                            let error = DbError::from(e);
                            results.push(TransactionResult::failed(
                                Vec::new(),
                                batch_error(batch_number, &error),
                            ));
                            continue;
                        }
                    };

                    let mut records = Vec::with_capacity(batch.len());
                    let mut failure = None;
                    for (stmt_idx, sql) in batch.iter().enumerate() {
                        let sql = sql.as_ref();
                        match run_statement(&mut *savepoint, sql, statement_timeout).await {
                            Ok(result) => records.push(StatementRecord {
                                statement_number: stmt_idx + 1,
                                sql: sql.to_string(),
                                result,
                            }),
                            Err(e) => {
                                failure = Some(DbError::transaction_aborted(stmt_idx + 1, e));
                                break;
                            }
                        }
                    }

                    match failure {
                        None => match savepoint.commit().await {
                            Ok(()) => results.push(TransactionResult::committed(records)),
                            Err(e) => results.push(TransactionResult::failed(
                                records,
                                batch_error(batch_number, &DbError::from(e)),
                            )),
                        },
                        Some(error) => {
                            warn!(batch = batch_number, error = %error, "Batch rolled back to savepoint");
                            if let Err(e) = savepoint.rollback().await {
                                // The outer transaction can no longer be trusted.
                                let error = DbError::from(e);
                                warn!(batch = batch_number, error = %error, "Savepoint rollback failed");
                                if let Err(e) = outer.rollback().await {
                                    warn!(error = %e, "Outer rollback failed");
                                }
                                return fail_all(batches.len(), &error);
                            }
                            results.push(TransactionResult::failed(
                                records,
                                batch_error(batch_number, &error),
                            ));
                        }
                    }
                }

                if let Err(e) = outer.commit().await {
                    let error = DbError::from(e);
                    warn!(error = %error, "Outer commit failed");
                    return fail_all(batches.len(), &error);
                }
                results
            }
        }
    };
}

fn fail_all(batch_count: usize, error: &DbError) -> Vec<TransactionResult> {
    let message = format!("Outer transaction failed: {}", error.sanitized());
    (0..batch_count)
        .map(|_| TransactionResult::failed(Vec::new(), message.clone()))
        .collect()
}

backend_transactions!(mysql, sqlx::MySqlConnection);
backend_transactions!(postgres, sqlx::PgConnection);
backend_transactions!(sqlite, sqlx::SqliteConnection);
