//! Statement execution against workspace pools.
//!
//! Every call borrows one connection through a [`ConnectionGuard`], runs the
//! statement under the pool's statement timeout and hands the connection back
//! when the guard drops, whether the statement succeeded or not.
//!
//! # Architecture
//!
//! Backend-specific code lives in the `mysql`, `postgres` and `sqlite`
//! submodules. They are generated from one template because the only difference
//! between them is the concrete connection type.

use crate::db::pool::{PROBE_SQL, PoolManager, PooledConnection};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ExecutionOutcome, StatementKind, StatementResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs single statements on behalf of workspaces.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pools: Arc<PoolManager>,
}

impl QueryExecutor {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    /// Run one statement and report the outcome with a sanitized error.
    pub async fn execute(&self, workspace_id: &str, sql: &str) -> ExecutionOutcome {
        match self.try_execute(workspace_id, sql).await {
            Ok(result) => ExecutionOutcome::ok(result),
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Statement failed");
                ExecutionOutcome::failed(e.sanitized())
            }
        }
    }

    /// Run one statement, keeping the full error.
    ///
    /// Reads return their rows. Writes return the affected-row count.
    pub async fn try_execute(&self, workspace_id: &str, sql: &str) -> DbResult<StatementResult> {
        if sql.trim().is_empty() {
            return Err(DbError::invalid_input("SQL statement cannot be empty"));
        }

        let start = Instant::now();
        let mut guard = self.pools.acquire(workspace_id).await?;
        let statement_timeout = guard.statement_timeout();

        debug!(
            workspace_id = %workspace_id,
            sql = %sql,
            timeout_secs = statement_timeout.as_secs(),
            "Executing statement"
        );

        let result = run_statement(guard.connection(), sql, statement_timeout).await;
        guard.release();

        if let Ok(result) = &result {
            debug!(
                workspace_id = %workspace_id,
                kind = ?result.kind(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Statement completed"
            );
        }
        result
    }

    /// Run statements one after another, each on its own borrow and outside any
    /// transaction. A failure does not stop the statements after it.
    pub async fn execute_many<S: AsRef<str>>(
        &self,
        workspace_id: &str,
        statements: &[S],
    ) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(statements.len());
        for sql in statements {
            outcomes.push(self.execute(workspace_id, sql.as_ref()).await);
        }
        outcomes
    }

    /// Whether the workspace pool answers a trivial query.
    pub async fn test_connection(&self, workspace_id: &str) -> bool {
        match self.try_execute(workspace_id, PROBE_SQL).await {
            Ok(_) => true,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Connection test failed");
                false
            }
        }
    }
}

/// Run one statement on a borrowed connection.
pub(crate) async fn run_statement(
    conn: &mut PooledConnection,
    sql: &str,
    statement_timeout: Duration,
) -> DbResult<StatementResult> {
    impl_db_dispatch!(PooledConnection, conn, {
        MySql(c) => mysql::run_statement(&mut **c, sql, statement_timeout).await,
        Postgres(c) => postgres::run_statement(&mut **c, sql, statement_timeout).await,
        SQLite(c) => sqlite::run_statement(&mut **c, sql, statement_timeout).await,
    })
}

fn timeout_error(statement_timeout: Duration) -> DbError {
    DbError::timeout("statement execution", statement_timeout.as_secs())
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Raw SQL goes through `Executor` directly rather than `sqlx::query` so that
// statements the prepared protocol rejects (some DDL, procedures) still run.

macro_rules! backend_executor {
    ($name:ident, $conn:ty) => {
        pub(crate) mod $name {
            use super::*;
            use sqlx::Executor;

            pub async fn run_statement(
                conn: &mut $conn,
                sql: &str,
                statement_timeout: Duration,
            ) -> DbResult<StatementResult> {
                match StatementKind::classify(sql) {
                    StatementKind::Read => {
                        let rows = timeout(statement_timeout, Executor::fetch_all(&mut *conn, sql))
                            .await
                            .map_err(|_| timeout_error(statement_timeout))??;
                        Ok(StatementResult::Rows {
                            rows: rows.iter().map(|row| row.to_json_map()).collect(),
                        })
                    }
                    StatementKind::Write => {
                        let done = timeout(statement_timeout, Executor::execute(&mut *conn, sql))
                            .await
                            .map_err(|_| timeout_error(statement_timeout))??;
                        Ok(StatementResult::Affected {
                            affected_rows: done.rows_affected(),
                        })
                    }
                }
            }
        }
    };
}

backend_executor!(mysql, sqlx::MySqlConnection);
backend_executor!(postgres, sqlx::PgConnection);
backend_executor!(sqlite, sqlx::SqliteConnection);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseConfig;
    use tempfile::TempDir;

    async fn executor(dir: &TempDir) -> QueryExecutor {
        let pools = Arc::new(PoolManager::new());
        let config =
            DatabaseConfig::sqlite(dir.path().join("exec.db").to_string_lossy().to_string());
        assert!(pools.create("w1", config).await);
        QueryExecutor::new(pools)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir).await;

        let created = exec
            .execute("w1", "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await;
        assert!(created.success, "{:?}", created.error);

        let inserted = exec
            .execute("w1", "INSERT INTO t (name) VALUES ('a'), ('b')")
            .await;
        assert_eq!(inserted.result.unwrap().affected_rows(), Some(2));

        let read = exec.execute("w1", "SELECT name FROM t ORDER BY id").await;
        let result = read.result.unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "a");
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir).await;

        let outcome = exec.execute("w1", "SELECT * FROM missing_table").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("missing_table"));

        let empty = exec.execute("w1", "   ").await;
        assert!(!empty.success);
    }

    #[tokio::test]
    async fn test_unknown_workspace() {
        let exec = QueryExecutor::new(Arc::new(PoolManager::new()));
        assert!(matches!(
            exec.try_execute("nope", "SELECT 1").await,
            Err(DbError::WorkspaceNotFound { .. })
        ));
        assert!(!exec.test_connection("nope").await);
    }

    #[tokio::test]
    async fn test_execute_many_continues_after_failure() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir).await;
        assert!(exec.test_connection("w1").await);

        let outcomes = exec
            .execute_many("w1", &["SELECT 1", "SELECT * FROM nope", "SELECT 2"])
            .await;
        let flags: Vec<bool> = outcomes.iter().map(|o| o.success).collect();
        assert_eq!(flags, vec![true, false, true]);
    }
}
