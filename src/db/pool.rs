//! Connection pool management.
//!
//! One bounded pool per workspace, built from database-specific pools (MySqlPool,
//! PgPool, SqlitePool) to keep full type support.
//!
//! # Concurrency
//!
//! - Lifecycle operations (create, close, refresh, idle sweep) are serialized by a
//!   single `lifecycle` mutex, so a close racing a sweep can never close the same
//!   pool twice: whoever removes the entry from the map owns its shutdown.
//! - Borrowing only takes the map's read lock long enough to clone the entry
//!   `Arc`; connections then work independently of every registry lock.
//! - `last_used` uses `std::sync::RwLock` and is never held across an await.

use crate::config::PoolOptions;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseConfig, DatabaseType, RedactedConfig, SslMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::pool::{PoolConnection, PoolOptions as SqlxPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on waiting for a pool to drain when closing it.
pub const POOL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe statement used to validate a freshly built pool.
pub const PROBE_SQL: &str = "SELECT 1";

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, |pool| pool.close().await)
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        impl_db_dispatch!(DbPool, self, {
            MySql(_p) => DatabaseType::MySQL,
            Postgres(_p) => DatabaseType::PostgreSQL,
            SQLite(_p) => DatabaseType::SQLite,
        })
    }

    /// Open connections, idle or borrowed.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(DbPool, self, |pool| pool.size())
    }

    pub fn num_idle(&self) -> usize {
        impl_db_dispatch!(DbPool, self, |pool| pool.num_idle())
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(DbPool, self, |pool| pool.is_closed())
    }

    /// Run the probe statement on one pooled connection.
    pub async fn probe(&self) -> Result<(), sqlx::Error> {
        impl_db_dispatch!(DbPool, self, |pool| {
            sqlx::query(PROBE_SQL).execute(pool).await.map(|_| ())
        })
    }

    async fn acquire(&self) -> Result<PooledConnection, sqlx::Error> {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.acquire().await.map(PooledConnection::MySql),
            Postgres(pool) => pool.acquire().await.map(PooledConnection::Postgres),
            SQLite(pool) => pool.acquire().await.map(PooledConnection::SQLite),
        })
    }

    /// Get the server version from the connected database.
    async fn server_version(&self) -> Option<String> {
        let result = impl_db_dispatch!(DbPool, self, {
            MySql(pool) => sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(pool).await,
            Postgres(pool) => sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(pool).await,
            SQLite(pool) => sqlx::query_scalar::<_, String>("SELECT sqlite_version()").fetch_one(pool).await,
        });
        match result {
            Ok(version) => {
                debug!(version = %version, "Got server version");
                Some(version)
            }
            Err(e) => {
                warn!(error = %e, "Failed to get server version");
                None
            }
        }
    }
}

/// A connection borrowed from a workspace pool.
#[derive(Debug)]
pub enum PooledConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// One registered workspace pool.
pub struct PoolEntry {
    pool: DbPool,
    config: DatabaseConfig,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    /// Uses std::sync::RwLock (not tokio) to avoid holding locks across await points.
    last_used: std::sync::RwLock<Instant>,
    /// Count of live borrows. The idle sweep skips pools with active_count > 0.
    active_count: AtomicUsize,
    statement_timeout: Duration,
    server_version: Option<String>,
}

impl PoolEntry {
    /// Update last used time. Synchronous - does not hold locks across await.
    pub fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.write() {
            *last_used = Instant::now();
        }
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
            .read()
            .map(|guard| *guard)
            .unwrap_or(self.created_at)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used().elapsed()
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    fn increment_active(&self) {
        self.active_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at 0 to prevent underflow from extra release calls.
    fn decrement_active(&self) {
        let result = self
            .active_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });

        if let Ok(0) = result {
            warn!(
                db_type = %self.pool.db_type(),
                "Active count underflow detected - extra release call"
            );
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    fn diagnostics(&self, workspace_id: &str) -> PoolDiagnostics {
        let idle = self.idle_for();
        let options = &self.config.pool_options;
        PoolDiagnostics {
            workspace_id: workspace_id.to_string(),
            db_type: self.pool.db_type(),
            config: self.config.redacted(),
            created_at: self.created_at_utc,
            last_used_at: instant_to_utc(self.last_used()),
            idle_secs: idle.as_secs(),
            size: self.pool.size(),
            num_idle: self.pool.num_idle(),
            active_borrows: self.active_count(),
            min_connections: options.min_connections_or_default(self.config.is_sqlite()),
            max_connections: options.max_connections_or_default(self.config.is_sqlite()),
            statement_timeout_secs: self.statement_timeout.as_secs(),
            server_version: self.server_version.clone(),
        }
    }
}

impl std::fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("pool", &self.pool)
            .field("config", &self.config.redacted())
            .field("created_at", &self.created_at)
            .field("active_count", &self.active_count.load(Ordering::Relaxed))
            .finish()
    }
}

fn instant_to_utc(instant: Instant) -> DateTime<Utc> {
    let elapsed = chrono::Duration::from_std(instant.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() - elapsed
}

/// Read-only pool diagnostics. Credentials are redacted.
#[derive(Debug, Clone, Serialize)]
pub struct PoolDiagnostics {
    pub workspace_id: String,
    pub db_type: DatabaseType,
    pub config: RedactedConfig,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub idle_secs: u64,
    /// Open connections.
    pub size: u32,
    pub num_idle: usize,
    pub active_borrows: usize,
    pub min_connections: u32,
    pub max_connections: u32,
    pub statement_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

/// Connection counts for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub num_idle: usize,
    pub active_borrows: usize,
}

/// Marks a pool as in use for as long as it lives.
struct ActiveBorrow(Arc<PoolEntry>);

impl ActiveBorrow {
    fn new(entry: Arc<PoolEntry>) -> Self {
        entry.increment_active();
        Self(entry)
    }
}

impl Drop for ActiveBorrow {
    fn drop(&mut self) {
        self.0.touch();
        self.0.decrement_active();
    }
}

/// RAII guard for a borrowed connection.
///
/// Dropping the guard hands the connection back to its pool and ends the borrow,
/// on every exit path including `?` returns and panics during statement execution.
pub struct ConnectionGuard {
    workspace_id: String,
    // Declared before `borrow` so the connection is back in the pool before the
    // borrow ends.
    conn: PooledConnection,
    borrow: ActiveBorrow,
}

impl ConnectionGuard {
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.borrow.0.pool.db_type()
    }

    /// Statement timeout fixed when the pool was created.
    pub fn statement_timeout(&self) -> Duration {
        self.borrow.0.statement_timeout
    }

    pub fn connection(&mut self) -> &mut PooledConnection {
        &mut self.conn
    }

    /// Return the connection now instead of at end of scope.
    pub fn release(self) {
        debug!(workspace_id = %self.workspace_id, "Releasing connection");
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("workspace_id", &self.workspace_id)
            .field("db_type", &self.db_type())
            .finish_non_exhaustive()
    }
}

/// A cloned pool that holds a borrow on its workspace entry.
pub struct PoolHandle {
    pool: DbPool,
    _borrow: ActiveBorrow,
}

impl std::ops::Deref for PoolHandle {
    type Target = DbPool;

    fn deref(&self) -> &DbPool {
        &self.pool
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PoolHandle").field(&self.pool).finish()
    }
}

/// Registry of workspace pools.
///
/// Create one per process and share it behind an `Arc`.
#[derive(Debug)]
pub struct PoolManager {
    pools: RwLock<HashMap<String, Arc<PoolEntry>>>,
    lifecycle: Mutex<()>,
    defaults: PoolOptions,
}

impl PoolManager {
    /// Create a new pool manager with built-in pool defaults.
    pub fn new() -> Self {
        Self::with_defaults(PoolOptions::default())
    }

    /// Create a pool manager whose pools fall back to `defaults` for any option
    /// their own config leaves unset.
    pub fn with_defaults(defaults: PoolOptions) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            defaults,
        }
    }

    /// Build and register a pool for `workspace_id`, replacing any existing one.
    ///
    /// Returns false, leaving no entry registered, if the config is invalid, the
    /// connection cannot be established or the probe fails.
    pub async fn create(&self, workspace_id: &str, config: DatabaseConfig) -> bool {
        match self.try_create(workspace_id, config).await {
            Ok(()) => true,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Failed to create pool");
                false
            }
        }
    }

    /// Like [`create`](Self::create) but reports why creation failed.
    pub async fn try_create(&self, workspace_id: &str, config: DatabaseConfig) -> DbResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = self.pools.write().await.remove(workspace_id);
        if let Some(previous) = previous {
            info!(workspace_id = %workspace_id, "Replacing existing pool");
            close_entry(workspace_id, &previous).await;
        }

        let entry = self.open_entry(config).await?;
        info!(
            workspace_id = %workspace_id,
            db_type = %entry.pool.db_type(),
            server_version = ?entry.server_version,
            "Pool created"
        );
        self.pools
            .write()
            .await
            .insert(workspace_id.to_string(), Arc::new(entry));
        Ok(())
    }

    /// Borrow a connection from the workspace pool.
    pub async fn acquire(&self, workspace_id: &str) -> DbResult<ConnectionGuard> {
        let entry = self.entry(workspace_id).await?;
        entry.touch();
        let borrow = ActiveBorrow::new(Arc::clone(&entry));

        let conn = entry.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted(workspace_id),
            sqlx::Error::PoolClosed => DbError::connection_broken(
                format!("Pool for workspace '{}' is closed", workspace_id),
                "Refresh or recreate the workspace",
            ),
            other => DbError::from(other),
        })?;

        debug!(workspace_id = %workspace_id, "Connection acquired");
        Ok(ConnectionGuard {
            workspace_id: workspace_id.to_string(),
            conn,
            borrow,
        })
    }

    /// Pool handle for catalog queries that manage their own connections.
    ///
    /// The pool counts as borrowed until the handle drops, so the idle sweep
    /// leaves it open for the whole operation.
    pub async fn pool(&self, workspace_id: &str) -> DbResult<PoolHandle> {
        let entry = self.entry(workspace_id).await?;
        entry.touch();
        Ok(PoolHandle {
            pool: entry.pool.clone(),
            _borrow: ActiveBorrow::new(entry),
        })
    }

    /// Close the workspace pool. False if none was registered.
    pub async fn close(&self, workspace_id: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let removed = self.pools.write().await.remove(workspace_id);
        match removed {
            Some(entry) => {
                close_entry(workspace_id, &entry).await;
                info!(workspace_id = %workspace_id, "Pool closed");
                true
            }
            None => {
                debug!(workspace_id = %workspace_id, "No pool to close");
                false
            }
        }
    }

    /// Rebuild the pool from its stored config. The old pool stays in service if
    /// the rebuild fails. False if absent or the rebuild failed.
    pub async fn refresh(&self, workspace_id: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        let config = {
            let pools = self.pools.read().await;
            match pools.get(workspace_id) {
                Some(entry) => entry.config.clone(),
                None => return false,
            }
        };

        let fresh = match self.open_entry(config).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Pool refresh failed, keeping old pool");
                return false;
            }
        };

        let previous = self
            .pools
            .write()
            .await
            .insert(workspace_id.to_string(), Arc::new(fresh));
        if let Some(previous) = previous {
            close_entry(workspace_id, &previous).await;
        }
        info!(workspace_id = %workspace_id, "Pool refreshed");
        true
    }

    pub async fn introspect(&self, workspace_id: &str) -> Option<PoolDiagnostics> {
        let pools = self.pools.read().await;
        pools.get(workspace_id).map(|e| e.diagnostics(workspace_id))
    }

    /// Diagnostics for every pool, ordered by workspace id.
    pub async fn introspect_all(&self) -> Vec<PoolDiagnostics> {
        let pools = self.pools.read().await;
        let mut all: Vec<_> = pools
            .iter()
            .map(|(id, e)| e.diagnostics(id))
            .collect();
        all.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        all
    }

    pub async fn pool_stats(&self, workspace_id: &str) -> Option<PoolStats> {
        let pools = self.pools.read().await;
        pools.get(workspace_id).map(|e| PoolStats {
            size: e.pool.size(),
            num_idle: e.pool.num_idle(),
            active_borrows: e.active_count(),
        })
    }

    pub async fn config(&self, workspace_id: &str) -> Option<DatabaseConfig> {
        let pools = self.pools.read().await;
        pools.get(workspace_id).map(|e| e.config.clone())
    }

    pub async fn has_pool(&self, workspace_id: &str) -> bool {
        self.pools.read().await.contains_key(workspace_id)
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn workspace_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.pools.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close pools unused for longer than `inactivity_timeout`.
    ///
    /// Uses collect-then-act: candidates are gathered under the read lock, then
    /// each is re-checked under the write lock before removal, and closed outside
    /// it. Pools with live borrows are never evicted. Returns the closed ids.
    pub async fn close_idle(&self, inactivity_timeout: Duration) -> Vec<String> {
        let _lifecycle = self.lifecycle.lock().await;

        let candidates: Vec<String> = {
            let pools = self.pools.read().await;
            pools
                .iter()
                .filter(|(id, entry)| {
                    if entry.active_count() > 0 {
                        debug!(
                            workspace_id = %id,
                            active_count = entry.active_count(),
                            "Skipping cleanup of active pool"
                        );
                        return false;
                    }
                    entry.idle_for() > inactivity_timeout
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut closed = Vec::with_capacity(candidates.len());
        for workspace_id in candidates {
            let removed = {
                let mut pools = self.pools.write().await;
                let still_idle = pools.get(&workspace_id).is_some_and(|entry| {
                    entry.active_count() == 0 && entry.idle_for() > inactivity_timeout
                });
                if still_idle {
                    pools.remove(&workspace_id)
                } else {
                    debug!(workspace_id = %workspace_id, "Pool used during cleanup, skipping");
                    None
                }
            };

            if let Some(entry) = removed {
                close_entry(&workspace_id, &entry).await;
                info!(
                    workspace_id = %workspace_id,
                    idle_secs = entry.idle_for().as_secs(),
                    "Closed inactive pool"
                );
                closed.push(workspace_id);
            }
        }
        closed
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let drained: Vec<_> = self.pools.write().await.drain().collect();
        for (workspace_id, entry) in drained {
            close_entry(&workspace_id, &entry).await;
        }
        info!("All pools closed");
    }

    async fn entry(&self, workspace_id: &str) -> DbResult<Arc<PoolEntry>> {
        let pools = self.pools.read().await;
        pools
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| DbError::workspace_not_found(workspace_id))
    }

    /// Connect, probe and wrap a pool. Nothing is registered here.
    async fn open_entry(&self, mut config: DatabaseConfig) -> DbResult<PoolEntry> {
        config.validate()?;
        config.pool_options = config.pool_options.merged_over(&self.defaults);
        config
            .pool_options
            .validate()
            .map_err(|e| DbError::configuration(e, "Fix the pool options"))?;

        let connect_timeout = config.pool_options.connect_timeout();
        let pool = timeout(connect_timeout, create_pool(&config))
            .await
            .map_err(|_| DbError::timeout("connect", connect_timeout.as_secs()))??;

        let probe = timeout(connect_timeout, pool.probe()).await;
        let probe_error = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(DbError::connection_broken(
                format!("Probe failed: {}", e),
                connection_suggestion(config.db_type, &e),
            )),
            Err(_) => Some(DbError::timeout("probe", connect_timeout.as_secs())),
        };
        if let Some(e) = probe_error {
            pool.close().await;
            return Err(e);
        }

        let server_version = pool.server_version().await;
        let now = Instant::now();
        Ok(PoolEntry {
            statement_timeout: config.pool_options.statement_timeout(),
            pool,
            config,
            created_at: now,
            created_at_utc: Utc::now(),
            last_used: std::sync::RwLock::new(now),
            active_count: AtomicUsize::new(0),
            server_version,
        })
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_entry(workspace_id: &str, entry: &PoolEntry) {
    if timeout(POOL_CLOSE_TIMEOUT, entry.pool.close()).await.is_err() {
        warn!(
            workspace_id = %workspace_id,
            active_borrows = entry.active_count(),
            "Timed out waiting for pool to close; connections will drop when released"
        );
    }
}

fn sqlx_pool_options<DB: sqlx::Database>(
    opts: &PoolOptions,
    is_sqlite: bool,
) -> SqlxPoolOptions<DB> {
    SqlxPoolOptions::<DB>::new()
        .min_connections(opts.min_connections_or_default(is_sqlite))
        .max_connections(opts.max_connections_or_default(is_sqlite))
        .acquire_timeout(opts.acquire_timeout())
        .idle_timeout(Some(opts.idle_timeout()))
        .test_before_acquire(opts.test_before_acquire_or_default())
}

/// Create a connection pool for the given configuration.
async fn create_pool(config: &DatabaseConfig) -> DbResult<DbPool> {
    let opts = &config.pool_options;
    let is_sqlite = config.is_sqlite();
    let connect_error = |e: sqlx::Error| match e {
        sqlx::Error::Configuration(_) => DbError::from(e),
        other => DbError::connection_broken(
            format!("Failed to connect: {}", other),
            connection_suggestion(config.db_type, &other),
        ),
    };

    match config.db_type {
        DatabaseType::MySQL => {
            let mut options = MySqlConnectOptions::new()
                .host(&config.host)
                .database(&config.database)
                .ssl_mode(mysql_ssl_mode(config.effective_sslmode()))
                .charset("utf8mb4");
            if let Some(port) = config.port {
                options = options.port(port);
            }
            if let Some(username) = &config.username {
                options = options.username(username);
            }
            if let Some(password) = &config.password {
                options = options.password(password);
            }

            let pool = sqlx_pool_options::<MySql>(opts, is_sqlite)
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::MySql(pool))
        }
        DatabaseType::PostgreSQL => {
            let mut options = PgConnectOptions::new()
                .host(&config.host)
                .database(&config.database)
                .ssl_mode(pg_ssl_mode(config.effective_sslmode()));
            if let Some(port) = config.port {
                options = options.port(port);
            }
            if let Some(username) = &config.username {
                options = options.username(username);
            }
            if let Some(password) = &config.password {
                options = options.password(password);
            }

            let pool = sqlx_pool_options::<Postgres>(opts, is_sqlite)
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let options = SqliteConnectOptions::new()
                .filename(&config.database)
                .create_if_missing(true);

            let pool = sqlx_pool_options::<Sqlite>(opts, is_sqlite)
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::SQLite(pool))
        }
    }
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn mysql_ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disable => MySqlSslMode::Disabled,
        SslMode::Allow | SslMode::Prefer => MySqlSslMode::Preferred,
        SslMode::Require => MySqlSslMode::Required,
        SslMode::VerifyCa => MySqlSslMode::VerifyCa,
        SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check the sslmode setting or the server's TLS configuration".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::MySQL => {
            format!("Verify host, port and database for the {} server", db_type)
        }
        DatabaseType::SQLite => {
            "Verify the file path is writable: its directory must exist".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_config(dir: &TempDir, name: &str) -> DatabaseConfig {
        DatabaseConfig::sqlite(dir.path().join(name).to_string_lossy().to_string())
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(pg_ssl_mode(SslMode::VerifyFull), PgSslMode::VerifyFull));
        assert!(matches!(
            mysql_ssl_mode(SslMode::Prefer),
            MySqlSslMode::Preferred
        ));
        assert!(matches!(
            mysql_ssl_mode(SslMode::Disable),
            MySqlSslMode::Disabled
        ));
    }

    #[tokio::test]
    async fn test_create_probe_and_close() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();

        assert!(manager.create("w1", sqlite_config(&dir, "a.db")).await);
        assert!(manager.has_pool("w1").await);
        assert_eq!(manager.pool_count().await, 1);

        let diag = manager.introspect("w1").await.unwrap();
        assert_eq!(diag.db_type, DatabaseType::SQLite);
        assert_eq!(diag.max_connections, 1);
        assert!(diag.server_version.is_some());

        assert!(manager.close("w1").await);
        assert!(!manager.close("w1").await);
        assert!(!manager.has_pool("w1").await);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();
        let missing_dir = dir.path().join("missing").join("x.db");
        let config = DatabaseConfig::sqlite(missing_dir.to_string_lossy().to_string());

        assert!(!manager.create("w1", config).await);
        assert!(!manager.has_pool("w1").await);
    }

    #[tokio::test]
    async fn test_create_replaces_existing_pool() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();
        assert!(manager.create("w1", sqlite_config(&dir, "a.db")).await);
        assert!(manager.create("w1", sqlite_config(&dir, "b.db")).await);

        assert_eq!(manager.pool_count().await, 1);
        let config = manager.config("w1").await.unwrap();
        assert!(config.database.ends_with("b.db"));
    }

    #[tokio::test]
    async fn test_acquire_tracks_active_borrows() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();
        assert!(manager.create("w1", sqlite_config(&dir, "a.db")).await);

        let guard = manager.acquire("w1").await.unwrap();
        assert_eq!(guard.workspace_id(), "w1");
        assert_eq!(manager.pool_stats("w1").await.unwrap().active_borrows, 1);
        guard.release();
        assert_eq!(manager.pool_stats("w1").await.unwrap().active_borrows, 0);
    }

    #[tokio::test]
    async fn test_acquire_unknown_workspace() {
        let manager = PoolManager::new();
        let err = manager.acquire("nope").await.unwrap_err();
        assert!(matches!(err, DbError::WorkspaceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_idle_skips_busy_pools() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();
        assert!(manager.create("busy", sqlite_config(&dir, "busy.db")).await);
        assert!(manager.create("idle", sqlite_config(&dir, "idle.db")).await);

        let guard = manager.acquire("busy").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let closed = manager.close_idle(Duration::from_millis(10)).await;
        assert_eq!(closed, vec!["idle".to_string()]);
        assert!(manager.has_pool("busy").await);
        drop(guard);
    }

    #[tokio::test]
    async fn test_pool_handle_holds_pool_open() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();
        assert!(manager.create("w1", sqlite_config(&dir, "a.db")).await);

        let handle = manager.pool("w1").await.unwrap();
        assert_eq!(manager.pool_stats("w1").await.unwrap().active_borrows, 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(manager.close_idle(Duration::from_millis(10)).await.is_empty());
        assert!(!handle.is_closed());

        drop(handle);
        assert_eq!(manager.pool_stats("w1").await.unwrap().active_borrows, 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            manager.close_idle(Duration::from_millis(10)).await,
            vec!["w1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_refresh() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::new();
        assert!(!manager.refresh("w1").await);
        assert!(manager.create("w1", sqlite_config(&dir, "a.db")).await);
        let before = manager.introspect("w1").await.unwrap().created_at;
        assert!(manager.refresh("w1").await);
        let after = manager.introspect("w1").await.unwrap().created_at;
        assert!(after >= before);
        assert!(manager.acquire("w1").await.is_ok());
    }

    #[tokio::test]
    async fn test_defaults_apply_to_unset_options() {
        let dir = TempDir::new().unwrap();
        let manager = PoolManager::with_defaults(PoolOptions {
            statement_timeout_secs: Some(7),
            ..Default::default()
        });
        assert!(manager.create("w1", sqlite_config(&dir, "a.db")).await);
        let guard = manager.acquire("w1").await.unwrap();
        assert_eq!(guard.statement_timeout(), Duration::from_secs(7));
    }
}
