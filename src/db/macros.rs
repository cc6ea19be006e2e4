//! Database dispatch macros for reducing code duplication.
//!
//! Pools, pooled connections and transactions are all three-variant enums over the
//! sqlx backends. These macros generate the match so backend-specific code stays
//! linear. They expand at compile time with zero runtime overhead.

/// Macro for generating database dispatch match arms.
///
/// `$kind` names an enum in `crate::db::pool` whose variants are `MySql`,
/// `Postgres` and `SQLite`.
///
/// # Example
///
/// ```ignore
/// // One arm per backend
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
///
/// // Same body for every backend, type-checked once per variant
/// impl_db_dispatch!(DbPool, pool, |p| p.close().await);
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::pool::$kind::$variant($p) => $body,
            )+
        }
    };
    ($kind:ident, $value:expr, |$p:ident| $body:expr) => {
        match $value {
            $crate::db::pool::$kind::MySql($p) => $body,
            $crate::db::pool::$kind::Postgres($p) => $body,
            $crate::db::pool::$kind::SQLite($p) => $body,
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use crate::db::pool::DbPool;
    use crate::models::DatabaseType;

    fn label(pool: &DbPool) -> &'static str {
        impl_db_dispatch!(DbPool, pool, {
            MySql(_p) => "mysql",
            Postgres(_p) => "postgres",
            SQLite(_p) => "sqlite",
        })
    }

    #[tokio::test]
    async fn test_dispatch_forms_agree() {
        let pool = DbPool::SQLite(
            sqlx::sqlite::SqlitePoolOptions::new()
                .connect_lazy("sqlite::memory:")
                .unwrap(),
        );
        assert_eq!(label(&pool), "sqlite");
        let closed = impl_db_dispatch!(DbPool, &pool, |p| p.is_closed());
        assert!(!closed);
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
    }
}
