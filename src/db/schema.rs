//! Built-in schema analyzer backed by the live database catalog.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface:
//! `list_tables` and `describe_table`. Row counts and sample rows are collected
//! by backend-neutral code on top.

use crate::db::analyzer::{AnalyzerFactory, SchemaAnalyzer};
use crate::db::pool::{DbPool, PoolManager};
use crate::db::schema_cache::SchemaCache;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDefinition, DatabaseConfig, DatabaseType, ForeignKey, ForeignKeyAction, IndexInfo, Row,
    TableKey, TableMetadata,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows kept per table for orientation.
pub const SAMPLE_ROWS: usize = 5;

/// Analyzer that reads the catalog of the workspace's own database.
pub struct CatalogAnalyzer {
    workspace_id: String,
    db_type: DatabaseType,
    default_schema: String,
    pools: Arc<PoolManager>,
}

impl CatalogAnalyzer {
    pub fn new(workspace_id: &str, config: &DatabaseConfig, pools: Arc<PoolManager>) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            db_type: config.db_type,
            default_schema: default_schema_for(config),
            pools,
        }
    }

    async fn describe(&self, pool: &DbPool, table: &str, schema: &str) -> DbResult<TableMetadata> {
        let mut meta = match pool {
            DbPool::Postgres(p) => postgres::describe_table(p, table, schema).await?,
            DbPool::MySql(p) => mysql::describe_table(p, table, schema).await?,
            DbPool::SQLite(p) => sqlite::describe_table(p, table, schema).await?,
        };

        let qualified = qualified_name(self.db_type, &meta.key());
        match count_rows(pool, &qualified).await {
            Ok(count) => meta.row_count = Some(count),
            Err(e) => warn!(table = %meta.key(), error = %e, "Failed to count rows"),
        }
        match sample_rows(pool, &qualified).await {
            Ok(rows) => meta.sample_data = Some(rows),
            Err(e) => warn!(table = %meta.key(), error = %e, "Failed to sample rows"),
        }
        Ok(meta)
    }
}

impl std::fmt::Debug for CatalogAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogAnalyzer")
            .field("workspace_id", &self.workspace_id)
            .field("db_type", &self.db_type)
            .field("default_schema", &self.default_schema)
            .finish()
    }
}

#[async_trait]
impl SchemaAnalyzer for CatalogAnalyzer {
    fn default_schema(&self) -> &str {
        &self.default_schema
    }

    fn normalize_identifier(&self, ident: &str) -> String {
        match self.db_type {
            // PostgreSQL folds unquoted identifiers to lower case.
            DatabaseType::PostgreSQL => ident.to_lowercase(),
            DatabaseType::MySQL | DatabaseType::SQLite => ident.to_string(),
        }
    }

    async fn analyze_schema(&self) -> DbResult<SchemaCache> {
        let pool = self.pools.pool(&self.workspace_id).await?;
        let keys = match &*pool {
            DbPool::Postgres(p) => postgres::list_tables(p).await?,
            DbPool::MySql(p) => mysql::list_tables(p, &self.default_schema).await?,
            DbPool::SQLite(p) => sqlite::list_tables(p, &self.default_schema).await?,
        };

        let mut tables = Vec::with_capacity(keys.len());
        let mut failed = 0;
        for key in keys {
            match self.describe(&pool, &key.table, &key.schema).await {
                Ok(meta) => tables.push(meta),
                Err(e) => {
                    warn!(
                        workspace_id = %self.workspace_id,
                        table = %key,
                        error = %e,
                        "Failed to analyze table"
                    );
                    failed += 1;
                }
            }
        }

        let cache = SchemaCache::from_tables(&self.default_schema, tables, failed);
        info!(
            workspace_id = %self.workspace_id,
            tables = cache.summary().total_tables,
            failed = failed,
            relationships = cache.summary().total_relationships,
            "Schema analysis complete"
        );
        Ok(cache)
    }

    async fn table_info(&self, table: &str, schema: Option<&str>) -> DbResult<TableMetadata> {
        let pool = self.pools.pool(&self.workspace_id).await?;
        let schema = schema.unwrap_or(&self.default_schema);
        self.describe(&pool, table, schema).await
    }
}

/// Factory for [`CatalogAnalyzer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogAnalyzerFactory;

impl AnalyzerFactory for CatalogAnalyzerFactory {
    fn bind(
        &self,
        workspace_id: &str,
        config: &DatabaseConfig,
        pools: Arc<PoolManager>,
    ) -> DbResult<Arc<dyn SchemaAnalyzer>> {
        Ok(Arc::new(CatalogAnalyzer::new(workspace_id, config, pools)))
    }
}

/// Schema that unqualified names resolve against for this config.
pub fn default_schema_for(config: &DatabaseConfig) -> String {
    match config.db_type {
        DatabaseType::PostgreSQL => "public".to_string(),
        DatabaseType::MySQL => config.database.clone(),
        DatabaseType::SQLite => "main".to_string(),
    }
}

/// Quote an identifier for the given backend.
pub fn quote_identifier(db_type: DatabaseType, ident: &str) -> String {
    match db_type {
        DatabaseType::MySQL => format!("`{}`", ident.replace('`', "``")),
        DatabaseType::PostgreSQL | DatabaseType::SQLite => {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
    }
}

fn qualified_name(db_type: DatabaseType, key: &TableKey) -> String {
    format!(
        "{}.{}",
        quote_identifier(db_type, &key.schema),
        quote_identifier(db_type, &key.table)
    )
}

async fn count_rows(pool: &DbPool, qualified: &str) -> DbResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", qualified);
    let count = impl_db_dispatch!(DbPool, pool, |p| {
        sqlx::query_scalar::<_, i64>(&sql).fetch_one(p).await?
    });
    Ok(count.max(0) as u64)
}

async fn sample_rows(pool: &DbPool, qualified: &str) -> DbResult<Vec<Row>> {
    let sql = format!("SELECT * FROM {} LIMIT {}", qualified, SAMPLE_ROWS);
    let rows = impl_db_dispatch!(DbPool, pool, |p| {
        sqlx::query(&sql)
            .fetch_all(p)
            .await?
            .iter()
            .map(|row| row.to_json_map())
            .collect::<Vec<_>>()
    });
    Ok(rows)
}

fn not_found(table: &str, schema: &str) -> DbError {
    DbError::schema(
        format!("Table '{}.{}' not found", schema, table),
        format!("{}.{}", schema, table),
    )
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Centralized SQL queries for catalog introspection. Each database has its own
// submodule with queries adapted to its specific system catalogs.

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
        SELECT table_schema::text AS table_schema, table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_type = 'BASE TABLE'
        AND table_schema NOT IN ('pg_catalog', 'information_schema')
        AND table_schema NOT LIKE 'pg_toast%'
        ORDER BY table_schema, table_name
        "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        LEFT JOIN (
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1
            AND tc.table_schema = $2
            AND tc.constraint_type = 'PRIMARY KEY'
        ) pk ON c.column_name = pk.column_name
        WHERE c.table_name = $1 AND c.table_schema = $2
        ORDER BY c.ordinal_position
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            tc.constraint_name::text AS constraint_name,
            kcu.column_name::text AS column_name,
            ccu.table_schema::text AS foreign_table_schema,
            ccu.table_name::text AS foreign_table_name,
            ccu.column_name::text AS foreign_column_name,
            rc.delete_rule::text AS delete_rule,
            rc.update_rule::text AS update_rule
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.constraint_schema = tc.table_schema
        JOIN information_schema.referential_constraints rc
            ON rc.constraint_name = tc.constraint_name
            AND rc.constraint_schema = tc.table_schema
        WHERE tc.table_name = $1
        AND tc.table_schema = $2
        AND tc.constraint_type = 'FOREIGN KEY'
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            i.relname::text AS index_name,
            array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS column_names,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE t.relname = $1 AND n.nspname = $2
        GROUP BY i.relname, ix.indisunique, ix.indisprimary
        "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
        SELECT
            CONVERT(TABLE_SCHEMA USING utf8) AS TABLE_SCHEMA,
            CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = ?
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(k.CONSTRAINT_NAME USING utf8) AS CONSTRAINT_NAME,
            CONVERT(k.COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(k.REFERENCED_TABLE_SCHEMA USING utf8) AS REFERENCED_TABLE_SCHEMA,
            CONVERT(k.REFERENCED_TABLE_NAME USING utf8) AS REFERENCED_TABLE_NAME,
            CONVERT(k.REFERENCED_COLUMN_NAME USING utf8) AS REFERENCED_COLUMN_NAME,
            CONVERT(r.DELETE_RULE USING utf8) AS DELETE_RULE,
            CONVERT(r.UPDATE_RULE USING utf8) AS UPDATE_RULE
        FROM information_schema.KEY_COLUMN_USAGE k
        JOIN information_schema.REFERENTIAL_CONSTRAINTS r
            ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
            AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
        WHERE k.TABLE_NAME = ?
        AND k.TABLE_SCHEMA = ?
        AND k.REFERENCED_TABLE_NAME IS NOT NULL
        "#;

        pub const DESCRIBE_INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) AS COLUMN_NAMES,
            NOT NON_UNIQUE AS IS_UNIQUE
        FROM information_schema.STATISTICS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ?
        GROUP BY INDEX_NAME, NON_UNIQUE
        "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
        AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#;

        pub const TABLE_INFO: &str = "SELECT * FROM pragma_table_info(?1, ?2)";
        pub const FOREIGN_KEY_LIST: &str = "SELECT * FROM pragma_foreign_key_list(?1, ?2)";
        pub const INDEX_LIST: &str = "SELECT * FROM pragma_index_list(?1, ?2)";
        pub const INDEX_INFO: &str = "SELECT * FROM pragma_index_info(?1, ?2) ORDER BY seqno";
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn list_tables(pool: &PgPool) -> DbResult<Vec<TableKey>> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        let keys = rows
            .iter()
            .map(|row| TableKey::new(row.get::<String, _>("table_schema"), row.get::<String, _>("table_name")))
            .collect::<Vec<_>>();
        debug!(count = keys.len(), "Listed PostgreSQL tables");
        Ok(keys)
    }

    pub async fn describe_table(
        pool: &PgPool,
        table_name: &str,
        schema_name: &str,
    ) -> DbResult<TableMetadata> {
        let columns = fetch_columns(pool, table_name, schema_name).await?;
        if columns.is_empty() {
            return Err(not_found(table_name, schema_name));
        }

        let mut meta = columns
            .into_iter()
            .fold(TableMetadata::new(schema_name, table_name), |t, c| {
                t.with_column(c)
            });
        meta.foreign_keys = fetch_foreign_keys(pool, table_name, schema_name).await?;
        meta.indexes = fetch_indexes(pool, table_name, schema_name).await;
        Ok(meta)
    }

    async fn fetch_columns(
        pool: &PgPool,
        table_name: &str,
        schema_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table_name)
            .bind(schema_name)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let column_type: String = row.get("column_type");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> = row.try_get("column_default").ok().flatten();
                let is_pk: bool = row.get("is_primary_key");

                let mut col = ColumnDefinition::new(&name, &column_type, nullable == "YES")
                    .with_primary_key(is_pk);
                if let Some(ref def) = default_value {
                    col = col.with_default_str(def);
                }
                col
            })
            .collect())
    }

    async fn fetch_foreign_keys(
        pool: &PgPool,
        table_name: &str,
        schema_name: &str,
    ) -> DbResult<Vec<ForeignKey>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_FOREIGN_KEYS)
            .bind(table_name)
            .bind(schema_name)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("constraint_name");
                let column: String = row.get("column_name");
                let ref_schema: String = row.get("foreign_table_schema");
                let ref_table: String = row.get("foreign_table_name");
                let ref_column: String = row.get("foreign_column_name");
                let delete_rule: String = row.get("delete_rule");
                let update_rule: String = row.get("update_rule");

                ForeignKey::new(column, ref_table, ref_column)
                    .with_name(name)
                    .with_references_schema(ref_schema)
                    .with_on_delete(ForeignKeyAction::parse(&delete_rule))
                    .with_on_update(ForeignKeyAction::parse(&update_rule))
            })
            .collect())
    }

    async fn fetch_indexes(pool: &PgPool, table_name: &str, schema_name: &str) -> Vec<IndexInfo> {
        let rows = match sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table_name)
            .bind(schema_name)
            .fetch_all(pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = table_name, error = %e, "Failed to list indexes");
                return Vec::new();
            }
        };

        rows.iter()
            .filter_map(|row| {
                let name: String = row.get("index_name");
                let columns: Vec<String> = row.get("column_names");
                let is_unique: bool = row.get("is_unique");
                let is_primary: bool = row.get("is_primary");

                (!columns.is_empty()).then(|| {
                    IndexInfo::new(name, columns)
                        .with_unique(is_unique)
                        .with_primary(is_primary)
                })
            })
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlPool, Row};

    /// Safely get a string from a MySQL row.
    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &sqlx::mysql::MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &sqlx::mysql::MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn list_tables(pool: &MySqlPool, schema: &str) -> DbResult<Vec<TableKey>> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;
        let keys = rows
            .iter()
            .map(|row| TableKey::new(get_string(row, "TABLE_SCHEMA"), get_string(row, "TABLE_NAME")))
            .filter(|key| !key.table.is_empty())
            .collect::<Vec<_>>();
        debug!(count = keys.len(), schema = schema, "Listed MySQL tables");
        Ok(keys)
    }

    pub async fn describe_table(
        pool: &MySqlPool,
        table_name: &str,
        schema: &str,
    ) -> DbResult<TableMetadata> {
        let columns = fetch_columns(pool, table_name, schema).await?;
        if columns.is_empty() {
            return Err(not_found(table_name, schema));
        }

        let mut meta = columns
            .into_iter()
            .fold(TableMetadata::new(schema, table_name), |t, c| t.with_column(c));
        meta.foreign_keys = fetch_foreign_keys(pool, table_name, schema).await?;
        meta.indexes = fetch_indexes(pool, table_name, schema).await;
        Ok(meta)
    }

    async fn fetch_columns(
        pool: &MySqlPool,
        table_name: &str,
        schema: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table_name)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME");
                let column_type = get_string(row, "COLUMN_TYPE");
                let nullable = get_string(row, "IS_NULLABLE");
                let default_value = get_optional_string(row, "COLUMN_DEFAULT");
                let is_pk = get_string(row, "COLUMN_KEY") == "PRI";

                let mut col = ColumnDefinition::new(&name, &column_type, nullable == "YES")
                    .with_primary_key(is_pk);
                if let Some(ref def) = default_value {
                    col = col.with_default_str(def);
                }
                col
            })
            .collect())
    }

    async fn fetch_foreign_keys(
        pool: &MySqlPool,
        table_name: &str,
        schema: &str,
    ) -> DbResult<Vec<ForeignKey>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_FOREIGN_KEYS)
            .bind(table_name)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let mut fk = ForeignKey::new(
                    get_string(row, "COLUMN_NAME"),
                    get_string(row, "REFERENCED_TABLE_NAME"),
                    get_string(row, "REFERENCED_COLUMN_NAME"),
                )
                .with_name(get_string(row, "CONSTRAINT_NAME"))
                .with_on_delete(ForeignKeyAction::parse(&get_string(row, "DELETE_RULE")))
                .with_on_update(ForeignKeyAction::parse(&get_string(row, "UPDATE_RULE")));
                if let Some(ref_schema) = get_optional_string(row, "REFERENCED_TABLE_SCHEMA") {
                    fk = fk.with_references_schema(ref_schema);
                }
                fk
            })
            .collect())
    }

    async fn fetch_indexes(pool: &MySqlPool, table_name: &str, schema: &str) -> Vec<IndexInfo> {
        let rows = match sqlx::query(queries::mysql::DESCRIBE_INDEXES)
            .bind(table_name)
            .bind(schema)
            .fetch_all(pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = table_name, error = %e, "Failed to list indexes");
                return Vec::new();
            }
        };

        rows.iter()
            .map(|row| {
                let name = get_string(row, "INDEX_NAME");
                let columns: Vec<String> = get_string(row, "COLUMN_NAMES")
                    .split(',')
                    .map(|s| s.to_string())
                    .collect();
                let is_unique: i64 = row.try_get("IS_UNIQUE").unwrap_or(0);
                let is_primary = name == "PRIMARY";

                IndexInfo::new(name, columns)
                    .with_unique(is_unique != 0)
                    .with_primary(is_primary)
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};

    /// Tables of the main database. Attached databases are not listed.
    pub async fn list_tables(pool: &SqlitePool, schema: &str) -> DbResult<Vec<TableKey>> {
        let rows = sqlx::query(queries::sqlite::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        let keys = rows
            .iter()
            .map(|row| TableKey::new(schema, row.get::<String, _>("name")))
            .collect::<Vec<_>>();
        debug!(count = keys.len(), "Listed SQLite tables");
        Ok(keys)
    }

    pub async fn describe_table(
        pool: &SqlitePool,
        table_name: &str,
        schema: &str,
    ) -> DbResult<TableMetadata> {
        let columns = fetch_columns(pool, table_name, schema).await?;
        if columns.is_empty() {
            return Err(not_found(table_name, schema));
        }

        // PRAGMA results echo the name as stored, not as typed.
        let mut meta = columns
            .into_iter()
            .fold(TableMetadata::new(schema, stored_name(pool, table_name).await), |t, c| {
                t.with_column(c)
            });
        meta.foreign_keys = fetch_foreign_keys(pool, table_name, schema).await;
        meta.indexes = fetch_indexes(pool, table_name, schema).await;
        Ok(meta)
    }

    async fn stored_name(pool: &SqlitePool, table_name: &str) -> String {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        )
        .bind(table_name)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| table_name.to_string())
    }

    async fn fetch_columns(
        pool: &SqlitePool,
        table_name: &str,
        schema: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::sqlite::TABLE_INFO)
            .bind(table_name)
            .bind(schema)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let data_type: String = row.try_get("type").unwrap_or_default();
                let notnull: i32 = row.get("notnull");
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                let pk: i32 = row.get("pk");

                let mut col =
                    ColumnDefinition::new(&name, &data_type, notnull == 0).with_primary_key(pk > 0);
                if let Some(ref def) = default_value {
                    col = col.with_default_str(def);
                }
                col
            })
            .collect())
    }

    async fn fetch_foreign_keys(pool: &SqlitePool, table_name: &str, schema: &str) -> Vec<ForeignKey> {
        let rows = sqlx::query(queries::sqlite::FOREIGN_KEY_LIST)
            .bind(table_name)
            .bind(schema)
            .fetch_all(pool)
            .await
            .unwrap_or_default();

        rows.iter()
            .map(|row| {
                let column: String = row.get("from");
                let ref_table: String = row.get("table");
                // `to` is NULL when the reference targets the primary key implicitly.
                let ref_column: String = row
                    .try_get::<Option<String>, _>("to")
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                let on_delete: String = row.try_get("on_delete").unwrap_or_default();
                let on_update: String = row.try_get("on_update").unwrap_or_default();

                ForeignKey::new(column, ref_table, ref_column)
                    .with_on_delete(ForeignKeyAction::parse(&on_delete))
                    .with_on_update(ForeignKeyAction::parse(&on_update))
            })
            .collect()
    }

    async fn fetch_indexes(pool: &SqlitePool, table_name: &str, schema: &str) -> Vec<IndexInfo> {
        let idx_list = sqlx::query(queries::sqlite::INDEX_LIST)
            .bind(table_name)
            .bind(schema)
            .fetch_all(pool)
            .await
            .unwrap_or_default();

        let mut indexes = Vec::new();
        for idx_row in &idx_list {
            let name: String = idx_row.get("name");
            let is_unique: i32 = idx_row.get("unique");
            let origin: String = idx_row.try_get("origin").unwrap_or_default();

            let columns = fetch_index_columns(pool, &name, schema).await;
            if !columns.is_empty() {
                indexes.push(
                    IndexInfo::new(name, columns)
                        .with_unique(is_unique != 0)
                        .with_primary(origin == "pk"),
                );
            }
        }
        indexes
    }

    async fn fetch_index_columns(pool: &SqlitePool, index_name: &str, schema: &str) -> Vec<String> {
        sqlx::query(queries::sqlite::INDEX_INFO)
            .bind(index_name)
            .bind(schema)
            .fetch_all(pool)
            .await
            .unwrap_or_default()
            .iter()
            // Expression columns have no name.
            .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
            .collect()
    }
}
