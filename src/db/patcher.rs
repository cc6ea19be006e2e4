//! Incremental schema cache maintenance after DDL.
//!
//! Executed statements are scanned for DDL markers; each DDL statement is then
//! parsed into a [`SchemaChange`] naming the affected table and applied as the
//! smallest patch that keeps the cache consistent. Only the single-table side of
//! the [`SchemaAnalyzer`] is ever called here.
//!
//! Parsing is pattern based and deliberately narrow. A statement that carries a
//! DDL verb but matches no known shape invalidates the whole cache instead of
//! leaving it silently stale.

use crate::db::analyzer::SchemaAnalyzer;
use crate::db::schema_cache::SchemaCache;
use crate::error::DbError;
use crate::models::{TableKey, statement_body};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Substrings that mark a statement as schema changing.
pub const DDL_MARKERS: &[&str] = &[
    "CREATE TABLE",
    "DROP TABLE",
    "ALTER TABLE",
    "CREATE INDEX",
    "DROP INDEX",
    "CREATE UNIQUE INDEX",
    "TRUNCATE TABLE",
    "RENAME TABLE",
    "ADD COLUMN",
    "DROP COLUMN",
    "ALTER COLUMN",
    "ADD CONSTRAINT",
    "DROP CONSTRAINT",
    "CREATE SCHEMA",
    "DROP SCHEMA",
];

/// Leading verbs a DDL statement can start with.
const DDL_VERBS: &[&str] = &["CREATE", "DROP", "ALTER", "TRUNCATE", "RENAME"];

/// Leading verbs of statements that never change the schema.
const DML_VERBS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "WITH", "MERGE", "REPLACE", "VALUES", "EXPLAIN",
    "SHOW",
];

// Quoted ("t", `t`, [t]) or bare identifier.
const IDENT: &str = r#"(?:"(?:[^"]|"")+"|`(?:[^`]|``)+`|\[[^\]]+\]|[\w$]+)"#;

fn qualified(prefix: &str) -> String {
    format!(r"(?:(?P<{p}_schema>{i})\s*\.\s*)?(?P<{p}_name>{i})", p = prefix, i = IDENT)
}

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^CREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:GLOBAL|LOCAL)\s+)?(?:TEMP\s+|TEMPORARY\s+|UNLOGGED\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?{}",
        qualified("t")
    ))
    .expect("valid CREATE TABLE regex")
});

static DROP_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^DROP\s+(?:TEMPORARY\s+)?TABLE\s+(?:IF\s+EXISTS\s+)?(?P<list>.+)$")
        .expect("valid DROP TABLE regex")
});

static ALTER_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?{}",
        qualified("t")
    ))
    .expect("valid ALTER TABLE regex")
});

static RENAME_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?is)\bRENAME\s+(?:TO|AS)\s+{}", qualified("n")))
        .expect("valid RENAME TO regex")
});

static RENAME_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^RENAME\s+TABLE\s+{}\s+TO\s+{}",
        qualified("t"),
        qualified("n")
    ))
    .expect("valid RENAME TABLE regex")
});

static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?(?:{}\s+)?ON\s+(?:ONLY\s+)?{}",
        qualified("i"),
        qualified("t")
    ))
    .expect("valid CREATE INDEX regex")
});

static DROP_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)^DROP\s+INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+EXISTS\s+)?{}(?:\s+ON\s+{})?",
        qualified("i"),
        qualified("t")
    ))
    .expect("valid DROP INDEX regex")
});

static TRUNCATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^TRUNCATE\s+(?:TABLE\s+)?(?:ONLY\s+)?(?P<list>.+)$")
        .expect("valid TRUNCATE regex")
});

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)^\s*{}", qualified("t"))).expect("valid table list regex")
});

/// A table named in a DDL statement, as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<Ident>,
    pub name: Ident,
}

/// An identifier with its quoting stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub value: String,
    pub quoted: bool,
}

impl Ident {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let unquote = |inner: &str, doubled: &str, single: &str| Self {
            value: inner.replace(doubled, single),
            quoted: true,
        };
        if raw.len() >= 2 {
            if raw.starts_with('"') && raw.ends_with('"') {
                return unquote(&raw[1..raw.len() - 1], "\"\"", "\"");
            }
            if raw.starts_with('`') && raw.ends_with('`') {
                return unquote(&raw[1..raw.len() - 1], "``", "`");
            }
            if raw.starts_with('[') && raw.ends_with(']') {
                return unquote(&raw[1..raw.len() - 1], "]]", "]");
            }
        }
        Self {
            value: raw.to_string(),
            quoted: false,
        }
    }

    fn resolved(&self, analyzer: &dyn SchemaAnalyzer) -> String {
        if self.quoted {
            self.value.clone()
        } else {
            analyzer.normalize_identifier(&self.value)
        }
    }
}

impl TableRef {
    fn from_captures(caps: &regex::Captures<'_>, prefix: &str) -> Option<Self> {
        let name = caps.name(&format!("{}_name", prefix))?;
        Some(Self {
            schema: caps
                .name(&format!("{}_schema", prefix))
                .map(|m| Ident::parse(m.as_str())),
            name: Ident::parse(name.as_str()),
        })
    }

    /// Display form, `schema.table` or `table`.
    pub fn display(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema.value, self.name.value),
            None => self.name.value.clone(),
        }
    }

    fn key(&self, cache: &SchemaCache, analyzer: &dyn SchemaAnalyzer) -> TableKey {
        let table = self.name.resolved(analyzer);
        match &self.schema {
            Some(schema) => TableKey::new(schema.resolved(analyzer), table),
            None => cache.key_for(&table, None),
        }
    }

    /// Cached key this reference points at, if the table is cached.
    fn cached_key(&self, cache: &SchemaCache, analyzer: &dyn SchemaAnalyzer) -> Option<TableKey> {
        let key = self.key(cache, analyzer);
        if cache.contains(&key) {
            return Some(key);
        }
        match &self.schema {
            Some(_) => cache.resolve_key(&key.to_string()),
            None => cache.resolve_key(&key.table),
        }
    }
}

/// What one DDL statement did to the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    CreateTable(TableRef),
    DropTable(Vec<TableRef>),
    AlterTable(TableRef),
    RenameTable { from: TableRef, to: TableRef },
    CreateIndex { index: Option<String>, table: TableRef },
    DropIndex {
        index: String,
        schema: Option<Ident>,
        table: Option<TableRef>,
    },
    TruncateTable(Vec<TableRef>),
    /// Starts with a DDL verb but matches no known shape.
    Unrecognized,
}

/// Outcome of patching a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// Patches applied to the cache.
    pub applied: usize,
    /// Reasons for statements left unpatched.
    pub skipped: Vec<String>,
    /// The cache could not be kept consistent and must be dropped.
    pub invalidated: bool,
}

/// Tables and indexes a batch of statements would change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaChangeSummary {
    pub tables_created: Vec<String>,
    pub tables_dropped: Vec<String>,
    pub tables_altered: Vec<String>,
    pub indexes_created: Vec<String>,
    pub indexes_dropped: Vec<String>,
    pub tables_truncated: Vec<String>,
    pub total_changes: usize,
}

/// Detects DDL and patches a [`SchemaCache`] accordingly.
pub struct SchemaCachePatcher;

impl SchemaCachePatcher {
    /// True if any statement contains a DDL marker.
    pub fn detect_ddl<S: AsRef<str>>(statements: &[S]) -> bool {
        statements.iter().any(|s| {
            let normalized = normalize(statement_body(s.as_ref()));
            let found = DDL_MARKERS.iter().any(|m| normalized.contains(m));
            if found {
                debug!(statement = %preview(s.as_ref()), "Schema change detected");
            }
            found
        })
    }

    /// Parse one statement. `None` if it is not DDL.
    ///
    /// Leading comments are skipped. A statement that carries a DDL marker but
    /// starts with neither a DDL nor a DML verb is `Unrecognized`.
    pub fn parse(sql: &str) -> Option<SchemaChange> {
        let body = statement_body(sql);
        let normalized = normalize(body);
        if !DDL_MARKERS.iter().any(|m| normalized.contains(m)) {
            return None;
        }
        let first_word = normalized
            .split(|c: char| c == ' ' || c == '(' || c == ';')
            .next()
            .unwrap_or_default();
        if DML_VERBS.contains(&first_word) {
            // Marker text inside a DML statement, e.g. in a string literal.
            return None;
        }
        if !DDL_VERBS.contains(&first_word) {
            return Some(SchemaChange::Unrecognized);
        }

        let sql = body.trim().trim_end_matches(';').trim();
        let change = if let Some(caps) = CREATE_INDEX.captures(sql) {
            TableRef::from_captures(&caps, "t").map(|table| SchemaChange::CreateIndex {
                index: caps.name("i_name").map(|m| Ident::parse(m.as_str()).value),
                table,
            })
        } else if let Some(caps) = CREATE_TABLE.captures(sql) {
            TableRef::from_captures(&caps, "t").map(SchemaChange::CreateTable)
        } else if let Some(caps) = DROP_INDEX.captures(sql) {
            caps.name("i_name").map(|index| SchemaChange::DropIndex {
                index: Ident::parse(index.as_str()).value,
                schema: caps.name("i_schema").map(|m| Ident::parse(m.as_str())),
                table: TableRef::from_captures(&caps, "t"),
            })
        } else if let Some(caps) = DROP_TABLE.captures(sql) {
            table_list(&caps["list"]).map(SchemaChange::DropTable)
        } else if let Some(caps) = ALTER_TABLE.captures(sql) {
            let table = TableRef::from_captures(&caps, "t");
            match (table, RENAME_TO.captures(sql)) {
                (Some(from), Some(rename)) => TableRef::from_captures(&rename, "n")
                    .map(|to| SchemaChange::RenameTable { from, to }),
                (Some(table), None) => Some(SchemaChange::AlterTable(table)),
                (None, _) => None,
            }
        } else if let Some(caps) = RENAME_TABLE.captures(sql) {
            match (
                TableRef::from_captures(&caps, "t"),
                TableRef::from_captures(&caps, "n"),
            ) {
                (Some(from), Some(to)) => Some(SchemaChange::RenameTable { from, to }),
                _ => None,
            }
        } else if let Some(caps) = TRUNCATE_TABLE.captures(sql) {
            table_list(&caps["list"]).map(SchemaChange::TruncateTable)
        } else {
            None
        };

        Some(change.unwrap_or(SchemaChange::Unrecognized))
    }

    /// What the statements would change, without touching any cache.
    pub fn summarize<S: AsRef<str>>(statements: &[S]) -> SchemaChangeSummary {
        let mut summary = SchemaChangeSummary::default();
        for change in statements.iter().filter_map(|s| Self::parse(s.as_ref())) {
            match change {
                SchemaChange::CreateTable(t) => summary.tables_created.push(t.display()),
                SchemaChange::DropTable(ts) => {
                    summary.tables_dropped.extend(ts.iter().map(TableRef::display))
                }
                SchemaChange::AlterTable(t) => summary.tables_altered.push(t.display()),
                SchemaChange::RenameTable { from, .. } => {
                    summary.tables_altered.push(from.display())
                }
                SchemaChange::CreateIndex { index, table } => summary
                    .indexes_created
                    .push(index.unwrap_or_else(|| format!("<unnamed> on {}", table.display()))),
                SchemaChange::DropIndex { index, .. } => summary.indexes_dropped.push(index),
                SchemaChange::TruncateTable(ts) => {
                    summary.tables_truncated.extend(ts.iter().map(TableRef::display))
                }
                SchemaChange::Unrecognized => {}
            }
        }
        summary.total_changes = summary.tables_created.len()
            + summary.tables_dropped.len()
            + summary.tables_altered.len()
            + summary.indexes_created.len()
            + summary.indexes_dropped.len()
            + summary.tables_truncated.len();
        summary
    }

    /// Patch `cache` for every DDL statement in `statements`, in order.
    ///
    /// Stops early and reports `invalidated` when a statement cannot be
    /// reflected in the cache; the caller must then drop the cache.
    pub async fn apply<S: AsRef<str>>(
        statements: &[S],
        cache: &mut SchemaCache,
        analyzer: &dyn SchemaAnalyzer,
    ) -> PatchReport {
        let mut report = PatchReport::default();

        for sql in statements.iter().map(|s| s.as_ref()) {
            let Some(change) = Self::parse(sql) else {
                continue;
            };

            if let Err(e) = apply_change(&change, cache, analyzer, &mut report).await {
                match e {
                    DbError::SchemaPatchSkipped { reason } => {
                        debug!(statement = %preview(sql), reason = %reason, "Schema patch skipped");
                        report.skipped.push(reason);
                    }
                    other => {
                        warn!(
                            statement = %preview(sql),
                            error = %other,
                            "Cannot patch schema cache, invalidating"
                        );
                        report.invalidated = true;
                        return report;
                    }
                }
            }
        }

        cache.refresh_summary();
        if report.applied > 0 {
            info!(
                applied = report.applied,
                skipped = report.skipped.len(),
                "Schema cache patched"
            );
        }
        report
    }
}

async fn apply_change(
    change: &SchemaChange,
    cache: &mut SchemaCache,
    analyzer: &dyn SchemaAnalyzer,
    report: &mut PatchReport,
) -> Result<(), DbError> {
    match change {
        SchemaChange::CreateTable(table) | SchemaChange::AlterTable(table) => {
            let key = table.key(cache, analyzer);
            refresh_table(cache, analyzer, &key).await?;
            report.applied += 1;
        }
        SchemaChange::RenameTable { from, to } => {
            if let Some(old) = from.cached_key(cache, analyzer) {
                cache.remove(&old);
            }
            let key = to.key(cache, analyzer);
            refresh_table(cache, analyzer, &key).await?;
            report.applied += 1;
        }
        SchemaChange::DropTable(tables) => {
            for table in tables {
                match table.cached_key(cache, analyzer) {
                    Some(key) => {
                        cache.remove(&key);
                        debug!(table = %key, "Removed table from schema cache");
                        report.applied += 1;
                    }
                    None => report
                        .skipped
                        .push(format!("dropped table {} was not cached", table.display())),
                }
            }
        }
        SchemaChange::CreateIndex { table, .. } => {
            let key = table
                .cached_key(cache, analyzer)
                .unwrap_or_else(|| table.key(cache, analyzer));
            refresh_table(cache, analyzer, &key).await?;
            report.applied += 1;
        }
        SchemaChange::DropIndex {
            index,
            schema,
            table,
        } => {
            let owner = match table {
                Some(table) => table.cached_key(cache, analyzer),
                None => {
                    let schema = schema.as_ref().map(|s| s.resolved(analyzer));
                    cache.index_owner(index, schema.as_deref())
                }
            };
            let Some(key) = owner else {
                return Err(DbError::patch_skipped(format!(
                    "no cached table owns index {}",
                    index
                )));
            };
            refresh_table(cache, analyzer, &key).await?;
            report.applied += 1;
        }
        SchemaChange::TruncateTable(tables) => {
            for table in tables {
                let Some(meta) = table
                    .cached_key(cache, analyzer)
                    .and_then(|key| cache.get_mut(&key))
                else {
                    report
                        .skipped
                        .push(format!("truncated table {} was not cached", table.display()));
                    continue;
                };
                meta.row_count = Some(0);
                meta.sample_data = Some(Vec::new());
                report.applied += 1;
            }
        }
        SchemaChange::Unrecognized => {
            return Err(DbError::schema(
                "DDL statement not recognized",
                "schema cache",
            ));
        }
    }
    Ok(())
}

/// Re-describe one table and store it under its canonical key.
pub async fn refresh_table(
    cache: &mut SchemaCache,
    analyzer: &dyn SchemaAnalyzer,
    key: &TableKey,
) -> Result<(), DbError> {
    let meta = analyzer.table_info(&key.table, Some(&key.schema)).await?;
    debug!(table = %meta.key(), "Refreshed table in schema cache");
    cache.insert(meta);
    Ok(())
}

fn table_list(list: &str) -> Option<Vec<TableRef>> {
    let tables: Vec<TableRef> = list
        .split(',')
        .filter_map(|item| {
            LIST_ITEM
                .captures(item)
                .and_then(|caps| TableRef::from_captures(&caps, "t"))
        })
        .collect();
    (!tables.is_empty()).then_some(tables)
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn preview(sql: &str) -> String {
    const MAX: usize = 100;
    let trimmed = sql.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
