//! Query-related data models.
//!
//! Single statements, atomic transactions and savepoint batches all report
//! through the same [`StatementResult`] shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

/// Leading keywords that make a statement a write.
pub const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "ALTER", "DROP", "CREATE", "TRUNCATE", "MERGE", "RENAME",
];

/// Read/write classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    /// Classify by leading keyword. Anything not in [`WRITE_KEYWORDS`] is a read.
    pub fn classify(sql: &str) -> Self {
        let leading = statement_body(sql)
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        if WRITE_KEYWORDS.contains(&leading.as_str()) {
            Self::Write
        } else {
            Self::Read
        }
    }
}

/// The statement with leading comments, whitespace and opening parentheses
/// removed, so it starts at its first keyword.
///
/// Handles `--` and `#` line comments and `/* */` block comments. An
/// unterminated comment leaves nothing.
pub fn statement_body(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--").or_else(|| rest.strip_prefix('#')) {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix('(') {
            rest = after;
        } else {
            return rest;
        }
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementResult {
    /// Rows returned by a read, in order.
    Rows { rows: Vec<Row> },
    /// Affected-row count of a write.
    Affected { affected_rows: u64 },
}

impl StatementResult {
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Rows { .. } => StatementKind::Read,
            Self::Affected { .. } => StatementKind::Write,
        }
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows { rows } => Some(rows),
            Self::Affected { .. } => None,
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            Self::Affected { affected_rows } => Some(*affected_rows),
            Self::Rows { .. } => None,
        }
    }

    /// Uniform record view: read rows as-is, a write as one
    /// `{"affected_rows": n}` record.
    pub fn records(&self) -> Vec<Row> {
        match self {
            Self::Rows { rows } => rows.clone(),
            Self::Affected { affected_rows } => {
                let mut record = Row::new();
                record.insert("affected_rows".to_string(), Value::from(*affected_rows));
                vec![record]
            }
        }
    }
}

/// Result of a single-statement execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StatementResult>,
    /// Sanitized error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(result: StatementResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Per-statement record inside a transaction or batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRecord {
    /// 1-based position in the submitted list.
    pub statement_number: usize,
    pub sql: String,
    pub result: StatementResult,
}

/// Result of an atomic transaction or of one savepoint batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub success: bool,
    /// Results of the statements that ran, in order.
    pub results: Vec<StatementRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionResult {
    pub fn committed(results: Vec<StatementRecord>) -> Self {
        Self {
            success: true,
            results,
            error: None,
        }
    }

    pub fn failed(results: Vec<StatementRecord>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            results,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_writes() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "  update t set a = 1",
            "delete from t",
            "CREATE TABLE t (id int)",
            "drop table t",
            "ALTER TABLE t ADD COLUMN b int",
            "truncate table t",
            "MERGE INTO t USING s ON (t.id = s.id)",
            "RENAME TABLE a TO b",
        ] {
            assert_eq!(StatementKind::classify(sql), StatementKind::Write, "{sql}");
        }
    }

    #[test]
    fn test_classify_reads() {
        for sql in [
            "SELECT 1",
            "select count(*) from t",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "SHOW TABLES",
            "EXPLAIN SELECT 1",
            "PRAGMA table_info('t')",
            "",
            "INSERTED",
        ] {
            assert_eq!(StatementKind::classify(sql), StatementKind::Read, "{sql}");
        }
    }

    #[test]
    fn test_classify_skips_leading_comments() {
        assert_eq!(
            StatementKind::classify("/* cleanup */ DROP TABLE t"),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::classify("-- note\nALTER TABLE t ADD COLUMN b int"),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::classify("# mysql note\n/* a */ /* b */ delete from t"),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::classify("(SELECT 1) UNION (SELECT 2)"),
            StatementKind::Read
        );
        assert_eq!(StatementKind::classify("-- only a comment"), StatementKind::Read);
    }

    #[test]
    fn test_statement_body() {
        assert_eq!(statement_body("  /* x */\n-- y\n  CREATE TABLE t"), "CREATE TABLE t");
        assert_eq!(statement_body("/* unterminated DROP TABLE t"), "");
        assert_eq!(statement_body("SELECT 1 -- trailing"), "SELECT 1 -- trailing");
    }

    #[test]
    fn test_records_for_write() {
        let result = StatementResult::Affected { affected_rows: 3 };
        let records = result.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["affected_rows"], 3);
        assert_eq!(result.kind(), StatementKind::Write);
    }

    #[test]
    fn test_statement_result_serialization() {
        let json = serde_json::to_value(StatementResult::Affected { affected_rows: 2 }).unwrap();
        assert_eq!(json["kind"], "affected");
        assert_eq!(json["affected_rows"], 2);
    }
}
