//! Data models for the workspace database layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConnectionConfigError, DatabaseConfig, DatabaseType, RedactedConfig, SslMode,
};
pub use query::{
    ExecutionOutcome, Row, StatementKind, StatementRecord, StatementResult, TransactionResult,
    WRITE_KEYWORDS, statement_body,
};
pub use schema::{
    ColumnDefinition, ForeignKey, ForeignKeyAction, IndexInfo, Relationship, SchemaSummary,
    TableKey, TableMetadata,
};
