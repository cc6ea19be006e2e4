//! Workspace DB Library
//!
//! Multi-tenant database access for SQLite, PostgreSQL and MySQL. Each
//! workspace owns a connection pool and a cached view of its schema; statements
//! run singly, atomically, or in savepoint-isolated batches.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use service::WorkspaceService;
