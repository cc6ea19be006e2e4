//! In-memory schema snapshot for one workspace.
//!
//! Tables are stored once, under their schema-qualified [`TableKey`]. Bare or
//! qualified names given by callers go through [`SchemaCache::resolve_key`], so
//! there is no second index that could drift out of sync.

use crate::models::{Relationship, SchemaSummary, TableKey, TableMetadata};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaCache {
    default_schema: String,
    tables: BTreeMap<TableKey, TableMetadata>,
    relationships: Vec<Relationship>,
    summary: SchemaSummary,
}

impl SchemaCache {
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            ..Default::default()
        }
    }

    /// Build a cache from a full analysis. `failed_analyses` counts tables that
    /// could not be described.
    pub fn from_tables(
        default_schema: impl Into<String>,
        tables: impl IntoIterator<Item = TableMetadata>,
        failed_analyses: usize,
    ) -> Self {
        let mut cache = Self::new(default_schema);
        for table in tables {
            cache.insert(table);
        }
        cache.summary.failed_analyses = failed_analyses;
        cache.refresh_summary();
        cache
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// Canonical key for `table` in `schema`, or in the default schema.
    pub fn key_for(&self, table: &str, schema: Option<&str>) -> TableKey {
        TableKey::new(schema.unwrap_or(&self.default_schema), table)
    }

    /// Resolve `schema.table` or a bare `table` name to a cached key.
    ///
    /// A bare name is looked up in the default schema first, then in any schema
    /// if exactly one table carries that name. Falls back to a case-insensitive
    /// match when there is no exact one.
    pub fn resolve_key(&self, name: &str) -> Option<TableKey> {
        match name.split_once('.') {
            Some((schema, table)) => self.lookup(TableKey::new(schema, table)),
            None => self
                .lookup(self.key_for(name, None))
                .or_else(|| self.unique_bare_match(name)),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&TableMetadata> {
        self.resolve_key(name).and_then(|key| self.tables.get(&key))
    }

    fn lookup(&self, key: TableKey) -> Option<TableKey> {
        if self.tables.contains_key(&key) {
            return Some(key);
        }
        self.tables
            .keys()
            .find(|k| {
                k.schema.eq_ignore_ascii_case(&key.schema) && k.table.eq_ignore_ascii_case(&key.table)
            })
            .cloned()
    }

    fn unique_bare_match(&self, table: &str) -> Option<TableKey> {
        let mut matches = self
            .tables
            .keys()
            .filter(|k| k.table.eq_ignore_ascii_case(table));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }

    pub fn get(&self, key: &TableKey) -> Option<&TableMetadata> {
        self.tables.get(key)
    }

    pub fn get_mut(&mut self, key: &TableKey) -> Option<&mut TableMetadata> {
        self.tables.get_mut(key)
    }

    pub fn contains(&self, key: &TableKey) -> bool {
        self.tables.contains_key(key)
    }

    /// Add or replace a table. Relationships it declares replace the ones it
    /// declared before; relationships other tables declare towards it are kept.
    pub fn insert(&mut self, table: TableMetadata) -> Option<TableMetadata> {
        let key = table.key();
        self.relationships.retain(|r| r.source != key);
        self.relationships.extend(table.relationships());
        let previous = self.tables.insert(key, table);
        self.refresh_summary();
        previous
    }

    /// Remove a table and every relationship touching it.
    pub fn remove(&mut self, key: &TableKey) -> Option<TableMetadata> {
        let removed = self.tables.remove(key)?;
        self.relationships.retain(|r| !r.references(key));
        self.refresh_summary();
        Some(removed)
    }

    /// Table whose index list names `index`, restricted to `schema` if given.
    pub fn index_owner(&self, index: &str, schema: Option<&str>) -> Option<TableKey> {
        self.tables
            .values()
            .filter(|t| schema.is_none_or(|s| t.schema.eq_ignore_ascii_case(s)))
            .find(|t| t.indexes.iter().any(|i| i.name.eq_ignore_ascii_case(index)))
            .map(TableMetadata::key)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableMetadata> {
        self.tables.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TableKey> {
        self.tables.keys()
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn summary(&self) -> &SchemaSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Recompute the summary counters. `failed_analyses` is carried over.
    pub fn refresh_summary(&mut self) {
        let schemas: BTreeSet<&str> = self.tables.keys().map(|k| k.schema.as_str()).collect();
        self.summary = SchemaSummary {
            total_schemas: schemas.len(),
            total_tables: self.tables.len(),
            successful_analyses: self.tables.len(),
            failed_analyses: self.summary.failed_analyses,
            total_rows: self.tables.values().filter_map(|t| t.row_count).sum(),
            total_relationships: self.relationships.len(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDefinition, ForeignKey, IndexInfo};

    fn users() -> TableMetadata {
        TableMetadata::new("main", "users")
            .with_column(ColumnDefinition::new("id", "INTEGER", false).with_primary_key(true))
            .with_row_count(3)
    }

    fn orders() -> TableMetadata {
        let mut t = TableMetadata::new("main", "orders")
            .with_column(ColumnDefinition::new("id", "INTEGER", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("user_id", "INTEGER", true))
            .with_foreign_key(ForeignKey::new("user_id", "users", "id"))
            .with_row_count(5);
        t.indexes.push(IndexInfo::new("idx_orders_user", vec!["user_id".to_string()]));
        t
    }

    #[test]
    fn test_resolve_bare_and_qualified() {
        let cache = SchemaCache::from_tables("main", [users()], 0);
        let key = TableKey::new("main", "users");
        assert_eq!(cache.resolve_key("users"), Some(key.clone()));
        assert_eq!(cache.resolve_key("main.users"), Some(key.clone()));
        assert_eq!(cache.resolve_key("MAIN.Users"), Some(key));
        assert!(cache.resolve("other.users").is_none());
    }

    #[test]
    fn test_bare_name_in_non_default_schema() {
        let cache = SchemaCache::from_tables("public", [TableMetadata::new("sales", "leads")], 0);
        assert_eq!(
            cache.resolve_key("leads"),
            Some(TableKey::new("sales", "leads"))
        );

        let ambiguous = SchemaCache::from_tables(
            "public",
            [
                TableMetadata::new("a", "leads"),
                TableMetadata::new("b", "leads"),
            ],
            0,
        );
        assert!(ambiguous.resolve_key("leads").is_none());
    }

    #[test]
    fn test_summary_counters() {
        let cache = SchemaCache::from_tables("main", [users(), orders()], 1);
        let summary = cache.summary();
        assert_eq!(summary.total_tables, 2);
        assert_eq!(summary.total_schemas, 1);
        assert_eq!(summary.successful_analyses, 2);
        assert_eq!(summary.failed_analyses, 1);
        assert_eq!(summary.total_rows, 8);
        assert_eq!(summary.total_relationships, 1);
    }

    #[test]
    fn test_remove_strips_relationships_both_directions() {
        let mut cache = SchemaCache::from_tables("main", [users(), orders()], 0);
        assert_eq!(cache.relationships().len(), 1);

        cache.remove(&TableKey::new("main", "users"));
        assert!(cache.relationships().is_empty());
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(&TableKey::new("main", "users")).is_none());
    }

    #[test]
    fn test_insert_replaces_own_relationships_only() {
        let mut cache = SchemaCache::from_tables("main", [users(), orders()], 0);

        // Re-describing the target keeps the edge declared by orders.
        cache.insert(users());
        assert_eq!(cache.relationships().len(), 1);

        // Re-describing orders without its FK drops the edge.
        let mut bare_orders = orders();
        bare_orders.foreign_keys.clear();
        cache.insert(bare_orders);
        assert!(cache.relationships().is_empty());
    }

    #[test]
    fn test_index_owner() {
        let cache = SchemaCache::from_tables("main", [users(), orders()], 0);
        assert_eq!(
            cache.index_owner("idx_orders_user", None),
            Some(TableKey::new("main", "orders"))
        );
        assert!(cache.index_owner("idx_orders_user", Some("other")).is_none());
        assert!(cache.index_owner("missing", None).is_none());
    }
}
