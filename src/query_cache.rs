//! Query Table Cache (QTC)
//!
//! An in-memory cache of SQL templates keyed by `query_ref`, loaded once at
//! bootstrap from the database's own query-definition rows and read-mostly
//! afterwards. A reader-writer lock covers the entry list: many concurrent
//! request-path lookups, rare writer inserts during bootstrap and migration
//! loads.
//!
//! Usage statistics (`last_used`, `usage_count`) are relaxed atomics updated
//! outside any lock ordering concern. They exist for observability only and
//! are allowed to be approximate under contention.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CacheError;
use crate::queue::QueueKind;

/// Query classification stored with each cache entry.
///
/// The numeric values come from the query-definition schema this cache is
/// bootstrapped from, where migration definitions and applied-migration
/// markers share the `query_ref` number space with regular queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// A regular request-servable query (schema value 999)
    Query,
    /// A migration definition loaded but not yet applied (schema value 1000)
    MigrationLoaded,
    /// A marker recording an applied migration (schema value 1003)
    MigrationApplied,
}

impl QueryType {
    pub fn from_schema_value(value: i64) -> Option<Self> {
        match value {
            999 => Some(Self::Query),
            1000 => Some(Self::MigrationLoaded),
            1003 => Some(Self::MigrationApplied),
            _ => None,
        }
    }

    pub fn schema_value(self) -> i64 {
        match self {
            Self::Query => 999,
            Self::MigrationLoaded => 1000,
            Self::MigrationApplied => 1003,
        }
    }
}

/// One cached SQL template
#[derive(Debug)]
pub struct QueryCacheEntry {
    /// Integer identity, unique per (cache, query_type)
    pub query_ref: i64,
    pub query_type: QueryType,
    /// Named-parameter SQL text (`:param` style)
    pub sql_template: String,
    pub description: String,
    /// Which worker queue kind should run this query
    pub queue_type_hint: QueueKind,
    pub timeout_seconds: u64,
    /// Unix timestamp of last lookup; approximate under contention
    last_used: AtomicI64,
    /// Lookup count; approximate under contention
    usage_count: AtomicU64,
}

impl QueryCacheEntry {
    pub fn new(
        query_ref: i64,
        query_type: QueryType,
        sql_template: impl Into<String>,
        description: impl Into<String>,
        queue_type_hint: QueueKind,
        timeout_seconds: u64,
    ) -> Self {
        QueryCacheEntry {
            query_ref,
            query_type,
            sql_template: sql_template.into(),
            description: description.into(),
            queue_type_hint,
            timeout_seconds,
            last_used: AtomicI64::new(0),
            usage_count: AtomicU64::new(0),
        }
    }

    fn mark_used(&self) {
        self.last_used
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        self.usage_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub fn last_used(&self) -> i64 {
        self.last_used.load(Ordering::Relaxed)
    }
}

/// Thread-safe cache of query templates for one database
#[derive(Debug, Default)]
pub struct QueryTableCache {
    entries: RwLock<Vec<Arc<QueryCacheEntry>>>,
}

impl QueryTableCache {
    pub fn new() -> Self {
        QueryTableCache {
            entries: RwLock::new(Vec::with_capacity(64)),
        }
    }

    /// Insert an entry. A `query_ref` already present with the same
    /// `query_type` is rejected; the same ref with a different type is
    /// allowed (a migration definition and its applied marker share refs).
    pub fn add_entry(&self, entry: QueryCacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        if entries
            .iter()
            .any(|e| e.query_ref == entry.query_ref && e.query_type == entry.query_type)
        {
            return Err(CacheError::DuplicateQueryRef {
                query_ref: entry.query_ref,
                query_type: entry.query_type.schema_value() as i32,
            });
        }
        entries.push(Arc::new(entry));
        Ok(())
    }

    /// Look up a request-servable query by ref. Linear scan under the read
    /// lock: n is bounded by the bootstrap-loaded definition count, not
    /// request volume.
    pub fn lookup(&self, query_ref: i64) -> Option<Arc<QueryCacheEntry>> {
        let found = self
            .entries
            .read()
            .iter()
            .find(|e| e.query_ref == query_ref && e.query_type == QueryType::Query)
            .cloned();
        if let Some(entry) = &found {
            entry.mark_used();
        }
        found
    }

    /// Look up by ref and explicit type, used to distinguish migration
    /// definitions from applied-migration markers sharing a ref
    pub fn lookup_by_ref_and_type(
        &self,
        query_ref: i64,
        query_type: QueryType,
    ) -> Option<Arc<QueryCacheEntry>> {
        let found = self
            .entries
            .read()
            .iter()
            .find(|e| e.query_ref == query_ref && e.query_type == query_type)
            .cloned();
        if let Some(entry) = &found {
            entry.mark_used();
        }
        found
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Highest `query_ref` among entries of the given type, if any.
    /// Drives the migration watermark computation on Lead queues.
    pub fn max_ref_of_type(&self, query_type: QueryType) -> Option<i64> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.query_type == query_type)
            .map(|e| e.query_ref)
            .max()
    }

    /// Sorted refs of the given type (migration planning)
    pub fn refs_of_type(&self, query_type: QueryType) -> Vec<i64> {
        let mut refs: Vec<i64> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.query_type == query_type)
            .map(|e| e.query_ref)
            .collect();
        refs.sort_unstable();
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query_ref: i64) -> QueryCacheEntry {
        QueryCacheEntry::new(
            query_ref,
            QueryType::Query,
            format!("SELECT {query_ref}"),
            format!("query {query_ref}"),
            QueueKind::Fast,
            30,
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let cache = QueryTableCache::new();
        cache.add_entry(entry(42)).unwrap();

        let found = cache.lookup(42).unwrap();
        assert_eq!(found.query_ref, 42);
        assert_eq!(found.sql_template, "SELECT 42");
        assert!(cache.lookup(43).is_none());
    }

    #[test]
    fn test_unique_refs_all_resolve() {
        let cache = QueryTableCache::new();
        for i in 0..10 {
            cache.add_entry(entry(i)).unwrap();
        }
        assert_eq!(cache.entry_count(), 10);
        for i in 0..10 {
            assert_eq!(cache.lookup(i).unwrap().query_ref, i);
        }
    }

    #[test]
    fn test_growth_past_initial_capacity() {
        let cache = QueryTableCache::new();
        for i in 0..100 {
            cache.add_entry(entry(i)).unwrap();
        }
        assert_eq!(cache.entry_count(), 100);
        for i in 0..100 {
            assert_eq!(cache.lookup(i).unwrap().query_ref, i);
        }
    }

    #[test]
    fn test_duplicate_ref_rejected() {
        let cache = QueryTableCache::new();
        cache.add_entry(entry(7)).unwrap();
        let err = cache.add_entry(entry(7)).unwrap_err();
        assert_eq!(
            err,
            CacheError::DuplicateQueryRef {
                query_ref: 7,
                query_type: 999
            }
        );
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_same_ref_different_type_allowed() {
        let cache = QueryTableCache::new();
        cache
            .add_entry(QueryCacheEntry::new(
                5,
                QueryType::MigrationLoaded,
                "CREATE TABLE t (id INT)",
                "migration 5",
                QueueKind::Slow,
                300,
            ))
            .unwrap();
        cache
            .add_entry(QueryCacheEntry::new(
                5,
                QueryType::MigrationApplied,
                "",
                "migration 5 applied",
                QueueKind::Slow,
                300,
            ))
            .unwrap();

        assert!(cache
            .lookup_by_ref_and_type(5, QueryType::MigrationLoaded)
            .is_some());
        assert!(cache
            .lookup_by_ref_and_type(5, QueryType::MigrationApplied)
            .is_some());
        // Not servable as a regular query
        assert!(cache.lookup(5).is_none());
    }

    #[test]
    fn test_usage_stats_increment() {
        let cache = QueryTableCache::new();
        cache.add_entry(entry(1)).unwrap();

        let e = cache.lookup(1).unwrap();
        assert_eq!(e.usage_count(), 1);
        cache.lookup(1);
        cache.lookup(1);
        assert_eq!(e.usage_count(), 3);
        assert!(e.last_used() > 0);
    }

    #[test]
    fn test_migration_watermarks() {
        let cache = QueryTableCache::new();
        for r in [3, 1, 2] {
            cache
                .add_entry(QueryCacheEntry::new(
                    r,
                    QueryType::MigrationLoaded,
                    "ALTER ...",
                    "",
                    QueueKind::Slow,
                    300,
                ))
                .unwrap();
        }
        cache
            .add_entry(QueryCacheEntry::new(
                1,
                QueryType::MigrationApplied,
                "",
                "",
                QueueKind::Slow,
                300,
            ))
            .unwrap();

        assert_eq!(cache.max_ref_of_type(QueryType::MigrationLoaded), Some(3));
        assert_eq!(cache.max_ref_of_type(QueryType::MigrationApplied), Some(1));
        assert_eq!(cache.refs_of_type(QueryType::MigrationLoaded), vec![1, 2, 3]);
        assert_eq!(cache.max_ref_of_type(QueryType::Query), None);
    }
}
