//! Schema cache: keyspace → compiled schema.
//!
//! Entries are populated lazily by `create_table`, `get` and `put`, and are
//! removed only by `drop_table`. There is no TTL and no eviction: a cached
//! schema stays authoritative until this process drops the table. Schema
//! changes applied by another process are not observed while an entry is
//! warm.
//!
//! Lookups go through a `DashMap`, so concurrent readers and writers never
//! contend on a single lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::schema::{Keyspace, SchemaInfo};

/// Hit/miss counters, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent keyspace → [`SchemaInfo`] map.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: DashMap<Keyspace, Arc<SchemaInfo>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, keyspace: &Keyspace) -> Option<Arc<SchemaInfo>> {
        match self.entries.get(keyspace) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(keyspace = %keyspace, "schema cache hit");
                Some(Arc::clone(entry.value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(keyspace = %keyspace, "schema cache miss");
                None
            }
        }
    }

    /// Inserts or replaces the entry for `keyspace`.
    pub fn put(&self, keyspace: Keyspace, schema: Arc<SchemaInfo>) {
        self.entries.insert(keyspace, schema);
    }

    /// Removes and returns the entry for `keyspace`.
    pub fn invalidate(&self, keyspace: &Keyspace) -> Option<Arc<SchemaInfo>> {
        self.entries.remove(keyspace).map(|(_, schema)| schema)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
