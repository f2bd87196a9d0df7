#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rusqlite::{Connection, OpenFlags};
use revstore::{
    AttributeType, Keyspace, Migration, MigrationPlanner, MigrationRequest, Relation,
    RetentionPolicy, SortOrder, SqliteMigrator, StoreConfig, TableSchema, TableStore,
};

pub const DOMAIN: &str = "en.wikipedia.org";

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

pub fn open_store(path: &Path) -> TableStore {
    TableStore::open(&StoreConfig::at(path)).expect("open store")
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

/// Physical name of one of a table's relations.
pub fn relation(table: &str, relation: Relation) -> String {
    Keyspace::new(DOMAIN, table).relation(relation)
}

/// `(tid, _exist_until)` of every stored revision, oldest first.
pub fn expiry_markers(conn: &Connection, table: &str) -> Vec<(String, Option<i64>)> {
    let sql = format!(
        "SELECT \"_tid\", \"_exist_until\" FROM \"{}\" ORDER BY \"_tid\" ASC",
        relation(table, Relation::Data)
    );
    let mut stmt = conn.prepare(&sql).expect("prepare marker query");
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query markers");
    rows.collect::<rusqlite::Result<_>>().expect("read markers")
}

pub fn relation_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .expect("query sqlite_master")
        > 0
}

/// pages: one item per (title, rev), revisions under a synthetic tid.
pub fn pages_schema() -> TableSchema {
    TableSchema::new("pages")
        .attribute("title", AttributeType::String)
        .attribute("rev", AttributeType::Int)
        .attribute("body", AttributeType::String)
        .attribute("tags", "set<string>".parse().expect("set type"))
        .attribute("owner", AttributeType::String)
        .hash("title")
        .range("rev", SortOrder::Desc)
        .static_column("owner")
}

pub fn retained_schema(count: u32, grace_ttl_secs: u64) -> TableSchema {
    TableSchema::new("retained")
        .attribute("title", AttributeType::String)
        .attribute("body", AttributeType::String)
        .hash("title")
        .retention(RetentionPolicy::latest(count, grace_ttl_secs))
}

/// Delegates to [`SqliteMigrator`] and counts how often it was asked.
#[derive(Debug, Default)]
pub struct CountingPlanner {
    pub plans: AtomicUsize,
}

impl CountingPlanner {
    pub fn count(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }
}

impl MigrationPlanner for CountingPlanner {
    fn plan(&self, request: &MigrationRequest<'_>) -> revstore::Result<Box<dyn Migration>> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        SqliteMigrator.plan(request)
    }
}

pub fn counting_store() -> (TableStore, Arc<CountingPlanner>) {
    let planner = Arc::new(CountingPlanner::default());
    let store = TableStore::open_in_memory()
        .expect("open store")
        .with_migrator(planner.clone());
    (store, planner)
}
