//! # Async API for revstore
//!
//! [`TableStore`] is the public handle. It ties together the schema cache, the
//! migration planner and the engine thread, and exposes the table lifecycle
//! (`create_table`, `drop_table`), typed reads and writes (`get`, `put`) and
//! schema inspection (`get_table_schema`).
//!
//! ## Request Flow
//!
//! ```text
//!   get / put (domain, request)
//!        │
//!        ▼
//!   Keyspace::new(domain, table)
//!        │
//!        ▼
//!   SchemaCache ──miss──► <ks>_meta (latest "schema" row) ──► cache.put
//!        │ hit                        │ none
//!        │                            ▼
//!        │                      Error::NotFound
//!        ▼
//!   read_relation / write_relation ──► Engine (dedicated thread)
//!                                          │
//!                     put only ──► retention sweep (awaited, reported in WriteAck)
//! ```
//!
//! ## Consistency Model
//!
//! - Each physical batch (one write plus its static upsert, one migration,
//!   one drop) is atomic. Nothing spans two batches.
//! - A warm cache entry is never refreshed. A process that did not perform a
//!   schema change keeps serving the schema it first loaded until it drops
//!   the table itself: one writer process per keyspace is assumed.
//! - `put` resolves after its retention sweep was attempted. A failed sweep is
//!   reported in [`WriteAck::retention`], never as an error of the write.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use crate::cache::{CacheStats, SchemaCache};
use crate::config::StoreConfig;
use crate::engine::{Engine, RowSet};
use crate::error::{Error, Result};
use crate::migration::{MigrationPlanner, MigrationRequest, SqliteMigrator};
use crate::retention;
use crate::schema::{
    make_schema_info, meta_schema, validate_and_normalize_schema, Keyspace, Relation,
    SchemaInfo, StoredSchema, TableSchema, EXPIRY_COLUMN, SCHEMA_META_KEY,
};
use crate::sql::{build_drop_sql, build_get_query, build_keyspace_sql, build_put_query, ReadTarget};
use crate::types::{
    CreateOutcome, GetRequest, GetResult, PutRequest, RetentionSweep, Row, Tid, Value, WriteAck,
};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Resolves the keyspace of a (domain, table) pair.
fn keyspace_for(domain: &str, table: &str) -> Result<Keyspace> {
    let table = table.trim();
    if table.is_empty() {
        return Err(Error::invalid("table name is required"));
    }
    Ok(Keyspace::new(domain, table))
}

// =============================================================================
// TableStore - The Main Async Handle
// =============================================================================

/// The main async handle for revstore operations.
///
/// # Thread Safety
///
/// `TableStore` is `Clone`, `Send` and `Sync`. All clones share one engine
/// thread, one schema cache and one migration planner.
///
/// # Example
///
/// ```rust,no_run
/// use revstore::{AttributeType, GetRequest, PutRequest, SortOrder, TableSchema, TableStore};
///
/// # async fn demo() -> revstore::Result<()> {
/// let store = TableStore::open_in_memory()?;
/// let schema = TableSchema::new("pages")
///     .attribute("title", AttributeType::String)
///     .attribute("body", AttributeType::String)
///     .hash("title");
/// store.create_table("en.wikipedia.org", &schema).await?;
///
/// store
///     .put("en.wikipedia.org", &PutRequest::new("pages").with("title", "Main").with("body", "hi"))
///     .await?;
/// let result = store
///     .get("en.wikipedia.org", &GetRequest::new("pages").with("title", "Main"))
///     .await?;
/// assert_eq!(result.count, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TableStore {
    engine: Engine,
    cache: Arc<SchemaCache>,
    migrator: Arc<dyn MigrationPlanner>,
}

impl TableStore {
    /// Opens a store described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Ok(Self {
            engine: Engine::open(config)?,
            cache: Arc::new(SchemaCache::new()),
            migrator: Arc::new(SqliteMigrator),
        })
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Replaces the migration planner.
    pub fn with_migrator(mut self, migrator: Arc<dyn MigrationPlanner>) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Stops the engine thread. Every clone fails afterwards.
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }

    // =========================================================================
    // Table Lifecycle
    // =========================================================================

    /// Creates a table, or migrates it if it exists with a different schema.
    ///
    /// # Outcomes
    ///
    /// - [`CreateOutcome::Created`]: no schema was stored; all relations were
    ///   created and the schema recorded.
    /// - [`CreateOutcome::Unchanged`]: the stored schema has the same hash.
    ///   Nothing is written.
    /// - [`CreateOutcome::Migrated`]: the planner accepted the change and the
    ///   migration ran; the new schema is recorded.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for a missing table name or a schema that
    ///   fails validation
    /// - [`Error::BadRequest`] when the change is refused or the migration
    ///   fails; the stored schema stays in effect
    pub async fn create_table(&self, domain: &str, schema: &TableSchema) -> Result<CreateOutcome> {
        let keyspace = keyspace_for(domain, &schema.table)?;
        let current = self.load_schema(&keyspace).await?;
        let normalized = validate_and_normalize_schema(schema)?;
        let candidate = Arc::new(make_schema_info(&normalized)?);

        let outcome = match current {
            None => {
                self.engine
                    .run(build_keyspace_sql(&keyspace, &candidate))
                    .await?;
                info!(keyspace = %keyspace, version = candidate.version, "table created");
                CreateOutcome::Created
            }
            Some(stored) => {
                let current = Arc::new(make_schema_info(&stored.schema)?);
                if current.hash == candidate.hash {
                    debug!(keyspace = %keyspace, "schema unchanged");
                    self.cache.put(keyspace, current);
                    return Ok(CreateOutcome::Unchanged);
                }

                let request = MigrationRequest {
                    keyspace: &keyspace,
                    current: &current,
                    candidate: &candidate,
                };
                let migration = self
                    .migrator
                    .plan(&request)
                    .map_err(|err| bad_request(&keyspace, schema, err))?;
                if let Err(err) = migration.migrate(&self.engine).await {
                    error!(
                        keyspace = %keyspace,
                        from = current.version,
                        to = candidate.version,
                        error = %err,
                        "schema migration failed"
                    );
                    return Err(bad_request(&keyspace, schema, err));
                }
                info!(
                    keyspace = %keyspace,
                    from = current.version,
                    to = candidate.version,
                    "table migrated"
                );
                CreateOutcome::Migrated
            }
        };

        self.cache.put(keyspace.clone(), Arc::clone(&candidate));
        let record = PutRequest::new(candidate.table.clone())
            .with("key", SCHEMA_META_KEY)
            .with("value", serde_json::to_value(&normalized)?);
        self.write_relation(&keyspace, &record, Relation::Meta).await?;

        Ok(outcome)
    }

    /// Drops every relation of a table.
    ///
    /// Dropping a table that does not exist succeeds.
    pub async fn drop_table(&self, domain: &str, table: &str) -> Result<()> {
        let keyspace = keyspace_for(domain, table)?;
        let schema = match self.cache.invalidate(&keyspace) {
            Some(schema) => Some(schema),
            None => match self.load_schema(&keyspace).await? {
                Some(stored) => Some(Arc::new(make_schema_info(&stored.schema)?)),
                None => None,
            },
        };
        let has_static = schema.as_ref().is_some_and(|s| s.has_static());

        self.engine.run(build_drop_sql(&keyspace, has_static)).await?;
        info!(keyspace = %keyspace, known = schema.is_some(), "table dropped");
        Ok(())
    }

    /// Returns the newest stored schema of a table and the tid it was stored
    /// under.
    pub async fn get_table_schema(&self, domain: &str, table: &str) -> Result<StoredSchema> {
        let keyspace = keyspace_for(domain, table)?;
        self.load_schema(&keyspace)
            .await?
            .ok_or_else(|| Error::NotFound {
                keyspace: keyspace.to_string(),
            })
    }

    // =========================================================================
    // Reads and Writes
    // =========================================================================

    /// Reads from a table, or from its index view when `request.index` names
    /// a secondary index.
    pub async fn get(&self, domain: &str, request: &GetRequest) -> Result<GetResult> {
        let keyspace = keyspace_for(domain, &request.table)?;
        let schema = self.resolve_schema(&keyspace).await?;
        let relation = match &request.index {
            Some(index) if !schema.secondary_indexes.contains_key(index) => {
                return Err(Error::invalid(format!(
                    "table '{}' has no secondary index '{index}'",
                    schema.table
                )));
            }
            Some(_) => Relation::IndexView,
            None => Relation::Data,
        };
        self.read_relation(&keyspace, request, relation, Some(&schema))
            .await
    }

    /// Writes one revision.
    pub async fn put(&self, domain: &str, request: &PutRequest) -> Result<WriteAck> {
        let keyspace = keyspace_for(domain, &request.table)?;
        self.write_relation(&keyspace, request, Relation::Data).await
    }

    /// Reads one relation of a keyspace with an explicit schema.
    ///
    /// A missing relation reads as empty: a table dropped between schema
    /// resolution and the query yields `{ count: 0, items: [] }`.
    pub async fn read_relation(
        &self,
        keyspace: &Keyspace,
        request: &GetRequest,
        relation: Relation,
        schema: Option<&SchemaInfo>,
    ) -> Result<GetResult> {
        let schema = schema.ok_or_else(|| {
            Error::internal(format!(
                "no schema available to read {}",
                keyspace.relation(relation)
            ))
        })?;

        let relation_name = keyspace.relation(relation);
        let static_name = keyspace.relation(Relation::Static);
        let statics = (relation != Relation::Meta && schema.has_static())
            .then_some(static_name.as_str());
        let target = ReadTarget {
            relation: &relation_name,
            statics,
        };
        let statement = build_get_query(target, schema, request, now_ms())?;

        match self.engine.all(statement).await {
            Ok(rows) => Ok(GetResult::from_rows(request, materialize(schema, rows)?)),
            Err(Error::TableNotFound { relation: missing }) => {
                debug!(keyspace = %keyspace, relation = %missing, "read from missing relation");
                Ok(GetResult::empty(request))
            }
            Err(err) => Err(err),
        }
    }

    /// Writes one revision to `data` or `meta`.
    ///
    /// `meta` writes use the built-in meta schema; `data` writes use the
    /// table's schema and are followed by the retention sweep. A missing tid is
    /// minted here, and the acknowledged write time is always the one encoded
    /// in the tid that was stored.
    pub async fn write_relation(
        &self,
        keyspace: &Keyspace,
        request: &PutRequest,
        relation: Relation,
    ) -> Result<WriteAck> {
        let resolved;
        let schema: &SchemaInfo = match relation {
            Relation::Meta => meta_schema(),
            Relation::Data => {
                resolved = self.resolve_schema(keyspace).await?;
                resolved.as_ref()
            }
            Relation::Static | Relation::IndexView => {
                return Err(Error::internal(format!(
                    "{relation} is not a writable relation"
                )));
            }
        };

        let mut attributes = request.attributes.clone();
        let tid = match attributes.get(&schema.tid) {
            Some(value) if !value.is_null() => {
                let uuid = value.as_uuid().ok_or_else(|| {
                    Error::invalid(format!(
                        "attribute '{}' must be a timeuuid, got {}",
                        schema.tid,
                        value.kind()
                    ))
                })?;
                Tid::from_uuid(uuid)?
            }
            _ => {
                let tid = Tid::now();
                attributes.insert(schema.tid.clone(), Value::from(tid));
                tid
            }
        };

        let relation_name = keyspace.relation(relation);
        let static_name = keyspace.relation(Relation::Static);
        let statements = build_put_query(
            &relation_name,
            schema.has_static().then_some(static_name.as_str()),
            schema,
            &attributes,
        )?;
        self.engine.run(statements.into_batch()).await?;

        let retention = match relation {
            Relation::Data => retention::apply(self, keyspace, schema, &attributes).await,
            _ => RetentionSweep::Skipped,
        };

        Ok(WriteAck {
            tid,
            write_time_ms: tid.timestamp_ms(),
            retention,
        })
    }

    // =========================================================================
    // Schema Resolution
    // =========================================================================

    /// Cached schema, or the stored one (which is then cached).
    async fn resolve_schema(&self, keyspace: &Keyspace) -> Result<Arc<SchemaInfo>> {
        if let Some(schema) = self.cache.get(keyspace) {
            return Ok(schema);
        }
        let stored = self
            .load_schema(keyspace)
            .await?
            .ok_or_else(|| Error::NotFound {
                keyspace: keyspace.to_string(),
            })?;
        let schema = Arc::new(make_schema_info(&stored.schema)?);
        self.cache.put(keyspace.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    /// The newest `"schema"` row of the keyspace's `meta`, bypassing the cache.
    async fn load_schema(&self, keyspace: &Keyspace) -> Result<Option<StoredSchema>> {
        let meta = meta_schema();
        let request = GetRequest::new(meta.table.clone())
            .with("key", SCHEMA_META_KEY)
            .limit(1);
        let result = self
            .read_relation(keyspace, &request, Relation::Meta, Some(meta))
            .await?;
        let Some(row) = result.items.into_iter().next() else {
            return Ok(None);
        };

        let value = row
            .get("value")
            .and_then(Value::as_json)
            .ok_or_else(|| Error::internal(format!("schema row of {keyspace} has no value")))?;
        let schema: TableSchema = serde_json::from_value(value.clone())?;
        let tid = row
            .get("tid")
            .and_then(Value::as_uuid)
            .ok_or_else(|| Error::internal(format!("schema row of {keyspace} has no tid")))?;
        Ok(Some(StoredSchema {
            schema,
            tid: Tid::from_uuid(tid)?,
        }))
    }
}

fn bad_request(keyspace: &Keyspace, schema: &TableSchema, err: Error) -> Error {
    let detail = match err {
        Error::InvalidRequest(detail) | Error::Internal(detail) => detail,
        other => other.to_string(),
    };
    Error::BadRequest {
        keyspace: keyspace.to_string(),
        schema: Box::new(schema.clone()),
        detail,
    }
}

/// Decodes raw rows through each column's converter, dropping the expiry
/// marker.
fn materialize(schema: &SchemaInfo, rows: RowSet) -> Result<Vec<Row>> {
    let RowSet { columns, rows } = rows;
    rows.into_iter()
        .map(|values| {
            let mut row = Row::new();
            for (column, raw) in columns.iter().zip(values) {
                if column == EXPIRY_COLUMN {
                    continue;
                }
                let ty = schema.converter(column).ok_or_else(|| {
                    Error::internal(format!("column '{column}' is not declared"))
                })?;
                row.insert(column.clone(), ty.decode(raw)?);
            }
            Ok(row)
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
