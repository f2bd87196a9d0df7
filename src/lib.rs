//! # revstore - Schema-Versioned Table Store
//!
//! revstore is a document/wide-row table store layered on SQLite. It provides:
//!
//! - **Declarative tables**: attributes, hash/range/static keys and secondary
//!   indexes described as data ([`TableSchema`])
//! - **Schema evolution**: re-creating a table with a changed schema migrates
//!   it in place, or refuses with a structured error
//! - **Revisions**: every write is a new revision keyed by a time-ordered
//!   version identifier ([`Tid`])
//! - **Bounded history**: `latest` retention keeps the N newest revisions per
//!   item and expires the rest after a grace window
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        TableStore (api)                         │
//! │       create_table · drop_table · get · put · get_table_schema  │
//! └──────────────┬──────────────────────────────┬───────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────┐    ┌──────────────────────────────────┐
//! │ SchemaCache (cache)      │    │ Schema compiler (schema, sql)     │
//! │ keyspace → SchemaInfo    │    │ normalize · hash · DDL · DML      │
//! └──────────────────────────┘    └──────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────┐    ┌──────────────────────────────────┐
//! │ Migration planner        │    │ Retention sweep (retention)       │
//! │ (migration)              │    │ mark excess · delete expired      │
//! └──────────────┬───────────┘    └──────────────────┬───────────────┘
//!                └───────────────┬───────────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Engine (dedicated thread, SQLite)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Injective keyspaces**: distinct (domain, table) pairs never share a
//!    physical relation
//! 2. **Schema hash**: equal hashes mean interchangeable compiled schemas; a
//!    create with an equal hash changes nothing
//! 3. **Append-only metadata**: schema history is never rewritten; the newest
//!    `meta` row wins
//! 4. **Monotone expiry**: a revision's expiry marker is set once and never
//!    pushed later
//!
//! ## Module Organization
//!
//! - [`error`]: Error enum and status mapping
//! - [`types`]: Values, version identifiers, requests and results
//! - [`codec`]: Attribute types and their value conversions
//! - [`schema`]: Schema descriptions, normalization, compilation, keyspaces
//! - [`sql`]: DDL and DML generation
//! - [`engine`]: SQLite connection thread
//! - [`cache`]: Schema cache
//! - [`migration`]: Migration planning and execution
//! - [`config`]: Store configuration
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for revstore operations.
pub mod error;

/// Domain types: logical values, tids, read and write requests.
pub mod types;

/// Attribute types and the conversions between logical and stored values.
pub mod codec;

/// Declarative schemas and their compiled form.
///
/// Contains normalization, the schema hash, the built-in meta schema and
/// keyspace naming.
pub mod schema;

/// SQL generation for the SQLite layout.
pub mod sql;

/// The SQLite execution engine.
pub mod engine;

/// Process-wide schema cache.
pub mod cache;

/// Schema migrations.
pub mod migration;

/// Store configuration.
pub mod config;

/// Async API for revstore.
///
/// The main entry point is [`TableStore`](api::TableStore).
pub mod api;

mod retention;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::TableStore;
pub use cache::CacheStats;
pub use codec::AttributeType;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use migration::{Migration, MigrationPlanner, MigrationRequest, SqliteMigrator};
pub use schema::{
    IndexElement, IndexKind, Keyspace, Relation, RetentionPolicy, SchemaInfo, StoredSchema,
    TableSchema,
};

pub use types::{
    Condition, CreateOutcome, GetRequest, GetResult, PutRequest, RetentionSweep, Row, SortOrder,
    Tid, Value, WriteAck,
};
