//! # Error Handling for revstore
//!
//! A single error enum ([`Error`]) represents every failure mode of the store.
//! Lifecycle, read, write and retention code all fail in overlapping ways
//! (SQLite errors, missing tables, bad input), so one enum keeps function
//! signatures simple and lets callers match on the cases they care about.
//!
//! ## Rust Pattern: thiserror
//!
//! `thiserror` derives `std::error::Error` and `Display` from the
//! `#[error(...)]` attributes, and `From` conversions from `#[from]` fields,
//! so `?` works directly on `rusqlite` and `serde_json` results.
//!
//! ## Error Categories
//!
//! | Category | Variants | Status | Typical Response |
//! |----------|----------|--------|------------------|
//! | Caller input | `InvalidRequest` | 400 | Fix the request |
//! | Not found | `NotFound` | 404 | Create the table first |
//! | Incompatible schema | `BadRequest` | 400 | Bump the version or keep the key |
//! | Missing relation | `TableNotFound` | 500 | Absorbed by the read path |
//! | Internal | `Sqlite`, `Json`, `Io`, `Internal` | 500 | Log and investigate |
//!
//! The store never speaks HTTP itself; [`Error::status`] only gives boundary
//! layers a transport-neutral code to map from.

use thiserror::Error;

use crate::schema::TableSchema;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in revstore operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller Errors (fix the request, do not retry)
    // =========================================================================

    /// The request or schema description is malformed.
    ///
    /// # When This Happens
    ///
    /// - `create_table` without a table name
    /// - A schema that fails normalization (unknown index attribute, no hash key, ...)
    /// - A write naming an undeclared attribute or omitting a key attribute
    /// - A value whose shape does not match the attribute's declared type
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No schema metadata exists for the keyspace.
    ///
    /// Returned by `get`, `put` and `get_table_schema` for tables that were
    /// never created (or were dropped).
    #[error("not found: no schema stored for keyspace '{keyspace}'")]
    NotFound {
        /// The physical keyspace that was looked up.
        keyspace: String,
    },

    /// A schema change cannot be applied to the existing table.
    ///
    /// # When This Happens
    ///
    /// `create_table` was called with a schema whose hash differs from the
    /// stored one, and the migration planner refused the transition (or the
    /// migration failed while executing). The stored schema stays authoritative.
    ///
    /// # Recovery
    ///
    /// Keep the primary key and attribute types unchanged, and increment
    /// `version` with every change.
    #[error("bad request: incompatible schema change for keyspace '{keyspace}': {detail}")]
    BadRequest {
        /// The physical keyspace being migrated.
        keyspace: String,
        /// The schema the caller asked for.
        schema: Box<TableSchema>,
        /// Why the change was refused.
        detail: String,
    },

    // =========================================================================
    // Structural Errors (expected under concurrent drop/create)
    // =========================================================================

    /// A physical relation referenced by a statement does not exist.
    ///
    /// The engine converts SQLite's "no such table" failures into this
    /// variant so the read path can tell a dropped relation apart from every
    /// other failure and answer with an empty result instead.
    #[error("relation not found: {relation}")]
    TableNotFound {
        /// The relation name as reported by SQLite.
        relation: String,
    },

    // =========================================================================
    // Internal Errors (investigate and fix)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Constraint violations, locked or corrupt database files and I/O errors
    /// all land here and are propagated unchanged; the store never retries.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored JSON document (schema description, json/set column) could not
    /// be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation or engine shutdown.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transport-neutral status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::InvalidRequest(_) | Error::BadRequest { .. } => 400,
            Error::NotFound { .. } => 404,
            Error::TableNotFound { .. }
            | Error::Sqlite(_)
            | Error::Json(_)
            | Error::Io(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Shorthand for building an [`Error::InvalidRequest`].
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// Shorthand for building an [`Error::Internal`].
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
