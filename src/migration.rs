//! # Schema Migration
//!
//! When `create_table` receives a schema whose hash differs from the stored
//! one, it asks a [`MigrationPlanner`] for a [`Migration`] and executes it.
//! Planning is synchronous and side-effect free; a planning error means the
//! transition is not supported and the stored schema stays authoritative.
//!
//! ## Default Planner
//!
//! [`SqliteMigrator`] supports additive evolution only:
//!
//! | Change | Supported |
//! |--------|-----------|
//! | Add or remove a non-key attribute | yes (`ADD COLUMN` / `DROP COLUMN`) |
//! | Add or remove static attributes | yes (creates or drops `static` as needed) |
//! | Change secondary indexes or retention | yes (metadata only) |
//! | Change hash or range keys, or their order | no |
//! | Change an attribute's type | no |
//! | Move an attribute in or out of `static` | no |
//!
//! Every change must also increase `version`.
//!
//! The index view is dropped before any column change and recreated last, so
//! SQLite never has to rewrite a dependent view mid-migration.

use std::fmt;

use async_trait::async_trait;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::schema::{Keyspace, Relation, SchemaInfo};
use crate::sql::{build_index_view_sql, build_statics_table_sql, quote_ident, Statement};

/// Everything a planner needs to decide on a transition.
#[derive(Debug, Clone, Copy)]
pub struct MigrationRequest<'a> {
    pub keyspace: &'a Keyspace,
    /// The schema currently stored in `meta`.
    pub current: &'a SchemaInfo,
    /// The compiled form of the requested schema.
    pub candidate: &'a SchemaInfo,
}

/// Decides whether and how a schema transition can be performed.
pub trait MigrationPlanner: Send + Sync {
    /// Plans the transition from `request.current` to `request.candidate`.
    ///
    /// Any error means the transition is unsupported; its message becomes the
    /// `detail` of the resulting [`Error::BadRequest`].
    fn plan(&self, request: &MigrationRequest<'_>) -> Result<Box<dyn Migration>>;
}

/// A planned, not yet executed, physical transformation.
#[async_trait]
pub trait Migration: Send + fmt::Debug {
    /// Applies the transformation.
    async fn migrate(self: Box<Self>, engine: &Engine) -> Result<()>;
}

// =============================================================================
// SQLite Planner
// =============================================================================

/// Additive migrations for the SQLite layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteMigrator;

impl MigrationPlanner for SqliteMigrator {
    fn plan(&self, request: &MigrationRequest<'_>) -> Result<Box<dyn Migration>> {
        let MigrationRequest {
            keyspace,
            current,
            candidate,
        } = *request;

        if candidate.version <= current.version {
            return Err(Error::invalid(format!(
                "schema changes require a version increase (stored version {}, requested {})",
                current.version, candidate.version
            )));
        }
        if candidate.hash_keys != current.hash_keys || candidate.range_keys != current.range_keys {
            return Err(Error::invalid(
                "changing the primary index is not supported",
            ));
        }
        for (name, ty) in &candidate.attributes {
            let Some(old) = current.attributes.get(name) else {
                continue;
            };
            if old != ty {
                return Err(Error::invalid(format!(
                    "changing the type of attribute '{name}' from {old} to {ty} is not supported"
                )));
            }
            if current.is_static(name) != candidate.is_static(name) {
                return Err(Error::invalid(format!(
                    "moving attribute '{name}' in or out of the static columns is not supported"
                )));
            }
        }

        let data = keyspace.relation(Relation::Data);
        let statics = keyspace.relation(Relation::Static);
        let mut statements = vec![Statement::new(format!(
            "DROP VIEW IF EXISTS {}",
            quote_ident(&keyspace.relation(Relation::IndexView))
        ))];

        for (name, ty) in candidate.data_attributes() {
            if !current.attributes.contains_key(name) {
                statements.push(add_column(&data, name, ty.storage().column_type()));
            }
        }
        for (name, _) in current.data_attributes() {
            if !candidate.attributes.contains_key(name) {
                statements.push(drop_column(&data, name));
            }
        }

        match (current.has_static(), candidate.has_static()) {
            (false, true) => statements.extend(build_statics_table_sql(&statics, candidate)),
            (true, false) => statements.push(Statement::new(format!(
                "DROP TABLE IF EXISTS {}",
                quote_ident(&statics)
            ))),
            (true, true) => {
                for name in &candidate.statics {
                    if !current.is_static(name) {
                        if let Some(ty) = candidate.converter(name) {
                            statements.push(add_column(&statics, name, ty.storage().column_type()));
                        }
                    }
                }
                for name in &current.statics {
                    if !candidate.is_static(name) {
                        statements.push(drop_column(&statics, name));
                    }
                }
            }
            (false, false) => {}
        }

        statements.extend(build_index_view_sql(keyspace, candidate));

        Ok(Box::new(SqliteMigration {
            keyspace: keyspace.clone(),
            from_version: current.version,
            to_version: candidate.version,
            statements,
        }))
    }
}

fn add_column(relation: &str, column: &str, column_type: &str) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} ADD COLUMN {} {column_type}",
        quote_ident(relation),
        quote_ident(column)
    ))
}

fn drop_column(relation: &str, column: &str) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(relation),
        quote_ident(column)
    ))
}

/// The planned DDL for one transition, run as a single batch.
#[derive(Debug)]
pub struct SqliteMigration {
    keyspace: Keyspace,
    from_version: u32,
    to_version: u32,
    statements: Vec<Statement>,
}

impl SqliteMigration {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

#[async_trait]
impl Migration for SqliteMigration {
    async fn migrate(self: Box<Self>, engine: &Engine) -> Result<()> {
        tracing::debug!(
            keyspace = %self.keyspace,
            from = self.from_version,
            to = self.to_version,
            statements = self.statements.len(),
            "applying schema migration"
        );
        engine.run(self.statements).await
    }
}
