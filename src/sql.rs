//! # Statement Generation
//!
//! Builds the SQLite DDL and DML for a compiled [`SchemaInfo`]. Nothing here
//! touches a connection: every builder returns [`Statement`]s (SQL text plus
//! positional parameters) that the engine executes.
//!
//! ## Physical Layout
//!
//! ```text
//! <ks>_data    one row per revision       PK (hash.., range.., tid)  + _exist_until
//! <ks>_static  one row per hash key       PK (hash..)                (only with statics)
//! <ks>_meta    schema history             PK (key, tid)              + _exist_until
//! <ks>_idx     view: latest unmarked revision of every item in <ks>_data
//! ```
//!
//! Reads join `<ks>_static` onto `<ks>_data` (aliases `s` and `d`) so static
//! attributes appear on every revision of the item.
//!
//! Identifiers are always double-quoted. Values are always bound, never
//! interpolated.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;

use crate::codec::AttributeType;
use crate::error::{Error, Result};
use crate::schema::{meta_schema, Keyspace, Relation, SchemaInfo, EXPIRY_COLUMN};
use crate::types::{Condition, GetRequest, SortOrder, Value};

// =============================================================================
// Statement
// =============================================================================

/// One SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// The statements produced for one write.
#[derive(Debug, Clone, PartialEq)]
pub struct PutStatements {
    /// Upsert into the target relation.
    pub data: Statement,
    /// Upsert into `static`, when the write carries static attributes.
    pub statics: Option<Statement>,
}

impl PutStatements {
    /// All statements in execution order.
    pub fn into_batch(self) -> Vec<Statement> {
        let mut batch = vec![self.data];
        batch.extend(self.statics);
        batch
    }
}

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quoted_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// =============================================================================
// DDL
// =============================================================================

/// `CREATE TABLE` for a revision relation (`data` or `meta`).
///
/// Columns are every non-static attribute plus the expiry marker; the primary
/// key is the full revision key.
pub fn build_table_sql(relation: &str, info: &SchemaInfo) -> Statement {
    let mut columns: Vec<String> = info
        .data_attributes()
        .map(|(name, ty)| {
            let not_null = if info.is_key(name) { " NOT NULL" } else { "" };
            format!("{} {}{}", quote_ident(name), ty.storage().column_type(), not_null)
        })
        .collect();
    columns.push(format!("{} INTEGER", quote_ident(EXPIRY_COLUMN)));
    columns.push(format!(
        "PRIMARY KEY ({})",
        quoted_list(info.i_keys.iter().map(String::as_str))
    ));

    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(relation),
        columns.join(", ")
    ))
}

/// `CREATE TABLE` for the `static` relation, or `None` without statics.
pub fn build_statics_table_sql(relation: &str, info: &SchemaInfo) -> Option<Statement> {
    if !info.has_static() {
        return None;
    }

    let mut columns = Vec::new();
    for name in info.hash_keys.iter().chain(info.statics.iter()) {
        if let Some(ty) = info.converter(name) {
            let not_null = if info.is_key(name) { " NOT NULL" } else { "" };
            columns.push(format!(
                "{} {}{}",
                quote_ident(name),
                ty.storage().column_type(),
                not_null
            ));
        }
    }
    columns.push(format!(
        "PRIMARY KEY ({})",
        quoted_list(info.hash_keys.iter().map(String::as_str))
    ));

    Some(Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(relation),
        columns.join(", ")
    )))
}

/// Drops and recreates the index view over `data`.
///
/// The view keeps, for every item, the unmarked revision with the greatest
/// tid. It is recreated rather than altered so it always reflects the current
/// column set.
pub fn build_index_view_sql(keyspace: &Keyspace, info: &SchemaInfo) -> Vec<Statement> {
    let view = quote_ident(&keyspace.relation(Relation::IndexView));
    let data = quote_ident(&keyspace.relation(Relation::Data));
    let tid = quote_ident(&info.tid);
    let expiry = quote_ident(EXPIRY_COLUMN);

    let mut correlation = format!("x.{expiry} IS NULL");
    for key in info.item_keys() {
        let key = quote_ident(key);
        correlation.push_str(&format!(" AND x.{key} = d.{key}"));
    }

    vec![
        Statement::new(format!("DROP VIEW IF EXISTS {view}")),
        Statement::new(format!(
            "CREATE VIEW {view} AS SELECT d.* FROM {data} d \
             WHERE d.{expiry} IS NULL \
             AND d.{tid} = (SELECT MAX(x.{tid}) FROM {data} x WHERE {correlation})"
        )),
    ]
}

/// Every relation of a new keyspace, in creation order.
pub fn build_keyspace_sql(keyspace: &Keyspace, info: &SchemaInfo) -> Vec<Statement> {
    let mut batch = vec![
        build_table_sql(&keyspace.relation(Relation::Data), info),
        build_table_sql(&keyspace.relation(Relation::Meta), meta_schema()),
    ];
    batch.extend(build_statics_table_sql(
        &keyspace.relation(Relation::Static),
        info,
    ));
    batch.extend(build_index_view_sql(keyspace, info));
    batch
}

/// Drops every relation of a keyspace. `static` is only dropped when the
/// schema is known to declare statics.
pub fn build_drop_sql(keyspace: &Keyspace, has_static: bool) -> Vec<Statement> {
    let mut batch = vec![
        Statement::new(format!(
            "DROP VIEW IF EXISTS {}",
            quote_ident(&keyspace.relation(Relation::IndexView))
        )),
        Statement::new(format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&keyspace.relation(Relation::Meta))
        )),
        Statement::new(format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&keyspace.relation(Relation::Data))
        )),
    ];
    if has_static {
        batch.push(Statement::new(format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&keyspace.relation(Relation::Static))
        )));
    }
    batch
}

// =============================================================================
// Reads
// =============================================================================

/// Relations a read runs against.
#[derive(Debug, Clone, Copy)]
pub struct ReadTarget<'a> {
    /// `data`, `meta` or the index view.
    pub relation: &'a str,
    /// `static` relation to join, if the schema has one.
    pub statics: Option<&'a str>,
}

/// Builds the `SELECT` for a read.
///
/// Every projected column is aliased to its attribute name, and the expiry
/// marker is always selected last so the caller can strip it.
///
/// # Errors
///
/// [`Error::InvalidRequest`] for unknown attributes in the projection,
/// conditions or ordering, for an unknown secondary index, and for values the
/// attribute's converter rejects.
pub fn build_get_query(
    target: ReadTarget<'_>,
    info: &SchemaInfo,
    request: &GetRequest,
    now_ms: i64,
) -> Result<Statement> {
    let join_statics = target.statics.is_some() && info.has_static();
    let column = |name: &str| {
        let alias = if join_statics && info.is_static(name) { "s" } else { "d" };
        format!("{alias}.{}", quote_ident(name))
    };
    let declared = |name: &str, context: &str| {
        if info.attributes.contains_key(name) && (join_statics || !info.is_static(name)) {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "{context} references unknown attribute '{name}'"
            )))
        }
    };

    // Projection
    let projection: Vec<String> = match (&request.proj, &request.index) {
        (Some(proj), _) => {
            if proj.is_empty() {
                return Err(Error::invalid("proj must name at least one attribute"));
            }
            proj.clone()
        }
        (None, Some(index)) => {
            let elements = info.secondary_indexes.get(index).ok_or_else(|| {
                Error::invalid(format!("unknown secondary index '{index}'"))
            })?;
            let mut names: Vec<String> = Vec::new();
            for name in elements
                .iter()
                .map(|e| &e.attribute)
                .chain(info.i_keys.iter())
            {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            names
        }
        (None, None) => info
            .attributes
            .keys()
            .filter(|name| join_statics || !info.is_static(name))
            .cloned()
            .collect(),
    };
    for name in &projection {
        declared(name, "proj")?;
    }

    let mut select: Vec<String> = projection
        .iter()
        .map(|name| format!("{} AS {}", column(name), quote_ident(name)))
        .collect();
    select.push(format!(
        "d.{} AS {}",
        quote_ident(EXPIRY_COLUMN),
        quote_ident(EXPIRY_COLUMN)
    ));

    let mut sql = format!(
        "SELECT {} FROM {} d",
        select.join(", "),
        quote_ident(target.relation)
    );
    if let (true, Some(statics)) = (join_statics, target.statics) {
        let on = info
            .hash_keys
            .iter()
            .map(|k| format!("s.{k} = d.{k}", k = quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ");
        sql.push_str(&format!(" LEFT JOIN {} s ON {on}", quote_ident(statics)));
    }

    // Conditions
    let expiry = quote_ident(EXPIRY_COLUMN);
    let mut params = vec![SqlValue::Integer(now_ms)];
    let mut predicates = vec![format!("(d.{expiry} IS NULL OR d.{expiry} > ?)")];
    for (name, condition) in &request.attributes {
        declared(name, "condition")?;
        let ty = info
            .converter(name)
            .ok_or_else(|| Error::invalid(format!("unknown attribute '{name}'")))?;
        let col = column(name);

        if let Condition::Eq(Value::Null) = condition {
            predicates.push(format!("{col} IS NULL"));
            continue;
        }
        if !ty.is_comparable() {
            return Err(Error::invalid(format!(
                "attribute '{name}' of type {ty} cannot be used in a condition"
            )));
        }
        if !matches!(condition, Condition::Eq(_)) && !ty.is_ordered() {
            return Err(Error::invalid(format!(
                "attribute '{name}' of type {ty} only supports equality conditions"
            )));
        }

        let mut bind = |value: &Value| -> Result<()> {
            if value.is_null() {
                return Err(Error::invalid(format!(
                    "condition on '{name}' compares against null"
                )));
            }
            params.push(ty.encode(value)?);
            Ok(())
        };
        let predicate = match condition {
            Condition::Eq(v) => {
                bind(v)?;
                format!("{col} = ?")
            }
            Condition::Lt(v) => {
                bind(v)?;
                format!("{col} < ?")
            }
            Condition::Le(v) => {
                bind(v)?;
                format!("{col} <= ?")
            }
            Condition::Gt(v) => {
                bind(v)?;
                format!("{col} > ?")
            }
            Condition::Ge(v) => {
                bind(v)?;
                format!("{col} >= ?")
            }
            Condition::Between(low, high) => {
                bind(low)?;
                bind(high)?;
                format!("{col} BETWEEN ? AND ?")
            }
        };
        predicates.push(predicate);
    }
    sql.push_str(&format!(" WHERE {}", predicates.join(" AND ")));

    // Ordering
    let order: Vec<(String, SortOrder)> = if request.order.is_empty() {
        info.range_keys.clone()
    } else {
        request.order.clone()
    };
    if !order.is_empty() {
        let mut terms = Vec::with_capacity(order.len());
        for (name, direction) in &order {
            declared(name, "order")?;
            if !info.converter(name).is_some_and(AttributeType::is_ordered) {
                return Err(Error::invalid(format!(
                    "attribute '{name}' has no sort order"
                )));
            }
            terms.push(format!("{} {}", column(name), direction.as_sql()));
        }
        sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }

    // Pagination
    match (request.limit, request.next) {
        (Some(limit), next) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(to_i64(limit)));
            params.push(SqlValue::Integer(to_i64(next.unwrap_or(0))));
        }
        (None, Some(next)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(SqlValue::Integer(to_i64(next)));
        }
        (None, None) => {}
    }

    Ok(Statement::with_params(sql, params))
}

// =============================================================================
// Writes
// =============================================================================

/// Builds the upserts for one revision.
///
/// Static attributes in `attributes` are routed to `static_relation`, keyed by
/// the hash keys; everything else goes to `relation`, keyed by the full
/// revision key. The caller fills in the tid before calling.
///
/// # Errors
///
/// [`Error::InvalidRequest`] for undeclared attributes, missing or null key
/// attributes, and values the converter rejects.
pub fn build_put_query(
    relation: &str,
    static_relation: Option<&str>,
    info: &SchemaInfo,
    attributes: &BTreeMap<String, Value>,
) -> Result<PutStatements> {
    for name in attributes.keys() {
        if !info.attributes.contains_key(name) {
            return Err(Error::invalid(format!(
                "attribute '{name}' is not declared by table '{}'",
                info.table
            )));
        }
    }
    for key in &info.i_keys {
        match attributes.get(key) {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(Error::invalid(format!(
                    "key attribute '{key}' is required"
                )))
            }
        }
    }

    let mut data_columns = Vec::new();
    let mut data_params = Vec::new();
    let mut static_columns = Vec::new();
    let mut static_params = Vec::new();
    for (name, value) in attributes {
        let ty = info
            .converter(name)
            .ok_or_else(|| Error::invalid(format!("unknown attribute '{name}'")))?;
        let encoded = ty.encode(value)?;
        if info.is_static(name) {
            static_columns.push(name.as_str());
            static_params.push(encoded);
        } else {
            data_columns.push(name.as_str());
            data_params.push(encoded);
        }
    }

    let data = Statement::with_params(
        upsert_sql(relation, &data_columns, &info.i_keys),
        data_params,
    );

    let statics = match (static_columns.is_empty(), static_relation) {
        (true, _) => None,
        (false, None) => {
            return Err(Error::internal(format!(
                "table '{}' has static attributes but no static relation",
                info.table
            )))
        }
        (false, Some(static_relation)) => {
            let mut columns: Vec<&str> = info.hash_keys.iter().map(String::as_str).collect();
            let mut params = Vec::with_capacity(columns.len() + static_params.len());
            for key in &info.hash_keys {
                let value = attributes.get(key).unwrap_or(&Value::Null);
                let ty = info
                    .converter(key)
                    .ok_or_else(|| Error::internal(format!("hash key '{key}' has no type")))?;
                params.push(ty.encode(value)?);
            }
            columns.extend(static_columns);
            params.extend(static_params);
            Some(Statement::with_params(
                upsert_sql(static_relation, &columns, &info.hash_keys),
                params,
            ))
        }
    };

    Ok(PutStatements { data, statics })
}

fn upsert_sql(relation: &str, columns: &[&str], conflict: &[String]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !conflict.iter().any(|k| k == *c))
        .map(|c| format!("{c} = excluded.{c}", c = quote_ident(c)))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_ident(relation),
        quoted_list(columns.iter().copied()),
        placeholders,
        quoted_list(conflict.iter().map(String::as_str)),
        action
    )
}

// =============================================================================
// Retention
// =============================================================================

/// Sets the expiry marker on one revision unless it already has one.
///
/// `revision` must carry a value for every `i_key`.
pub fn build_mark_expiry_query(
    relation: &str,
    info: &SchemaInfo,
    revision: &BTreeMap<String, Value>,
    expires_at_ms: i64,
) -> Result<Statement> {
    let expiry = quote_ident(EXPIRY_COLUMN);
    let mut params = vec![SqlValue::Integer(expires_at_ms)];
    let mut predicates = Vec::with_capacity(info.i_keys.len());
    for key in &info.i_keys {
        let value = revision
            .get(key)
            .ok_or_else(|| Error::internal(format!("revision is missing key '{key}'")))?;
        let ty = info
            .converter(key)
            .ok_or_else(|| Error::internal(format!("key '{key}' has no type")))?;
        params.push(ty.encode(value)?);
        predicates.push(format!("{} = ?", quote_ident(key)));
    }
    Ok(Statement::with_params(
        format!(
            "UPDATE {} SET {expiry} = COALESCE({expiry}, ?) WHERE {}",
            quote_ident(relation),
            predicates.join(" AND ")
        ),
        params,
    ))
}

/// Deletes every revision whose expiry marker has passed.
pub fn build_delete_expired_query(relation: &str, now_ms: i64) -> Statement {
    let expiry = quote_ident(EXPIRY_COLUMN);
    Statement::with_params(
        format!(
            "DELETE FROM {} WHERE {expiry} IS NOT NULL AND {expiry} <= ?",
            quote_ident(relation)
        ),
        vec![SqlValue::Integer(now_ms)],
    )
}

// =============================================================================
// Tests
// =============================================================================
