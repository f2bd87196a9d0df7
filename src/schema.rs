//! # Table Schemas
//!
//! This module turns a declarative [`TableSchema`] into the compiled
//! [`SchemaInfo`] that the read, write and retention paths work from, and
//! derives the physical [`Keyspace`] for a logical (domain, table) pair.
//!
//! ## Pipeline
//!
//! ```text
//!  TableSchema (caller)                      stored in <ks>_meta as JSON
//!        │                                              ▲
//!        ▼ validate_and_normalize_schema                │
//!  TableSchema (normalized) ────────────────────────────┘
//!        │
//!        ▼ make_schema_info
//!  SchemaInfo { iKeys, tid, statics, hash, converters, retention }
//! ```
//!
//! The normalized description is the durable source of truth: a cached
//! `SchemaInfo` can always be rebuilt from it, and its SHA-256 is the schema
//! `hash` used to decide between "no-op" and "migrate".
//!
//! ## The Version Identifier
//!
//! Every table has a `tid`: a `timeuuid` that discriminates revisions of the
//! same item. If the last declared range key is a `timeuuid`, that attribute is
//! the tid. Otherwise a hidden `_tid` range key (descending) is appended, so
//! tables that never mention versions still keep revision history.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::AttributeType;
use crate::error::{Error, Result};
use crate::types::{SortOrder, Tid};

// =============================================================================
// Constants
// =============================================================================

/// Name of the synthetic version attribute added to tables without one.
pub const SYNTHETIC_TID: &str = "_tid";

/// Internal expiry marker column on every `data` and `meta` relation.
///
/// NULL means "not marked". Otherwise it holds the Unix time in milliseconds
/// after which the revision is physically deleted.
pub const EXPIRY_COLUMN: &str = "_exist_until";

/// Key of the `meta` rows that hold the table's schema description.
pub const SCHEMA_META_KEY: &str = "schema";

/// Default number of revisions kept by a `latest` policy.
const DEFAULT_RETAIN_COUNT: u32 = 1;

/// Default grace window of a `latest` policy: one day, in seconds.
const DEFAULT_GRACE_TTL_SECS: u64 = 86_400;

// =============================================================================
// Declarative Schema
// =============================================================================

/// The role an attribute plays in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Partition key; rows sharing it share static attributes.
    Hash,
    /// Clustering key with an order.
    Range,
    /// Attribute shared by every revision with the same hash key.
    Static,
    /// Attribute projected by a secondary index.
    Proj,
}

/// One element of a primary or secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexElement {
    pub attribute: String,
    #[serde(rename = "type")]
    pub kind: IndexKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
}

impl IndexElement {
    pub fn hash(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: IndexKind::Hash,
            order: None,
        }
    }

    pub fn range(attribute: impl Into<String>, order: SortOrder) -> Self {
        Self {
            attribute: attribute.into(),
            kind: IndexKind::Range,
            order: Some(order),
        }
    }

    pub fn static_column(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: IndexKind::Static,
            order: None,
        }
    }

    pub fn proj(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            kind: IndexKind::Proj,
            order: None,
        }
    }
}

/// How much revision history a table keeps per item.
///
/// # Serialization
///
/// ```json
/// { "type": "all" }
/// { "type": "latest", "count": 2, "grace_ttl": 86400 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep every revision.
    #[default]
    All,
    /// Keep the `count` newest revisions; older ones stay visible for
    /// `grace_ttl` seconds after they become excess, then are deleted.
    Latest {
        #[serde(default = "default_retain_count")]
        count: u32,
        #[serde(default = "default_grace_ttl")]
        grace_ttl: u64,
    },
}

fn default_retain_count() -> u32 {
    DEFAULT_RETAIN_COUNT
}

fn default_grace_ttl() -> u64 {
    DEFAULT_GRACE_TTL_SECS
}

fn default_version() -> u32 {
    1
}

impl RetentionPolicy {
    /// Shorthand for a `latest` policy.
    pub fn latest(count: u32, grace_ttl_secs: u64) -> Self {
        RetentionPolicy::Latest {
            count,
            grace_ttl: grace_ttl_secs,
        }
    }
}

/// A declarative table description.
///
/// This is both what callers pass to `create_table` and, once normalized,
/// what is persisted in the table's `meta` relation.
///
/// # Example
///
/// ```rust
/// use revstore::{AttributeType, RetentionPolicy, SortOrder, TableSchema};
///
/// let schema = TableSchema::new("pages")
///     .attribute("title", AttributeType::String)
///     .attribute("rev", AttributeType::Int)
///     .attribute("body", AttributeType::Blob)
///     .hash("title")
///     .range("rev", SortOrder::Desc)
///     .retention(RetentionPolicy::latest(2, 3600));
/// assert_eq!(schema.index.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub attributes: BTreeMap<String, AttributeType>,
    pub index: Vec<IndexElement>,
    #[serde(default)]
    pub secondary_indexes: BTreeMap<String, Vec<IndexElement>>,
    #[serde(default)]
    pub revision_retention_policy: RetentionPolicy,
}

impl TableSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            version: default_version(),
            attributes: BTreeMap::new(),
            index: Vec::new(),
            secondary_indexes: BTreeMap::new(),
            revision_retention_policy: RetentionPolicy::All,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.attributes.insert(name.into(), ty);
        self
    }

    pub fn hash(mut self, attribute: impl Into<String>) -> Self {
        self.index.push(IndexElement::hash(attribute));
        self
    }

    pub fn range(mut self, attribute: impl Into<String>, order: SortOrder) -> Self {
        self.index.push(IndexElement::range(attribute, order));
        self
    }

    pub fn static_column(mut self, attribute: impl Into<String>) -> Self {
        self.index.push(IndexElement::static_column(attribute));
        self
    }

    pub fn secondary_index(mut self, name: impl Into<String>, elements: Vec<IndexElement>) -> Self {
        self.secondary_indexes.insert(name.into(), elements);
        self
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.revision_retention_policy = policy;
        self
    }
}

/// A schema description as read back from `meta`, with the tid it was
/// stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSchema {
    pub schema: TableSchema,
    pub tid: Tid,
}

// =============================================================================
// Validation and Normalization
// =============================================================================

/// Validates a schema description and returns its canonical form.
///
/// Normalization is idempotent: normalizing a normalized schema returns it
/// unchanged, so hashes computed before and after a store round trip agree.
///
/// # Errors
///
/// [`Error::InvalidRequest`] describing the first problem found.
pub fn validate_and_normalize_schema(schema: &TableSchema) -> Result<TableSchema> {
    let mut normalized = schema.clone();

    normalized.table = normalized.table.trim().to_string();
    if normalized.table.is_empty() {
        return Err(Error::invalid("table name is required"));
    }
    if normalized.version == 0 {
        return Err(Error::invalid("schema version must be at least 1"));
    }
    if normalized.attributes.is_empty() {
        return Err(Error::invalid("schema must declare at least one attribute"));
    }
    for name in normalized.attributes.keys() {
        check_identifier("attribute", name)?;
    }

    normalized.index = normalize_index(&normalized.attributes, &schema.index, None)?;

    for (name, elements) in normalized.secondary_indexes.iter_mut() {
        check_identifier("secondary index", name)?;
        *elements = normalize_index(&schema.attributes, elements, Some(name.as_str()))?;
    }

    if let RetentionPolicy::Latest { count: 0, .. } = normalized.revision_retention_policy {
        return Err(Error::invalid(
            "revisionRetentionPolicy 'latest' must keep at least one revision",
        ));
    }

    Ok(normalized)
}

/// Attribute and index names: an ASCII letter, then letters, digits or `_`.
///
/// Leading underscores are reserved for internal columns like `_tid`.
fn check_identifier(what: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid(format!("invalid {what} name '{name}'")))
    }
}

fn normalize_index(
    attributes: &BTreeMap<String, AttributeType>,
    elements: &[IndexElement],
    secondary: Option<&str>,
) -> Result<Vec<IndexElement>> {
    let context = match secondary {
        Some(name) => format!("secondary index '{name}'"),
        None => "index".to_string(),
    };

    let mut seen = HashSet::new();
    let mut saw_hash = false;
    let mut saw_range = false;
    let mut out = Vec::with_capacity(elements.len());

    for element in elements {
        let ty = attributes.get(&element.attribute).ok_or_else(|| {
            Error::invalid(format!(
                "{context} references undeclared attribute '{}'",
                element.attribute
            ))
        })?;
        if !seen.insert(element.attribute.as_str()) {
            return Err(Error::invalid(format!(
                "{context} lists attribute '{}' more than once",
                element.attribute
            )));
        }

        let order = match element.kind {
            IndexKind::Hash | IndexKind::Range if !ty.is_keyable() => {
                return Err(Error::invalid(format!(
                    "{context}: attribute '{}' of type {ty} cannot be a key",
                    element.attribute
                )));
            }
            IndexKind::Range if !ty.is_ordered() => {
                return Err(Error::invalid(format!(
                    "{context}: attribute '{}' of type {ty} has no sort order and cannot be a range key",
                    element.attribute
                )));
            }
            IndexKind::Hash => {
                if saw_range {
                    return Err(Error::invalid(format!(
                        "{context}: hash keys must precede range keys"
                    )));
                }
                saw_hash = true;
                None
            }
            IndexKind::Range => {
                saw_range = true;
                Some(element.order.unwrap_or(SortOrder::Desc))
            }
            IndexKind::Static if secondary.is_some() => {
                return Err(Error::invalid(format!(
                    "{context}: static attributes belong in the primary index"
                )));
            }
            IndexKind::Proj if secondary.is_none() => {
                return Err(Error::invalid(
                    "index: proj elements are only valid in secondary indexes",
                ));
            }
            IndexKind::Static | IndexKind::Proj => None,
        };

        out.push(IndexElement {
            attribute: element.attribute.clone(),
            kind: element.kind,
            order,
        });
    }

    if !saw_hash {
        return Err(Error::invalid(format!(
            "{context} must contain at least one hash key"
        )));
    }
    Ok(out)
}

/// Stable content fingerprint of a normalized schema: lowercase hex SHA-256 of
/// its canonical JSON. Field order is fixed by the struct and maps are
/// `BTreeMap`s, so equal schemas always serialize identically.
pub fn schema_hash(normalized: &TableSchema) -> Result<String> {
    let canonical = serde_json::to_vec(normalized)?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

// =============================================================================
// Compiled Schema
// =============================================================================

/// The compiled form of a normalized schema.
///
/// # Invariants
///
/// - `tid` is the last element of `i_keys` and has type `timeuuid`
/// - `i_keys` = `hash_keys` followed by the range keys
/// - `statics` and `i_keys` are disjoint
/// - two `SchemaInfo`s with the same `hash` are interchangeable
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaInfo {
    pub table: String,
    pub version: u32,
    /// Declared attributes plus synthetic ones (`_tid`).
    pub attributes: BTreeMap<String, AttributeType>,
    pub hash_keys: Vec<String>,
    pub range_keys: Vec<(String, SortOrder)>,
    /// Full revision key: hash keys then range keys, `tid` last.
    pub i_keys: Vec<String>,
    pub statics: Vec<String>,
    pub tid: String,
    pub secondary_indexes: BTreeMap<String, Vec<IndexElement>>,
    pub retention: RetentionPolicy,
    pub hash: String,
    /// The normalized description this was compiled from.
    pub description: TableSchema,
}

impl SchemaInfo {
    /// The converter for an attribute, i.e. its declared type.
    pub fn converter(&self, attribute: &str) -> Option<&AttributeType> {
        self.attributes.get(attribute)
    }

    pub fn has_static(&self) -> bool {
        !self.statics.is_empty()
    }

    pub fn is_static(&self, attribute: &str) -> bool {
        self.statics.iter().any(|s| s == attribute)
    }

    pub fn is_key(&self, attribute: &str) -> bool {
        self.i_keys.iter().any(|k| k == attribute)
    }

    /// The item key: every `i_key` except the tid.
    pub fn item_keys(&self) -> impl Iterator<Item = &str> {
        self.i_keys
            .iter()
            .map(String::as_str)
            .filter(move |k| *k != self.tid)
    }

    /// Attributes stored in the `data` relation (everything but statics).
    pub fn data_attributes(&self) -> impl Iterator<Item = (&str, &AttributeType)> {
        self.attributes
            .iter()
            .filter(move |(name, _)| !self.is_static(name))
            .map(|(name, ty)| (name.as_str(), ty))
    }
}

/// Compiles a normalized schema.
///
/// The caller is expected to pass the output of
/// [`validate_and_normalize_schema`] (or a description loaded from `meta`,
/// which was normalized before it was stored).
pub fn make_schema_info(normalized: &TableSchema) -> Result<SchemaInfo> {
    let mut attributes = normalized.attributes.clone();

    let hash_keys: Vec<String> = normalized
        .index
        .iter()
        .filter(|e| e.kind == IndexKind::Hash)
        .map(|e| e.attribute.clone())
        .collect();
    let mut range_keys: Vec<(String, SortOrder)> = normalized
        .index
        .iter()
        .filter(|e| e.kind == IndexKind::Range)
        .map(|e| (e.attribute.clone(), e.order.unwrap_or(SortOrder::Desc)))
        .collect();
    let statics: Vec<String> = normalized
        .index
        .iter()
        .filter(|e| e.kind == IndexKind::Static)
        .map(|e| e.attribute.clone())
        .collect();

    if hash_keys.is_empty() {
        return Err(Error::invalid("index must contain at least one hash key"));
    }

    let declared_tid = range_keys
        .last()
        .filter(|(name, _)| attributes.get(name) == Some(&AttributeType::Timeuuid))
        .map(|(name, _)| name.clone());
    let tid = match declared_tid {
        Some(name) => name,
        None => {
            attributes.insert(SYNTHETIC_TID.to_string(), AttributeType::Timeuuid);
            range_keys.push((SYNTHETIC_TID.to_string(), SortOrder::Desc));
            SYNTHETIC_TID.to_string()
        }
    };

    let i_keys = hash_keys
        .iter()
        .cloned()
        .chain(range_keys.iter().map(|(name, _)| name.clone()))
        .collect();

    Ok(SchemaInfo {
        table: normalized.table.clone(),
        version: normalized.version,
        attributes,
        hash_keys,
        range_keys,
        i_keys,
        statics,
        tid,
        secondary_indexes: normalized.secondary_indexes.clone(),
        retention: normalized.revision_retention_policy.clone(),
        hash: schema_hash(normalized)?,
        description: normalized.clone(),
    })
}

/// The fixed schema of every keyspace's `meta` relation.
///
/// ```text
/// key: string (hash) | tid: timeuuid (range, desc) | value: json
/// ```
pub fn meta_schema() -> &'static SchemaInfo {
    static META: OnceLock<SchemaInfo> = OnceLock::new();
    META.get_or_init(|| {
        let description = TableSchema::new("meta")
            .attribute("key", AttributeType::String)
            .attribute("tid", AttributeType::Timeuuid)
            .attribute("value", AttributeType::Json)
            .hash("key")
            .range("tid", SortOrder::Desc);
        make_schema_info(&description).expect("built-in meta schema is valid")
    })
}

// =============================================================================
// Keyspaces
// =============================================================================

/// The physical relations that make up one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Revisions.
    Data,
    /// Schema history.
    Meta,
    /// Attributes shared by all revisions with the same hash key.
    Static,
    /// View exposing the latest live revision of each item.
    IndexView,
}

impl Relation {
    fn suffix(&self) -> &'static str {
        match self {
            Relation::Data => "data",
            Relation::Meta => "meta",
            Relation::Static => "static",
            Relation::IndexView => "idx",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Physical namespace of one logical table.
///
/// # Naming
///
/// Lowercase ASCII letters and digits pass through; every other byte
/// (including uppercase letters and `_`) becomes `_` plus two lowercase hex
/// digits. Domain and table are joined with `_T_`. The escape never emits `T`
/// and never emits `_` followed by a non-hex character, so the separator is
/// unambiguous and the mapping is injective, even under SQLite's
/// case-insensitive identifier comparison.
///
/// ```rust
/// use revstore::Keyspace;
///
/// let ks = Keyspace::new("en.wikipedia.org", "pages");
/// assert_eq!(ks.as_str(), "en_2ewikipedia_2eorg_T_pages");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyspace(String);

impl Keyspace {
    pub fn new(domain: &str, table: &str) -> Self {
        Self(format!("{}_T_{}", escape(domain), escape(table)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Physical name of one of this keyspace's relations.
    pub fn relation(&self, relation: Relation) -> String {
        format!("{}_{}", self.0, relation.suffix())
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("_{b:02x}"));
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
