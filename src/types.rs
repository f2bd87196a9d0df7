//! # Domain Types for revstore
//!
//! This module defines the request, result and value types that flow through
//! the read and write paths.
//!
//! ## Design Philosophy: Logical vs Physical Values
//!
//! Callers speak in logical [`Value`]s (`Uuid`, `Timestamp`, `Set`, ...). SQLite
//! only knows five storage classes. The conversion between the two lives in
//! [`crate::codec`] and is selected by each attribute's declared type, so the
//! types here never carry SQLite details.
//!
//! ```text
//!   PutRequest { attributes: name → Value }
//!          │  codec::encode (per AttributeType)
//!          ▼
//!   SQLite row (NULL | INTEGER | REAL | TEXT | BLOB)
//!          │  codec::decode (per AttributeType)
//!          ▼
//!   GetResult { items: [name → Value] }
//! ```
//!
//! ## Invariants
//!
//! - [`Tid`]: a UUIDv7; its embedded millisecond timestamp is the write time of
//!   the revision it identifies.
//! - [`GetResult::next`] is an offset accumulator, never a server-side cursor.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Logical Values
// =============================================================================

/// A logical attribute value.
///
/// # Rust Pattern: Closed Enum
///
/// Every value shape the store understands is a variant here. Converters match
/// on `(AttributeType, Value)` pairs, so adding a shape means the compiler
/// points at every converter that needs updating.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / SQL NULL.
    Null,
    /// `boolean` attributes.
    Bool(bool),
    /// `int`, `long` and `varint` attributes.
    Int(i64),
    /// `float` and `double` attributes.
    Float(f64),
    /// `string` and `decimal` attributes (decimals keep their exact text).
    Text(String),
    /// `blob` attributes.
    Blob(Vec<u8>),
    /// `uuid` and `timeuuid` attributes.
    Uuid(Uuid),
    /// `timestamp` attributes, milliseconds since the Unix epoch.
    Timestamp(i64),
    /// `json` attributes.
    Json(serde_json::Value),
    /// `set<T>` attributes.
    Set(Vec<Value>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the text of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer of an `Int` value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the number of a `Float` value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the flag of a `Bool` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the bytes of a `Blob` value.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the UUID of a `Uuid` value, parsing `Text` if necessary.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            Value::Text(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    /// Returns the document of a `Json` value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
            Value::Set(_) => "set",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Tid> for Value {
    fn from(t: Tid) -> Self {
        Value::Uuid(t.as_uuid())
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

/// One materialized row: attribute name to decoded value.
pub type Row = BTreeMap<String, Value>;

// =============================================================================
// Version Identifiers
// =============================================================================

/// A time-ordered revision identifier.
///
/// # Why UUIDv7?
///
/// A v7 UUID starts with a 48-bit Unix millisecond timestamp, so its canonical
/// hyphenated text sorts in time order. That lets SQLite order revisions with
/// a plain `ORDER BY tid` on a TEXT column. `Uuid::now_v7` also keeps a
/// process-wide counter, so identifiers minted in the same millisecond are
/// still strictly increasing.
///
/// # Example
///
/// ```rust
/// use revstore::Tid;
///
/// let a = Tid::now();
/// let b = Tid::now();
/// assert!(a < b);
/// assert!(b.timestamp_ms() >= a.timestamp_ms());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(Uuid);

impl Tid {
    /// Mints a fresh identifier from the current time.
    pub fn now() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID, which must be version 7.
    pub fn from_uuid(uuid: Uuid) -> Result<Self> {
        if uuid.get_version_num() != 7 {
            return Err(Error::invalid(format!(
                "tid '{uuid}' must be a version 7 UUID, got version {}",
                uuid.get_version_num()
            )));
        }
        Ok(Self(uuid))
    }

    /// Returns the wrapped UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Milliseconds since the Unix epoch embedded in this identifier.
    pub fn timestamp_ms(&self) -> i64 {
        // Always present: construction only admits v7.
        self.0.get_timestamp().map_or(0, |ts| {
            let (secs, nanos) = ts.to_unix();
            i64::try_from(secs)
                .unwrap_or(i64::MAX)
                .saturating_mul(1000)
                .saturating_add(i64::from(nanos / 1_000_000))
        })
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// =============================================================================
// Read Requests
// =============================================================================

/// Sort direction for range keys and request ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// A predicate on one attribute of a read request.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    /// Inclusive on both ends.
    Between(Value, Value),
}

/// A typed read against one logical table.
///
/// # Example
///
/// ```rust
/// use revstore::{Condition, GetRequest, SortOrder};
///
/// let request = GetRequest::new("pages")
///     .with("title", "Main_Page")
///     .condition("rev", Condition::Ge(5.into()))
///     .order_by("rev", SortOrder::Asc)
///     .limit(10);
/// assert_eq!(request.attributes.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetRequest {
    /// Logical table name.
    pub table: String,
    /// Conditions, keyed by attribute name.
    pub attributes: BTreeMap<String, Condition>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Offset returned by a previous page.
    pub next: Option<u64>,
    /// Explicit ordering; empty means the declared range-key order.
    pub order: Vec<(String, SortOrder)>,
    /// Attributes to return; `None` returns all.
    pub proj: Option<Vec<String>>,
    /// Secondary index to read through.
    pub index: Option<String>,
}

impl GetRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Adds an equality condition.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .insert(attribute.into(), Condition::Eq(value.into()));
        self
    }

    /// Adds an arbitrary condition.
    pub fn condition(mut self, attribute: impl Into<String>, condition: Condition) -> Self {
        self.attributes.insert(attribute.into(), condition);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn next(mut self, next: u64) -> Self {
        self.next = Some(next);
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>, order: SortOrder) -> Self {
        self.order.push((attribute.into(), order));
        self
    }

    pub fn project<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proj = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    /// Whether the caller asked for pagination bookkeeping.
    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.next.is_some()
    }
}

/// The outcome of a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetResult {
    /// Number of rows in `items`.
    pub count: usize,
    /// Materialized rows, in query order.
    pub items: Vec<Row>,
    /// `request.next + count`, present only for paged requests.
    pub next: Option<u64>,
}

impl GetResult {
    /// An empty result, keeping the pagination accumulator intact.
    pub fn empty(request: &GetRequest) -> Self {
        Self::from_rows(request, Vec::new())
    }

    /// Wraps materialized rows and advances the pagination accumulator.
    pub fn from_rows(request: &GetRequest, items: Vec<Row>) -> Self {
        let count = items.len();
        let next = request
            .is_paged()
            .then(|| request.next.unwrap_or(0) + count as u64);
        Self { count, items, next }
    }
}

// =============================================================================
// Write Requests
// =============================================================================

/// A typed write of one revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutRequest {
    /// Logical table name.
    pub table: String,
    /// Attribute values; key attributes are required, `tid` is optional.
    pub attributes: BTreeMap<String, Value>,
}

impl PutRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }
}

/// What the retention step did after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionSweep {
    /// The relation or policy does not bound history.
    Skipped,
    /// The sweep ran; `marked` revisions received an expiry marker.
    Applied { examined: usize, marked: usize },
    /// The sweep failed after the write had already committed.
    Failed { reason: String },
}

/// Acknowledgement of a committed write.
///
/// No row content is echoed back; the `tid` is included because callers that
/// let the store mint it have no other way to address the new revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    /// The version identifier the revision was stored under.
    pub tid: Tid,
    /// Write time decoded from `tid`.
    pub write_time_ms: i64,
    /// Outcome of the retention step that followed the write.
    pub retention: RetentionSweep,
}

/// What `create_table` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Physical relations were created.
    Created,
    /// The stored schema already had the same hash; nothing changed.
    Unchanged,
    /// The stored schema was migrated to the requested one.
    Migrated,
}

// =============================================================================
// Tests
// =============================================================================
