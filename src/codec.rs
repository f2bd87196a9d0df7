//! # Attribute Type Conversion
//!
//! This module is the type conversion registry: for every logical attribute
//! type it knows how to encode a [`Value`] into an SQLite value and decode it
//! back.
//!
//! ## Storage Mapping
//!
//! | Attribute type | Logical value | SQLite storage |
//! |----------------|---------------|----------------|
//! | `blob` | `Blob` | BLOB |
//! | `boolean` | `Bool` | INTEGER 0/1 |
//! | `int`, `long`, `varint` | `Int` | INTEGER |
//! | `float`, `double` | `Float` | REAL |
//! | `decimal`, `string` | `Text` | TEXT |
//! | `uuid`, `timeuuid` | `Uuid` | TEXT (hyphenated) |
//! | `timestamp` | `Timestamp` | INTEGER (ms) |
//! | `json` | `Json` | TEXT |
//! | `set<T>` | `Set` | TEXT (JSON array) |
//!
//! Set elements are stored as a JSON array of their element's physical
//! value: numbers and strings as themselves, blobs as base64 strings. The
//! array is deduplicated and sorted, so equal sets store equal text.
//!
//! Decimals are stored as their text to keep every digit. SQLite would order
//! them as strings (`"10" < "9"`), so a decimal can be matched for equality
//! but never used as a range key, a range condition or a sort attribute.
//!
//! ## Rust Pattern: Dispatch by Match
//!
//! Converters are not looked up by name at runtime. [`AttributeType::encode`]
//! and [`AttributeType::decode`] match on the type tag, so an unsupported
//! combination is a single fall-through arm rather than a missing map entry.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Value;

// =============================================================================
// Attribute Types
// =============================================================================

/// A logical attribute type as written in a schema description.
///
/// # Serialization
///
/// Serialized as its schema spelling (`"string"`, `"set<int>"`, ...) via
/// `FromStr`/`Display`, so stored schema descriptions stay readable JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeType {
    Blob,
    Boolean,
    Decimal,
    Double,
    Float,
    Int,
    Long,
    Varint,
    String,
    Timeuuid,
    Uuid,
    Timestamp,
    Json,
    /// A set of scalar elements. Never nested, never of `boolean` or `json`.
    Set(Box<AttributeType>),
}

/// SQLite storage class an attribute type is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageClass {
    /// Column type used in `CREATE TABLE`, which sets the column affinity.
    pub fn column_type(&self) -> &'static str {
        match self {
            StorageClass::Integer => "INTEGER",
            StorageClass::Real => "REAL",
            StorageClass::Text => "TEXT",
            StorageClass::Blob => "BLOB",
        }
    }
}

impl AttributeType {
    /// Every scalar type, in schema spelling order. Used by tests and docs.
    pub const SCALARS: [AttributeType; 13] = [
        AttributeType::Blob,
        AttributeType::Boolean,
        AttributeType::Decimal,
        AttributeType::Double,
        AttributeType::Float,
        AttributeType::Int,
        AttributeType::Long,
        AttributeType::Varint,
        AttributeType::String,
        AttributeType::Timeuuid,
        AttributeType::Uuid,
        AttributeType::Timestamp,
        AttributeType::Json,
    ];

    /// The SQLite storage class for this type.
    pub fn storage(&self) -> StorageClass {
        match self {
            AttributeType::Blob => StorageClass::Blob,
            AttributeType::Boolean
            | AttributeType::Int
            | AttributeType::Long
            | AttributeType::Varint
            | AttributeType::Timestamp => StorageClass::Integer,
            AttributeType::Double | AttributeType::Float => StorageClass::Real,
            AttributeType::Decimal
            | AttributeType::String
            | AttributeType::Timeuuid
            | AttributeType::Uuid
            | AttributeType::Json
            | AttributeType::Set(_) => StorageClass::Text,
        }
    }

    /// Whether values of this type can be part of a primary key.
    pub fn is_keyable(&self) -> bool {
        !matches!(self, AttributeType::Set(_) | AttributeType::Json)
    }

    /// Whether values of this type can be compared in a read condition.
    pub fn is_comparable(&self) -> bool {
        self.is_keyable()
    }

    /// Whether SQLite orders the stored form the same way as the logical
    /// values, which range keys, range conditions and sorting rely on.
    pub fn is_ordered(&self) -> bool {
        self.is_comparable() && !matches!(self, AttributeType::Decimal)
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Encodes a logical value for storage.
    ///
    /// `Null` encodes to SQL NULL for every type. Any other mismatch between
    /// the value's shape and the declared type is an [`Error::InvalidRequest`].
    pub fn encode(&self, value: &Value) -> Result<SqlValue> {
        let encoded = match (self, value) {
            (_, Value::Null) => SqlValue::Null,
            (AttributeType::Blob, Value::Blob(b)) => SqlValue::Blob(b.clone()),
            (AttributeType::Boolean, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (AttributeType::Int, Value::Int(i)) => {
                if i32::try_from(*i).is_err() {
                    return Err(Error::invalid(format!("value {i} does not fit an int")));
                }
                SqlValue::Integer(*i)
            }
            (AttributeType::Long | AttributeType::Varint, Value::Int(i)) => SqlValue::Integer(*i),
            (AttributeType::Float | AttributeType::Double, Value::Float(f)) => SqlValue::Real(*f),
            (AttributeType::Float | AttributeType::Double, Value::Int(i)) => {
                SqlValue::Real(*i as f64)
            }
            (AttributeType::Decimal, Value::Text(s)) => {
                if s.trim().parse::<f64>().is_err() {
                    return Err(Error::invalid(format!("'{s}' is not a decimal")));
                }
                SqlValue::Text(s.clone())
            }
            (AttributeType::String, Value::Text(s)) => SqlValue::Text(s.clone()),
            (AttributeType::Timeuuid, Value::Uuid(_) | Value::Text(_)) => {
                let uuid = parse_uuid(value)?;
                if uuid.get_version_num() != 7 {
                    return Err(Error::invalid(format!(
                        "timeuuid '{uuid}' must be a version 7 UUID"
                    )));
                }
                SqlValue::Text(uuid.hyphenated().to_string())
            }
            (AttributeType::Uuid, Value::Uuid(_) | Value::Text(_)) => {
                SqlValue::Text(parse_uuid(value)?.hyphenated().to_string())
            }
            (AttributeType::Timestamp, Value::Timestamp(ms) | Value::Int(ms)) => {
                SqlValue::Integer(*ms)
            }
            (AttributeType::Json, Value::Json(j)) => SqlValue::Text(serde_json::to_string(j)?),
            (AttributeType::Set(inner), Value::Set(items)) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    if item.is_null() {
                        return Err(Error::invalid("sets cannot contain null"));
                    }
                    elements.push(sql_to_json(inner.encode(item)?));
                }
                elements.sort_by(json_order);
                elements.dedup();
                SqlValue::Text(serde_json::to_string(&elements)?)
            }
            (ty, value) => {
                return Err(Error::invalid(format!(
                    "a {} value cannot be stored in a {ty} attribute",
                    value.kind()
                )))
            }
        };
        Ok(encoded)
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// Decodes a stored value back into its logical form.
    ///
    /// A storage class that this type never writes means the row was not
    /// written by this store (or the schema changed underneath it), and is
    /// reported as [`Error::Internal`].
    pub fn decode(&self, raw: SqlValue) -> Result<Value> {
        let decoded = match (self, raw) {
            (_, SqlValue::Null) => Value::Null,
            (AttributeType::Blob, SqlValue::Blob(b)) => Value::Blob(b),
            (AttributeType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (
                AttributeType::Int | AttributeType::Long | AttributeType::Varint,
                SqlValue::Integer(i),
            ) => Value::Int(i),
            (AttributeType::Float | AttributeType::Double, SqlValue::Real(f)) => Value::Float(f),
            (AttributeType::Float | AttributeType::Double, SqlValue::Integer(i)) => {
                Value::Float(i as f64)
            }
            (AttributeType::Decimal | AttributeType::String, SqlValue::Text(s)) => Value::Text(s),
            (AttributeType::Timeuuid | AttributeType::Uuid, SqlValue::Text(s)) => {
                Value::Uuid(Uuid::parse_str(&s).map_err(|e| {
                    Error::internal(format!("stored uuid '{s}' is malformed: {e}"))
                })?)
            }
            (AttributeType::Timestamp, SqlValue::Integer(ms)) => Value::Timestamp(ms),
            (AttributeType::Json, SqlValue::Text(s)) => Value::Json(serde_json::from_str(&s)?),
            (AttributeType::Set(inner), SqlValue::Text(s)) => {
                let elements: Vec<serde_json::Value> = serde_json::from_str(&s)?;
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(inner.decode(json_to_sql(inner.storage(), element)?)?);
                }
                Value::Set(items)
            }
            (ty, raw) => {
                return Err(Error::internal(format!(
                    "stored {:?} value cannot be decoded as {ty}",
                    raw.data_type()
                )))
            }
        };
        Ok(decoded)
    }
}

fn parse_uuid(value: &Value) -> Result<Uuid> {
    match value {
        Value::Uuid(u) => Ok(*u),
        Value::Text(s) => {
            Uuid::parse_str(s).map_err(|e| Error::invalid(format!("'{s}' is not a uuid: {e}")))
        }
        other => Err(Error::invalid(format!("a {} value is not a uuid", other.kind()))),
    }
}

/// Physical set element → JSON array element.
/// Canonical order of set elements: numbers numerically, strings by bytes.
fn json_order(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value as Json;
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Json::String(x), Json::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn sql_to_json(value: SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(i) => serde_json::Value::from(i),
        SqlValue::Real(f) => serde_json::Value::from(f),
        SqlValue::Text(s) => serde_json::Value::String(s),
        SqlValue::Blob(b) => serde_json::Value::String(BASE64.encode(b)),
    }
}

/// JSON array element → physical set element of the given storage class.
fn json_to_sql(storage: StorageClass, element: serde_json::Value) -> Result<SqlValue> {
    let malformed = || Error::internal(format!("malformed set element {element}"));
    let value = match storage {
        StorageClass::Integer => SqlValue::Integer(element.as_i64().ok_or_else(malformed)?),
        StorageClass::Real => SqlValue::Real(element.as_f64().ok_or_else(malformed)?),
        StorageClass::Text => SqlValue::Text(element.as_str().ok_or_else(malformed)?.to_string()),
        StorageClass::Blob => {
            let encoded = element.as_str().ok_or_else(malformed)?;
            SqlValue::Blob(
                BASE64
                    .decode(encoded)
                    .map_err(|e| Error::internal(format!("malformed blob set element: {e}")))?,
            )
        }
    };
    Ok(value)
}

// =============================================================================
// Schema Spelling
// =============================================================================

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::Blob => "blob",
            AttributeType::Boolean => "boolean",
            AttributeType::Decimal => "decimal",
            AttributeType::Double => "double",
            AttributeType::Float => "float",
            AttributeType::Int => "int",
            AttributeType::Long => "long",
            AttributeType::Varint => "varint",
            AttributeType::String => "string",
            AttributeType::Timeuuid => "timeuuid",
            AttributeType::Uuid => "uuid",
            AttributeType::Timestamp => "timestamp",
            AttributeType::Json => "json",
            AttributeType::Set(inner) => return write!(f, "set<{inner}>"),
        };
        f.write_str(name)
    }
}

impl FromStr for AttributeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("set<").and_then(|rest| rest.strip_suffix('>')) {
            let inner: AttributeType = inner.parse()?;
            return match inner {
                AttributeType::Set(_) | AttributeType::Boolean | AttributeType::Json => Err(
                    Error::invalid(format!("unsupported set element type '{inner}'")),
                ),
                inner => Ok(AttributeType::Set(Box::new(inner))),
            };
        }
        AttributeType::SCALARS
            .iter()
            .find(|ty| ty.to_string() == s)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("unknown attribute type '{s}'")))
    }
}

impl TryFrom<String> for AttributeType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
