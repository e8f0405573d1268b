//! Dynamic column values and the primary-key value type.
//!
//! [`Value`] is the universal cell type for [`crate::dataframe::DataFrame`]
//! columns. [`PkValue`] is the restricted subset usable in primary-key and
//! transform-key columns (spec §6.1: "variable-length text and integer").

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single cell value in a [`crate::dataframe::DataFrame`].
///
/// Serializable so a `MemoryTableStore` snapshot (or a single row) can be
/// shipped as JSON at a process boundary without a bespoke wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Serialize to a JSON string — e.g. for logging a row's content
    /// alongside its hash, or shipping a single cell across a process
    /// boundary that has no native `Value` type.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn as_pk_value(&self) -> Option<PkValue> {
        match self {
            Value::Int(i) => Some(PkValue::Int(*i)),
            Value::Text(s) => Some(PkValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Canonical string form used by the content hash (`crate::hash`).
    ///
    /// NULL is encoded with a marker distinct from the literal text "NULL"
    /// so that a text column actually holding "NULL" does not collide with
    /// an absent value.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => "\u{0}NULL\u{0}".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f:?}"),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
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

/// A primary-key (or transform-key) column value.
///
/// Restricted to the two types the engine guarantees ordering and hashing
/// for. Other `Value` variants are backend-specific and only valid in
/// non-key columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PkValue {
    Int(i64),
    Text(String),
}

impl PkValue {
    /// Whether this key value equals a dynamic [`Value`] (used to apply
    /// `RunConfig` filters, which carry `Value`, against PK-typed columns).
    pub fn matches_value(&self, v: &Value) -> bool {
        match (self, v) {
            (PkValue::Int(a), Value::Int(b)) => a == b,
            (PkValue::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkValue::Int(i) => write!(f, "{i}"),
            PkValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for PkValue {
    fn from(s: &str) -> Self {
        PkValue::Text(s.to_string())
    }
}

impl From<String> for PkValue {
    fn from(s: String) -> Self {
        PkValue::Text(s)
    }
}

impl From<i64> for PkValue {
    fn from(i: i64) -> Self {
        PkValue::Int(i)
    }
}

impl From<PkValue> for Value {
    fn from(pk: PkValue) -> Self {
        match pk {
            PkValue::Int(i) => Value::Int(i),
            PkValue::Text(s) => Value::Text(s),
        }
    }
}

/// A key tuple: one [`PkValue`] per key column, in the declared column order.
pub type Pk = Vec<PkValue>;

/// The declared SQL-ish type of a key column (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Text,
}

/// A declared column in a table's primary-key schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn int(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            ty: ColumnType::Int,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            ty: ColumnType::Text,
        }
    }
}
