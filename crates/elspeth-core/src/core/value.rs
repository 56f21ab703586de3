// crates/elspeth-core/src/core/value.rs
// ============================================================================
// Module: Elspeth Row Value Model
// Description: Open, schema-driven row representation.
// Purpose: Give heterogeneous source rows a single typed shape usable by every
// downstream transform, gate, and recorder.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Rows are schema-driven dictionaries of unknown shape until a schema
//! contract narrows them. `Value` is the open, tagged representation; `Row`
//! is always a top-level `Map` so canonical hashing always starts from a
//! JSON object, matching the canonical-hashing contract ("given any
//! JSON-serializable value... maps with string keys").

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Value
// ============================================================================

/// An open, tagged value used to represent row fields.
///
/// # Invariants
/// - `Map` uses `BTreeMap` so key ordering is deterministic without a
///   separate canonicalization pass over the in-memory structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer value.
    Int(i64),
    /// IEEE-754 double-precision value.
    Float(f64),
    /// UTF-8 string value.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Map of string keys to values, ordered.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` if the value is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as a string slice, if it is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the value as an `i64`, if it is an `Int`.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as an `f64`, coercing `Int` losslessly where possible.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the value as a bool, if it is a `Bool`.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a map, if it is a `Map`.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(value) => Some(value),
            _ => None,
        }
    }

    /// Returns a short, stable type name for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// SECTION: Row Data
// ============================================================================

/// A row emitted by a source: always a top-level map of field name to value.
///
/// # Invariants
/// - Never has a `Value::List`/`Value::Map`-less top level; canonical
///   hashing of a row always hashes a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowData(BTreeMap<String, Value>);

impl RowData {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a row from an existing field map.
    #[must_use]
    pub const fn from_map(fields: BTreeMap<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns the field map.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Returns a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Inserts or replaces a field, returning the row for chaining.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Merges `other` into `self`, with `other`'s fields taking precedence
    /// on key collision (last-writer-wins, matching the coalesce `union`
    /// merge strategy).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Consumes the row, returning the owned field map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for RowData {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(
            map.into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect(),
        )
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only panic-based assertions are permitted."
    )]
    use super::*;

    #[test]
    fn merge_from_is_last_writer_wins() {
        let mut a = RowData::new().with_field("x", Value::Int(1)).with_field("y", Value::Int(2));
        let b = RowData::new().with_field("x", Value::Int(99));
        a.merge_from(&b);
        assert_eq!(a.get("x"), Some(&Value::Int(99)));
        assert_eq!(a.get("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn from_json_preserves_nested_structure() {
        let json = serde_json::json!({"a": {"b": [1, 2, 3]}});
        let value = Value::from(json);
        let nested = value.as_map().unwrap().get("a").unwrap();
        assert_eq!(nested.as_map().unwrap().get("b").unwrap().type_name(), "list");
    }
}
