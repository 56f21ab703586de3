// crates/elspeth-core/src/core/schema.rs
// ============================================================================
// Module: Elspeth Schema Contracts
// Description: Declared input/output schema for nodes and schema-mode validation.
// Purpose: Let graph validation check that upstream output covers downstream
// required fields without requiring full type inference.
// Dependencies: crate::core::value, serde
// ============================================================================

//! ## Overview
//! A node's declared schema is either `Fixed` (an explicit required field
//! list; extras are rejected) or one of `Flexible`/`Observed`/`Dynamic`
//! (open — the declared fields, if any, are advisory). Source schema
//! validation happens once per row at the point of entry; gate/transform
//! schema coverage is checked once at graph-validation time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::value::RowData;
use crate::core::value::Value;

// ============================================================================
// SECTION: Field Types
// ============================================================================

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Field must be `Value::Null`.
    Null,
    /// Field must be `Value::Bool`.
    Bool,
    /// Field must be `Value::Int`.
    Int,
    /// Field must be `Value::Float` (an `Int` also satisfies this).
    Float,
    /// Field must be `Value::String`.
    String,
    /// Field must be `Value::List`.
    List,
    /// Field must be `Value::Map`.
    Map,
    /// Field may hold any value, including `Null`.
    Any,
}

impl FieldType {
    /// Returns whether `value` satisfies this field type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::Int => matches!(value, Value::Int(_)),
            Self::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            Self::String => matches!(value, Value::String(_)),
            Self::List => matches!(value, Value::List(_)),
            Self::Map => matches!(value, Value::Map(_)),
        }
    }
}

/// A single declared field in a schema contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Declared field type.
    pub field_type: FieldType,
    /// Whether the field must be present.
    pub required: bool,
}

impl FieldSpec {
    /// Creates a required field spec.
    #[must_use]
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Creates an optional field spec.
    #[must_use]
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }
}

// ============================================================================
// SECTION: Schema Mode
// ============================================================================

/// The validation mode declared for a node's input or output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Required fields are listed exhaustively; extra fields are rejected.
    Fixed,
    /// Fields are advisory; extra and missing optional fields are allowed.
    Flexible,
    /// Schema is inferred by observing the first row; never checked again.
    Observed,
    /// Schema is open and never checked.
    Dynamic,
}

/// A node's declared schema contract.
///
/// # Invariants
/// - In `Fixed` mode, `fields` lists every accepted field; unknown fields
///   fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Schema mode.
    pub mode: SchemaMode,
    /// Declared fields (authoritative in `Fixed` mode, advisory otherwise).
    pub fields: Vec<FieldSpec>,
}

impl SchemaContract {
    /// Creates a fixed schema contract from field specs.
    #[must_use]
    pub fn fixed(fields: Vec<FieldSpec>) -> Self {
        Self {
            mode: SchemaMode::Fixed,
            fields,
        }
    }

    /// Creates an open schema contract of the given non-fixed mode.
    ///
    /// # Panics
    ///
    /// Panics if `mode` is `SchemaMode::Fixed`; use [`SchemaContract::fixed`]
    /// instead so the field list is never silently empty.
    #[must_use]
    pub fn open(mode: SchemaMode) -> Self {
        assert!(mode != SchemaMode::Fixed, "use SchemaContract::fixed for Fixed mode");
        Self {
            mode,
            fields: Vec::new(),
        }
    }

    /// Validates a row against this contract.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaValidationError`] when a required field is missing,
    /// a field has the wrong type, or (in `Fixed` mode) an undeclared field
    /// is present.
    pub fn validate(&self, row: &RowData) -> Result<(), SchemaValidationError> {
        match self.mode {
            SchemaMode::Observed | SchemaMode::Dynamic => Ok(()),
            SchemaMode::Flexible => self.validate_declared_fields(row),
            SchemaMode::Fixed => {
                self.validate_declared_fields(row)?;
                for key in row.fields().keys() {
                    if !self.fields.iter().any(|field| &field.name == key) {
                        return Err(SchemaValidationError::UnexpectedField {
                            field: key.clone(),
                        });
                    }
                }
                Ok(())
            }
        }
    }

    /// Returns the set of field names this contract declares as required.
    #[must_use]
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name.as_str())
            .collect()
    }

    /// Returns whether this contract's declared fields cover every field
    /// `downstream` requires. Used by graph validation to check that an
    /// upstream output schema satisfies a downstream input schema.
    #[must_use]
    pub fn covers(&self, downstream: &Self) -> bool {
        if matches!(self.mode, SchemaMode::Observed | SchemaMode::Dynamic) {
            return true;
        }
        downstream
            .required_fields()
            .iter()
            .all(|name| self.fields.iter().any(|field| &field.name == name))
    }

    fn validate_declared_fields(&self, row: &RowData) -> Result<(), SchemaValidationError> {
        for field in &self.fields {
            match row.get(&field.name) {
                None if field.required => {
                    return Err(SchemaValidationError::MissingField {
                        field: field.name.clone(),
                    });
                }
                None => {}
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        return Err(SchemaValidationError::WrongType {
                            field: field.name.clone(),
                            expected: field.field_type,
                            actual: value.type_name(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when a row fails schema validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaValidationError {
    /// A required field was absent.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },
    /// A field was present but had the wrong type.
    #[error("field {field} expected {expected:?}, got {actual}")]
    WrongType {
        /// Name of the mistyped field.
        field: String,
        /// Expected field type.
        expected: FieldType,
        /// Actual value type name observed.
        actual: &'static str,
    },
    /// A field was present but not declared in a `Fixed` schema.
    #[error("unexpected field in fixed schema: {field}")]
    UnexpectedField {
        /// Name of the undeclared field.
        field: String,
    },
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

    fn row_with(pairs: &[(&str, Value)]) -> RowData {
        let mut row = RowData::new();
        for (name, value) in pairs {
            row = row.with_field(*name, value.clone());
        }
        row
    }

    #[test]
    fn fixed_schema_rejects_unexpected_field() {
        let schema = SchemaContract::fixed(vec![FieldSpec::required("id", FieldType::Int)]);
        let row = row_with(&[("id", Value::Int(1)), ("extra", Value::Bool(true))]);
        assert_eq!(
            schema.validate(&row),
            Err(SchemaValidationError::UnexpectedField {
                field: "extra".to_string()
            })
        );
    }

    #[test]
    fn fixed_schema_rejects_missing_required_field() {
        let schema = SchemaContract::fixed(vec![FieldSpec::required("id", FieldType::Int)]);
        let row = RowData::new();
        assert!(matches!(
            schema.validate(&row),
            Err(SchemaValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn flexible_schema_allows_extra_fields() {
        let schema = SchemaContract {
            mode: SchemaMode::Flexible,
            fields: vec![FieldSpec::required("id", FieldType::Int)],
        };
        let row = row_with(&[("id", Value::Int(1)), ("extra", Value::Bool(true))]);
        assert_eq!(schema.validate(&row), Ok(()));
    }

    #[test]
    fn observed_schema_never_fails() {
        let schema = SchemaContract::open(SchemaMode::Observed);
        let row = row_with(&[("anything", Value::Null)]);
        assert_eq!(schema.validate(&row), Ok(()));
    }

    #[test]
    fn covers_checks_required_field_coverage() {
        let upstream = SchemaContract::fixed(vec![
            FieldSpec::required("id", FieldType::Int),
            FieldSpec::optional("note", FieldType::String),
        ]);
        let downstream = SchemaContract::fixed(vec![FieldSpec::required("id", FieldType::Int)]);
        assert!(upstream.covers(&downstream));

        let downstream_missing =
            SchemaContract::fixed(vec![FieldSpec::required("missing", FieldType::Int)]);
        assert!(!upstream.covers(&downstream_missing));
    }
}
