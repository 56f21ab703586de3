// crates/elspeth-orchestrator/src/reference/inline_source.rs
// ============================================================================
// Module: Inline Source
// Description: Replays a fixed, in-memory list of rows.
// Purpose: Reference `Source` for system tests and simple embedded configs
// that do not need a real file/HTTP backend.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! [`InlineSource`] holds its entire row set in memory and gives them back
//! one at a time in order. It supports resume: [`Source::field_resolution`]
//! reports the number of rows already yielded, and
//! [`Source::configure_for_resume`] skips that many rows before the next
//! call to [`Source::next_row`].

use std::collections::VecDeque;

use elspeth_core::FieldResolution;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::Source;
use elspeth_core::SourceError;

const RESUME_FIELD: &str = "rows_yielded";

/// A [`Source`] backed by a fixed, in-memory row list.
#[derive(Debug, Clone)]
pub struct InlineSource {
    schema_contract: SchemaContract,
    on_success: String,
    remaining: VecDeque<RowData>,
    yielded: u64,
}

impl InlineSource {
    /// Builds an inline source over `rows`, declaring `schema_contract` and
    /// emitting rows on the `"continue"` edge.
    #[must_use]
    pub fn new(rows: Vec<RowData>, schema_contract: SchemaContract) -> Self {
        Self::with_on_success(rows, schema_contract, "continue")
    }

    /// Builds an inline source that emits rows on `on_success` instead of
    /// the default `"continue"` edge.
    #[must_use]
    pub fn with_on_success(rows: Vec<RowData>, schema_contract: SchemaContract, on_success: impl Into<String>) -> Self {
        Self {
            schema_contract,
            on_success: on_success.into(),
            remaining: rows.into(),
            yielded: 0,
        }
    }
}

impl Source for InlineSource {
    fn next_row(&mut self, _ctx: &PluginContext<'_>) -> Result<Option<RowData>, SourceError> {
        let Some(row) = self.remaining.pop_front() else {
            return Ok(None);
        };
        self.yielded += 1;
        Ok(Some(row))
    }

    fn schema_contract(&self) -> SchemaContract {
        self.schema_contract.clone()
    }

    fn field_resolution(&self) -> FieldResolution {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert(RESUME_FIELD.to_string(), self.yielded.to_string());
        FieldResolution { fields }
    }

    fn on_success(&self) -> &str {
        &self.on_success
    }

    fn supports_resume(&self) -> bool {
        true
    }

    fn configure_for_resume(&mut self, resolution: &FieldResolution) -> Result<(), SourceError> {
        let already_yielded = resolution
            .fields
            .get(RESUME_FIELD)
            .ok_or_else(|| SourceError::ResumeUnsupported(format!("missing '{RESUME_FIELD}' field resolution hint")))?
            .parse::<usize>()
            .map_err(|err| SourceError::ResumeUnsupported(format!("invalid '{RESUME_FIELD}' value: {err}")))?;
        for _ in 0..already_yielded {
            if self.remaining.pop_front().is_none() {
                break;
            }
        }
        self.yielded = already_yielded as u64;
        Ok(())
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
    use elspeth_core::SchemaMode;
    use elspeth_core::Value;

    use super::*;

    fn ctx() -> (elspeth_core::RunId, elspeth_core::NodeId, elspeth_core::SystemClock) {
        (elspeth_core::RunId::new("run-1"), elspeth_core::NodeId::new("node-1"), elspeth_core::SystemClock)
    }

    #[test]
    fn yields_rows_in_order_then_ends() {
        let rows = vec![RowData::new().with_field("n", Value::Int(1)), RowData::new().with_field("n", Value::Int(2))];
        let mut source = InlineSource::new(rows, SchemaContract::open(SchemaMode::Dynamic));
        let (run_id, node_id, clock) = ctx();
        let plugin_ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };

        let first = source.next_row(&plugin_ctx).unwrap().unwrap();
        assert_eq!(first.get("n"), Some(&Value::Int(1)));
        let second = source.next_row(&plugin_ctx).unwrap().unwrap();
        assert_eq!(second.get("n"), Some(&Value::Int(2)));
        assert_eq!(source.next_row(&plugin_ctx).unwrap(), None);
    }

    #[test]
    fn resume_skips_already_yielded_rows() {
        let rows = vec![RowData::new().with_field("n", Value::Int(1)), RowData::new().with_field("n", Value::Int(2)), RowData::new().with_field("n", Value::Int(3))];
        let mut source = InlineSource::new(rows, SchemaContract::open(SchemaMode::Dynamic));
        let (run_id, node_id, clock) = ctx();
        let plugin_ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };

        source.next_row(&plugin_ctx).unwrap();
        let resolution = source.field_resolution();

        let mut resumed = InlineSource::new(
            vec![RowData::new().with_field("n", Value::Int(1)), RowData::new().with_field("n", Value::Int(2)), RowData::new().with_field("n", Value::Int(3))],
            SchemaContract::open(SchemaMode::Dynamic),
        );
        resumed.configure_for_resume(&resolution).unwrap();
        let next = resumed.next_row(&plugin_ctx).unwrap().unwrap();
        assert_eq!(next.get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn resume_without_hint_is_rejected() {
        let mut source = InlineSource::new(Vec::new(), SchemaContract::open(SchemaMode::Dynamic));
        let err = source.configure_for_resume(&FieldResolution::default()).unwrap_err();
        assert!(matches!(err, SourceError::ResumeUnsupported(_)));
    }
}
