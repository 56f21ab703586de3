// crates/elspeth-orchestrator/src/reference/map_transform.rs
// ============================================================================
// Module: Map Transform
// Description: Wraps a closure as a row-at-a-time `Transform`.
// Purpose: Reference transform for system tests and simple configs that only
// need to reshape or filter a row without a real plugin backend.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! [`MapTransform`] adapts any `FnMut(RowData) -> TransformResult` into a
//! full [`Transform`]. The closure decides success, rejection, and fan-out
//! (`TransformResult::rows` may hold zero, one, or many rows); `MapTransform`
//! itself only carries the declared input/output schema contracts.

use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::Transform;
use elspeth_core::TransformError;
use elspeth_core::TransformResult;

/// A [`Transform`] that delegates row processing to a closure.
pub struct MapTransform<F>
where
    F: FnMut(RowData) -> Result<TransformResult, TransformError> + Send,
{
    input_schema: SchemaContract,
    output_schema: SchemaContract,
    map: F,
}

impl<F> MapTransform<F>
where
    F: FnMut(RowData) -> Result<TransformResult, TransformError> + Send,
{
    /// Builds a map transform from `map`, declaring `input_schema` and
    /// `output_schema`.
    #[must_use]
    pub fn new(input_schema: SchemaContract, output_schema: SchemaContract, map: F) -> Self {
        Self { input_schema, output_schema, map }
    }
}

impl<F> Transform for MapTransform<F>
where
    F: FnMut(RowData) -> Result<TransformResult, TransformError> + Send,
{
    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> Result<TransformResult, TransformError> {
        (self.map)(row)
    }

    fn input_schema(&self) -> SchemaContract {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> SchemaContract {
        self.output_schema.clone()
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

    #[test]
    fn applies_closure_to_each_row() {
        let mut transform = MapTransform::new(SchemaContract::open(SchemaMode::Dynamic), SchemaContract::open(SchemaMode::Dynamic), |row: RowData| {
            let doubled = row.get("n").and_then(elspeth_core::Value::as_int).unwrap_or(0) * 2;
            Ok(TransformResult::success(RowData::new().with_field("n", Value::Int(doubled))))
        });
        let run_id = elspeth_core::RunId::new("run-1");
        let node_id = elspeth_core::NodeId::new("node-1");
        let clock = elspeth_core::SystemClock;
        let ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };

        let result = transform.process(RowData::new().with_field("n", Value::Int(21)), &ctx).unwrap();
        assert_eq!(result.rows[0].get("n"), Some(&Value::Int(42)));
    }

    #[test]
    fn closure_can_reject() {
        let mut transform = MapTransform::new(SchemaContract::open(SchemaMode::Dynamic), SchemaContract::open(SchemaMode::Dynamic), |_row: RowData| Ok(TransformResult::rejected("always rejects")));
        let run_id = elspeth_core::RunId::new("run-1");
        let node_id = elspeth_core::NodeId::new("node-1");
        let clock = elspeth_core::SystemClock;
        let ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };

        let result = transform.process(RowData::new(), &ctx).unwrap();
        assert!(result.rows.is_empty());
    }
}
