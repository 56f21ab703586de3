// system-tests/tests/linear_pipeline.rs
// ============================================================================
// Scenario: Linear Pipeline
// Description: Source -> transform -> sink, no gates, forks, or coalesce.
// Purpose: Exercises the basic `Orchestrator::run` / `Dispatcher::dispatch`
// path end to end, including the row-dispatch fix made against the source's
// `on_success` edge.
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaMode;
use elspeth_core::TransformResult;
use elspeth_core::Value;
use elspeth_graph::GraphBuilder;
use elspeth_graph::SinkSpec;
use elspeth_graph::SourceSpec;
use elspeth_graph::TransformSpec;
use elspeth_orchestrator::reference::ChannelSink;
use elspeth_orchestrator::reference::InlineSource;
use elspeth_orchestrator::reference::MapTransform;
use elspeth_orchestrator::Orchestrator;
use elspeth_orchestrator::PipelinePlugins;
use elspeth_orchestrator::RunOutcome;
use elspeth_orchestrator::TransformKind;

use support::dummy_descriptor;
use support::Harness;

#[test]
fn doubles_every_row_and_delivers_it_to_the_sink() {
    let harness = Harness::new();
    let open = SchemaContract::open(SchemaMode::Dynamic);

    let graph = GraphBuilder::from_plugin_instances(
        SourceSpec { id: "source".to_string(), output_schema: open.clone() },
        vec![TransformSpec { id: "double".to_string(), input_schema: open.clone(), output_schema: open.clone() }],
        vec![SinkSpec { id: "sink".to_string(), input_schema: open.clone() }],
        Vec::new(),
        Vec::new(),
        Vec::new(),
        "sink",
    )
    .expect("graph builds");
    graph.validate().expect("graph validates");

    let rows = vec![
        RowData::new().with_field("n", Value::Int(1)),
        RowData::new().with_field("n", Value::Int(2)),
        RowData::new().with_field("n", Value::Int(3)),
    ];
    let source = InlineSource::new(rows, open.clone());
    let transform = MapTransform::new(open.clone(), open.clone(), |row: RowData| {
        let doubled = row.get("n").and_then(Value::as_int).unwrap_or(0) * 2;
        Ok(TransformResult::success(RowData::new().with_field("n", Value::Int(doubled))))
    });
    let (sink, receiver) = ChannelSink::channel("out");

    let mut transforms = BTreeMap::new();
    transforms.insert("double".to_string(), TransformKind::RowAtATime(Box::new(transform)));
    let mut sinks = BTreeMap::new();
    sinks.insert("sink".to_string(), Box::new(sink) as Box<dyn elspeth_core::Sink>);

    let mut descriptors = BTreeMap::new();
    descriptors.insert("source".to_string(), dummy_descriptor("inline_source", Some(0), b"source"));
    descriptors.insert("double".to_string(), dummy_descriptor("map_transform", Some(1), b"double"));
    descriptors.insert("sink".to_string(), dummy_descriptor("channel_sink", Some(2), b"sink"));

    let plugins = PipelinePlugins {
        source_node_id: "source".to_string(),
        source: Box::new(source),
        transforms,
        gates: BTreeMap::new(),
        aggregations: BTreeMap::new(),
        sinks,
        coalesce_executor: harness.empty_coalesce_executor(),
        error_sink: None,
        descriptors,
    };

    let orchestrator = Orchestrator::new(graph, Arc::clone(&harness.recorder), Arc::clone(&harness.token_manager), harness.clock.clone() as Arc<dyn elspeth_core::Clock>);

    let result = orchestrator.run(plugins, &serde_json::json!({"scenario": "linear_pipeline"})).expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.rows_processed, 3);
    assert_eq!(result.rows_succeeded, 3);
    assert_eq!(result.rows_failed, 0);

    let mut seen = Vec::new();
    while let Ok(row) = receiver.try_recv() {
        seen.push(row.get("n").and_then(Value::as_int).unwrap_or(-1));
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![2, 4, 6]);
}
