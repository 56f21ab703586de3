// system-tests/tests/gate_routing.rs
// ============================================================================
// Scenario: Gate Routing
// Description: Source -> gate -> one of two sinks, chosen by a field
// threshold.
// Purpose: Exercises `ConditionGate`/`RoutingAction::RouteTo` resolving to a
// single-destination move edge, end to end through the orchestrator.
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use elspeth_core::RoutingAction;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaMode;
use elspeth_core::Value;
use elspeth_gate::ConditionExpr;
use elspeth_gate::ConditionGate;
use elspeth_gate::GateRule;
use elspeth_graph::GateRoute;
use elspeth_graph::GateSpec;
use elspeth_graph::GraphBuilder;
use elspeth_graph::SinkSpec;
use elspeth_graph::SourceSpec;
use elspeth_orchestrator::reference::ChannelSink;
use elspeth_orchestrator::reference::InlineSource;
use elspeth_orchestrator::Orchestrator;
use elspeth_orchestrator::PipelinePlugins;

use support::dummy_descriptor;
use support::Harness;

#[test]
fn routes_high_value_rows_away_from_the_default_sink() {
    let harness = Harness::new();
    let open = SchemaContract::open(SchemaMode::Dynamic);

    let graph = GraphBuilder::from_plugin_instances(
        SourceSpec { id: "source".to_string(), output_schema: open.clone() },
        Vec::new(),
        vec![
            SinkSpec { id: "low".to_string(), input_schema: open.clone() },
            SinkSpec { id: "high".to_string(), input_schema: open.clone() },
        ],
        Vec::new(),
        vec![GateSpec {
            id: "threshold".to_string(),
            after: "source".to_string(),
            routes: vec![
                GateRoute { label: "high".to_string(), destination: "high".to_string(), mode: elspeth_core::EdgeMode::Move },
                GateRoute { label: elspeth_graph::CONTINUE_LABEL.to_string(), destination: "low".to_string(), mode: elspeth_core::EdgeMode::Move },
            ],
        }],
        Vec::new(),
        "low",
    )
    .expect("graph builds");
    graph.validate().expect("graph validates");

    let rows = vec![RowData::new().with_field("value", Value::Int(1)), RowData::new().with_field("value", Value::Int(100))];
    let source = InlineSource::new(rows, open.clone());
    let gate = ConditionGate::new(vec![GateRule::new(
        ConditionExpr::Gt(Box::new(ConditionExpr::field("value")), Box::new(ConditionExpr::literal(Value::Int(10)))),
        RoutingAction::RouteTo(vec!["high".to_string()]),
    )]);
    let (low_sink, low_receiver) = ChannelSink::channel("low");
    let (high_sink, high_receiver) = ChannelSink::channel("high");

    let mut gates = BTreeMap::new();
    gates.insert("threshold".to_string(), Box::new(gate) as Box<dyn elspeth_core::Gate>);
    let mut sinks = BTreeMap::new();
    sinks.insert("low".to_string(), Box::new(low_sink) as Box<dyn elspeth_core::Sink>);
    sinks.insert("high".to_string(), Box::new(high_sink) as Box<dyn elspeth_core::Sink>);

    let mut descriptors = BTreeMap::new();
    descriptors.insert("source".to_string(), dummy_descriptor("inline_source", Some(0), b"source"));
    descriptors.insert("threshold".to_string(), dummy_descriptor("condition_gate", Some(1), b"threshold"));
    descriptors.insert("low".to_string(), dummy_descriptor("channel_sink", Some(2), b"low"));
    descriptors.insert("high".to_string(), dummy_descriptor("channel_sink", Some(2), b"high"));

    let plugins = PipelinePlugins {
        source_node_id: "source".to_string(),
        source: Box::new(source),
        transforms: BTreeMap::new(),
        gates,
        aggregations: BTreeMap::new(),
        sinks,
        coalesce_executor: harness.empty_coalesce_executor(),
        error_sink: None,
        descriptors,
    };

    let orchestrator = Orchestrator::new(graph, Arc::clone(&harness.recorder), Arc::clone(&harness.token_manager), harness.clock.clone() as Arc<dyn elspeth_core::Clock>);
    let result = orchestrator.run(plugins, &serde_json::json!({"scenario": "gate_routing"})).expect("run succeeds");

    assert_eq!(result.rows_processed, 2);
    assert_eq!(result.rows_succeeded, 2);

    let low_row = low_receiver.try_recv().expect("low sink received a row");
    assert_eq!(low_row.get("value"), Some(&Value::Int(1)));
    assert!(low_receiver.try_recv().is_err());

    let high_row = high_receiver.try_recv().expect("high sink received a row");
    assert_eq!(high_row.get("value"), Some(&Value::Int(100)));
    assert!(high_receiver.try_recv().is_err());
}
