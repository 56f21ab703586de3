// system-tests/tests/quorum_not_met.rs
// ============================================================================
// Scenario: Quorum Not Met
// Description: A `Quorum(2)` coalesce whose row only ever sees one branch
// arrive; the run ends with the merge still pending.
// Purpose: Exercises `CoalesceExecutor::flush_pending`'s `quorum_not_met`
// failure path, reached via `Orchestrator::run`'s step 4 flush.
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use elspeth_coalesce::CoalescePolicy;
use elspeth_coalesce::CoalesceSettings;
use elspeth_coalesce::MergeStrategy;
use elspeth_core::RoutingAction;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaMode;
use elspeth_core::Value;
use elspeth_gate::ConditionExpr;
use elspeth_gate::ConditionGate;
use elspeth_gate::GateRule;
use elspeth_graph::CoalesceSpec;
use elspeth_graph::GateRoute;
use elspeth_graph::GateSpec;
use elspeth_graph::GraphBuilder;
use elspeth_graph::SinkSpec;
use elspeth_graph::SourceSpec;
use elspeth_orchestrator::reference::ChannelSink;
use elspeth_orchestrator::reference::InlineSource;
use elspeth_orchestrator::Orchestrator;
use elspeth_orchestrator::PipelinePlugins;
use elspeth_orchestrator::RunOutcome;

use support::dummy_descriptor;
use support::Harness;

#[test]
fn flush_fails_the_row_once_the_source_ends_without_quorum() {
    let harness = Harness::new();
    let open = SchemaContract::open(SchemaMode::Dynamic);

    let graph = GraphBuilder::from_plugin_instances(
        SourceSpec { id: "source".to_string(), output_schema: open.clone() },
        Vec::new(),
        vec![SinkSpec { id: "sink".to_string(), input_schema: open.clone() }],
        Vec::new(),
        vec![GateSpec {
            id: "fork".to_string(),
            after: "source".to_string(),
            routes: vec![GateRoute { label: "branch_a".to_string(), destination: "merge".to_string(), mode: elspeth_core::EdgeMode::Move }],
        }],
        vec![CoalesceSpec {
            id: "merge".to_string(),
            branches: vec!["branch_a".to_string(), "branch_b".to_string()],
            output_schema: open.clone(),
            emit_to: "sink".to_string(),
        }],
        "sink",
    )
    .expect("graph builds");
    graph.validate().expect("graph validates");

    let rows = vec![RowData::new().with_field("n", Value::Int(1))];
    let source = InlineSource::new(rows, open.clone());
    // Always routes to `branch_a` alone; `branch_b` never arrives.
    let gate = ConditionGate::new(vec![GateRule::new(ConditionExpr::literal(Value::Bool(true)), RoutingAction::RouteTo(vec!["branch_a".to_string()]))]);
    let (sink, receiver) = ChannelSink::channel("out");

    let mut gates = BTreeMap::new();
    gates.insert("fork".to_string(), Box::new(gate) as Box<dyn elspeth_core::Gate>);
    let mut sinks = BTreeMap::new();
    sinks.insert("sink".to_string(), Box::new(sink) as Box<dyn elspeth_core::Sink>);

    let coalesce_settings = vec![CoalesceSettings {
        name: "merge".to_string(),
        branches: vec!["branch_a".to_string(), "branch_b".to_string()],
        policy: CoalescePolicy::Quorum(2),
        merge_strategy: MergeStrategy::Union,
        timeout: None,
    }];
    let coalesce_executor = Arc::new(elspeth_coalesce::CoalesceExecutor::new(
        Arc::clone(&harness.recorder),
        Arc::clone(&harness.token_manager),
        harness.clock.clone() as Arc<dyn elspeth_core::Clock>,
        coalesce_settings,
    ));

    let mut descriptors = BTreeMap::new();
    descriptors.insert("source".to_string(), dummy_descriptor("inline_source", Some(0), b"source"));
    descriptors.insert("fork".to_string(), dummy_descriptor("condition_gate", Some(1), b"fork"));
    descriptors.insert("merge".to_string(), dummy_descriptor("coalesce", Some(2), b"merge"));
    descriptors.insert("sink".to_string(), dummy_descriptor("channel_sink", Some(3), b"sink"));

    let plugins = PipelinePlugins {
        source_node_id: "source".to_string(),
        source: Box::new(source),
        transforms: BTreeMap::new(),
        gates,
        aggregations: BTreeMap::new(),
        sinks,
        coalesce_executor,
        error_sink: None,
        descriptors,
    };

    let orchestrator = Orchestrator::new(graph, Arc::clone(&harness.recorder), Arc::clone(&harness.token_manager), harness.clock.clone() as Arc<dyn elspeth_core::Clock>);
    let result = orchestrator.run(plugins, &serde_json::json!({"scenario": "quorum_not_met"})).expect("run succeeds");

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.rows_processed, 1);
    assert_eq!(result.rows_succeeded, 0);
    assert_eq!(result.rows_failed, 1);
    assert!(receiver.try_recv().is_err(), "the sink should never see a row that never reached quorum");
}
