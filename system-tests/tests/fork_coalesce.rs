// system-tests/tests/fork_coalesce.rs
// ============================================================================
// Scenario: Fork/Coalesce (require_all)
// Description: Source -> gate forks every row onto two branches -> a
// `require_all` coalesce merges them (nested strategy) -> sink.
// Purpose: Exercises `RoutingAction::ForkTo`, `TokenManager::fork_token`,
// and `CoalesceExecutor`'s require-all merge path end to end.
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use elspeth_coalesce::CoalescePolicy;
use elspeth_coalesce::CoalesceSettings;
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

use support::dummy_descriptor;
use support::Harness;

#[test]
fn merges_both_branches_once_both_have_arrived() {
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
            routes: vec![
                GateRoute { label: "branch_a".to_string(), destination: "merge".to_string(), mode: elspeth_core::EdgeMode::Copy },
                GateRoute { label: "branch_b".to_string(), destination: "merge".to_string(), mode: elspeth_core::EdgeMode::Copy },
            ],
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

    let rows = vec![RowData::new().with_field("n", Value::Int(7))];
    let source = InlineSource::new(rows, open.clone());
    let gate = ConditionGate::new(vec![GateRule::new(
        ConditionExpr::literal(Value::Bool(true)),
        RoutingAction::ForkTo(vec!["branch_a".to_string(), "branch_b".to_string()]),
    )]);
    let (sink, receiver) = ChannelSink::channel("out");

    let mut gates = BTreeMap::new();
    gates.insert("fork".to_string(), Box::new(gate) as Box<dyn elspeth_core::Gate>);
    let mut sinks = BTreeMap::new();
    sinks.insert("sink".to_string(), Box::new(sink) as Box<dyn elspeth_core::Sink>);

    let coalesce_settings = vec![CoalesceSettings {
        name: "merge".to_string(),
        branches: vec!["branch_a".to_string(), "branch_b".to_string()],
        policy: CoalescePolicy::RequireAll,
        merge_strategy: elspeth_coalesce::MergeStrategy::Nested,
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
    let result = orchestrator.run(plugins, &serde_json::json!({"scenario": "fork_coalesce"})).expect("run succeeds");

    assert_eq!(result.rows_processed, 1);
    assert_eq!(result.rows_succeeded, 1);
    assert_eq!(result.rows_failed, 0);

    let merged = receiver.try_recv().expect("sink received the merged row");
    let Some(Value::Map(branch_a)) = merged.get("branch_a") else { panic!("branch_a missing or not a map") };
    let Some(Value::Map(branch_b)) = merged.get("branch_b") else { panic!("branch_b missing or not a map") };
    assert_eq!(branch_a.get("n"), Some(&Value::Int(7)));
    assert_eq!(branch_b.get("n"), Some(&Value::Int(7)));
}
