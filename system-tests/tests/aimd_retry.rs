// system-tests/tests/aimd_retry.rs
// ============================================================================
// Scenario: AIMD Retry
// Description: A batch transform node whose query fails with retryable
// server errors twice before succeeding.
// Purpose: Exercises `BatchAdapter`'s retry-under-AIMD-governance loop and
// `Dispatcher::drain_batch_settlements` reattaching a settled row to the
// graph walk.
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

mod support;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use elspeth_batch::BatchAdapter;
use elspeth_batch::QueryError;
use elspeth_batch::RowQuery;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaMode;
use elspeth_core::SystemClock;
use elspeth_core::Value;
use elspeth_graph::GraphBuilder;
use elspeth_graph::SinkSpec;
use elspeth_graph::SourceSpec;
use elspeth_graph::TransformSpec;
use elspeth_orchestrator::pipeline::BatchChannel;
use elspeth_orchestrator::reference::ChannelSink;
use elspeth_orchestrator::reference::InlineSource;
use elspeth_orchestrator::Orchestrator;
use elspeth_orchestrator::PipelinePlugins;
use elspeth_orchestrator::TransformKind;

use support::dummy_descriptor;
use support::Harness;

/// A [`RowQuery`] that fails its first two calls per row with a retryable
/// server error, then succeeds doubling the row's `n` field.
struct FlakyQuery {
    fails_before_success: usize,
}

impl RowQuery for FlakyQuery {
    type Client = AtomicUsize;

    fn make_client(&self) -> AtomicUsize {
        AtomicUsize::new(0)
    }

    fn call(&self, row: RowData, client: &AtomicUsize) -> Result<RowData, QueryError> {
        let attempt = client.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fails_before_success {
            return Err(QueryError::ServerError { status: 503 });
        }
        let n = row.get("n").and_then(Value::as_int).unwrap_or(0);
        Ok(RowData::new().with_field("n", Value::Int(n * 2)))
    }

    fn endpoint_scope(&self) -> &str {
        "flaky-endpoint"
    }
}

#[test]
fn settles_after_exhausting_its_retryable_failures() {
    let harness = Harness::new();
    let open = SchemaContract::open(SchemaMode::Dynamic);

    let graph = GraphBuilder::from_plugin_instances(
        SourceSpec { id: "source".to_string(), output_schema: open.clone() },
        vec![TransformSpec { id: "fetch".to_string(), input_schema: open.clone(), output_schema: open.clone() }],
        vec![SinkSpec { id: "sink".to_string(), input_schema: open.clone() }],
        Vec::new(),
        Vec::new(),
        Vec::new(),
        "sink",
    )
    .expect("graph builds");
    graph.validate().expect("graph validates");

    let source = InlineSource::new(vec![RowData::new().with_field("n", Value::Int(5))], open.clone());
    let (sink, receiver) = ChannelSink::channel("out");

    let mut adapter = BatchAdapter::new(FlakyQuery { fails_before_success: 2 }, 1, 4, Duration::from_secs(5));
    let channel = BatchChannel::new();
    adapter.connect_output(channel.port(), 4);

    let run_id = elspeth_core::RunId::new("setup");
    let node_id = elspeth_core::NodeId::new("fetch");
    let clock = SystemClock;
    let setup_ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };
    adapter.on_start(&setup_ctx);

    let mut transforms = BTreeMap::new();
    transforms.insert("fetch".to_string(), TransformKind::Batch(Box::new(adapter), channel));
    let mut sinks = BTreeMap::new();
    sinks.insert("sink".to_string(), Box::new(sink) as Box<dyn elspeth_core::Sink>);

    let mut descriptors = BTreeMap::new();
    descriptors.insert("source".to_string(), dummy_descriptor("inline_source", Some(0), b"source"));
    descriptors.insert("fetch".to_string(), dummy_descriptor("flaky_query", Some(1), b"fetch"));
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
    let result = orchestrator.run(plugins, &serde_json::json!({"scenario": "aimd_retry"})).expect("run succeeds");

    assert_eq!(result.rows_processed, 1);
    assert_eq!(result.rows_succeeded, 1);
    assert_eq!(result.rows_failed, 0);

    let settled = receiver.recv_timeout(Duration::from_secs(5)).expect("sink received the settled row");
    assert_eq!(settled.get("n"), Some(&Value::Int(10)));
}
