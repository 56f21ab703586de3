// system-tests/tests/resume_recovery.rs
// ============================================================================
// Scenario: Resume Recovery
// Description: Simulates a crashed run that left three rows already read
// from the source and recorded in the Landscape, but never walked past it,
// then resumes the same graph and asserts every row is recovered from its
// stored payload and delivered to the sink.
// Purpose: Exercises `Orchestrator::resume`'s five-step procedure --
// `ResumeDriver::resolve`'s hash checks, the `NullSource` swap,
// `prepare_sink_for_resume`, and `Recorder::find_incomplete_rows` driving
// reconstruction from `retrieve_payload`.
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

mod support;

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;

use elspeth_core::ArtifactDescriptor;
use elspeth_core::Determinism;
use elspeth_core::HashAlgorithm;
use elspeth_core::HashDigest;
use elspeth_core::NodeType;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaMode;
use elspeth_core::Sink;
use elspeth_core::SinkError;
use elspeth_core::SystemClock;
use elspeth_core::TransformResult;
use elspeth_core::Value;
use elspeth_graph::GraphBuilder;
use elspeth_graph::SinkSpec;
use elspeth_graph::SourceSpec;
use elspeth_graph::TransformSpec;
use elspeth_landscape::Database;
use elspeth_landscape::LandscapeConfig;
use elspeth_landscape::Recorder;
use elspeth_landscape::TokenManager;
use elspeth_orchestrator::reference::ChannelSink;
use elspeth_orchestrator::reference::InlineSource;
use elspeth_orchestrator::reference::MapTransform;
use elspeth_orchestrator::Orchestrator;
use elspeth_orchestrator::PipelinePlugins;
use elspeth_orchestrator::RunOutcome;
use elspeth_store::MemoryPayloadStore;
use elspeth_store::PayloadStore;

use support::dummy_descriptor;

/// A sink wrapping [`ChannelSink`]'s forwarding behavior but declaring
/// resume support, which no reference plugin needs outside this scenario.
struct ResumableChannelSink {
    inner: ChannelSink,
}

impl ResumableChannelSink {
    fn channel(name: &str) -> (Self, mpsc::Receiver<RowData>) {
        let (inner, receiver) = ChannelSink::channel(name);
        (Self { inner }, receiver)
    }
}

impl Sink for ResumableChannelSink {
    fn write(&mut self, rows: &[RowData], ctx: &PluginContext<'_>) -> Result<ArtifactDescriptor, SinkError> {
        self.inner.write(rows, ctx)
    }

    fn supports_resume(&self) -> bool {
        true
    }

    fn configure_for_resume(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[test]
fn resume_redelivers_every_row_stuck_mid_crash() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).expect("open landscape"));
    let store = Arc::new(MemoryPayloadStore::new());
    let clock = Arc::new(SystemClock);
    let recorder = Arc::new(Recorder::new(
        Arc::clone(&db),
        Some(Arc::clone(&store) as Arc<dyn PayloadStore>),
        clock.clone() as Arc<dyn elspeth_core::Clock>,
    ));
    let token_manager = Arc::new(TokenManager::new(Arc::clone(&recorder)));

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

    let config_json = serde_json::json!({ "scenario": "resume_recovery" });
    let config_hash = elspeth_core::hashing::stable_hash(&config_json).expect("hash config");
    let topology_hash = graph.topology_hash().expect("hash topology");

    // Simulate the crashed process: a run begins, its source node is
    // registered (rows_table's foreign key needs it), and three rows are
    // read and persisted with their payloads -- but the crash happens
    // before any of them is walked past the source, so none ever reaches a
    // terminal token outcome.
    let run = recorder.begin_run(&config_json).expect("begin run");
    let run_id = run.run_id.clone();
    let source_node = recorder
        .register_node(
            &run_id,
            NodeType::Source,
            "inline_source",
            "0.1.0",
            Determinism::Deterministic,
            HashDigest::new(HashAlgorithm::Sha256, b"source"),
            Some(0),
            open.clone(),
            open.clone(),
        )
        .expect("register source node");

    for n in [1_i64, 2, 3] {
        token_manager
            .create_initial_token(&run_id, RowData::new().with_field("n", Value::Int(n)), &source_node.node_id, (n - 1) as u64)
            .expect("create initial token");
    }

    // Resume drives the same graph from scratch: a fresh source instance
    // (swapped for `NullSource` inside `resume`, only its schema contract
    // and default edge matter), a fresh transform, and a sink that
    // declares resume support.
    let source = InlineSource::new(Vec::new(), open.clone());
    let transform = MapTransform::new(open.clone(), open.clone(), |row: RowData| {
        let doubled = row.get("n").and_then(Value::as_int).unwrap_or(0) * 2;
        Ok(TransformResult::success(RowData::new().with_field("n", Value::Int(doubled))))
    });
    let (sink, receiver) = ResumableChannelSink::channel("out");

    let mut transforms = BTreeMap::new();
    transforms.insert("double".to_string(), elspeth_orchestrator::TransformKind::RowAtATime(Box::new(transform)));
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
        coalesce_executor: Arc::new(elspeth_coalesce::CoalesceExecutor::new(
            Arc::clone(&recorder),
            Arc::clone(&token_manager),
            clock.clone() as Arc<dyn elspeth_core::Clock>,
            Vec::new(),
        )),
        error_sink: None,
        descriptors,
    };

    let cursor = elspeth_checkpoint::Cursor {
        run_id: run_id.clone(),
        config_hash: config_hash.clone(),
        topology_hash: topology_hash.clone(),
        token_id: elspeth_core::TokenId::new("unused"),
        node_id: source_node.node_id.clone(),
        step_index: 0,
        sequence_number: 0,
        aggregation_state: serde_json::json!({}),
    };

    let orchestrator = Orchestrator::new(graph, Arc::clone(&recorder), Arc::clone(&token_manager), clock.clone() as Arc<dyn elspeth_core::Clock>);
    let result = orchestrator.resume(plugins, &config_json, &cursor).expect("resume succeeds");

    assert_eq!(result.run_id, run_id);
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.rows_processed, 3);
    assert_eq!(result.rows_succeeded, 3);
    assert_eq!(result.rows_failed, 0);

    let mut doubled: Vec<i64> = (0..3)
        .map(|_| receiver.recv_timeout(std::time::Duration::from_secs(5)).expect("sink received a recovered row"))
        .filter_map(|row| row.get("n").and_then(Value::as_int))
        .collect();
    doubled.sort_unstable();
    assert_eq!(doubled, vec![2, 4, 6]);

    // Every incomplete row is gone now that resume walked it to a terminal
    // outcome.
    assert!(recorder.find_incomplete_rows(&run_id).expect("query incomplete rows").is_empty());
}

#[test]
fn resume_rejects_a_config_hash_that_drifted_since_the_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).expect("open landscape"));
    let clock = Arc::new(SystemClock);
    let recorder = Arc::new(Recorder::new(Arc::clone(&db), None, clock.clone() as Arc<dyn elspeth_core::Clock>));
    let token_manager = Arc::new(TokenManager::new(Arc::clone(&recorder)));

    let open = SchemaContract::open(SchemaMode::Dynamic);
    let graph = GraphBuilder::from_plugin_instances(
        SourceSpec { id: "source".to_string(), output_schema: open.clone() },
        Vec::new(),
        vec![SinkSpec { id: "sink".to_string(), input_schema: open.clone() }],
        Vec::new(),
        Vec::new(),
        Vec::new(),
        "sink",
    )
    .expect("graph builds");
    graph.validate().expect("graph validates");

    let original_config = serde_json::json!({ "scenario": "resume_recovery", "version": 1 });
    let run = recorder.begin_run(&original_config).expect("begin run");

    let drifted_config = serde_json::json!({ "scenario": "resume_recovery", "version": 2 });
    let topology_hash = graph.topology_hash().expect("hash topology");

    let cursor = elspeth_checkpoint::Cursor {
        run_id: run.run_id.clone(),
        config_hash: elspeth_core::hashing::stable_hash(&original_config).expect("hash original config"),
        topology_hash: topology_hash.clone(),
        token_id: elspeth_core::TokenId::new("unused"),
        node_id: elspeth_core::NodeId::new("source"),
        step_index: 0,
        sequence_number: 0,
        aggregation_state: serde_json::json!({}),
    };

    let source = InlineSource::new(Vec::new(), open.clone());
    let (sink, _receiver) = ChannelSink::channel("out");
    let mut sinks = BTreeMap::new();
    sinks.insert("sink".to_string(), Box::new(sink) as Box<dyn elspeth_core::Sink>);

    let mut descriptors = BTreeMap::new();
    descriptors.insert("source".to_string(), dummy_descriptor("inline_source", Some(0), b"source"));
    descriptors.insert("sink".to_string(), dummy_descriptor("channel_sink", Some(1), b"sink"));

    let plugins = PipelinePlugins {
        source_node_id: "source".to_string(),
        source: Box::new(source),
        transforms: BTreeMap::new(),
        gates: BTreeMap::new(),
        aggregations: BTreeMap::new(),
        sinks,
        coalesce_executor: Arc::new(elspeth_coalesce::CoalesceExecutor::new(
            Arc::clone(&recorder),
            Arc::clone(&token_manager),
            clock.clone() as Arc<dyn elspeth_core::Clock>,
            Vec::new(),
        )),
        error_sink: None,
        descriptors,
    };

    let orchestrator = Orchestrator::new(graph, Arc::clone(&recorder), Arc::clone(&token_manager), clock.clone() as Arc<dyn elspeth_core::Clock>);
    // Pass `drifted_config` as the *current* settings while the cursor still
    // carries the original hash: `ResumeDriver::resolve` must refuse.
    let error = orchestrator.resume(plugins, &drifted_config, &cursor).expect_err("drifted config must be rejected");
    let message = error.to_string();
    assert!(message.contains("config hash mismatch"), "unexpected error: {message}");
}
