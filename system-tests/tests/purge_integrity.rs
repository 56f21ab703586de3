// system-tests/tests/purge_integrity.rs
// ============================================================================
// Scenario: Purge Integrity
// Description: Runs a full linear pipeline with a payload store attached,
// then sweeps payloads older than a cutoff.
// Purpose: Exercises the row-payload-persistence path end to end
// (`TokenManager::create_initial_token` -> `Recorder::store_payload`) and
// `PurgeManager::sweep` deleting blobs while leaving audit hashes intact.
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
use elspeth_landscape::Database;
use elspeth_landscape::LandscapeConfig;
use elspeth_landscape::PurgeManager;
use elspeth_landscape::Recorder;
use elspeth_landscape::TokenManager;
use elspeth_orchestrator::reference::ChannelSink;
use elspeth_orchestrator::reference::InlineSource;
use elspeth_orchestrator::reference::MapTransform;
use elspeth_orchestrator::Orchestrator;
use elspeth_orchestrator::PipelinePlugins;
use elspeth_store::MemoryPayloadStore;
use elspeth_store::PayloadStore;

use support::dummy_descriptor;

fn epoch_plus(seconds: i64) -> elspeth_core::Timestamp {
    elspeth_core::Timestamp::from_offset(time::OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds))
}

#[test]
fn sweep_removes_blobs_for_a_completed_run_but_leaves_audit_hashes_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).expect("open landscape"));
    let store = Arc::new(MemoryPayloadStore::new());
    let clock = Arc::new(elspeth_core::MockClock::new(epoch_plus(0)));
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

    let orchestrator = Orchestrator::new(graph, Arc::clone(&recorder), Arc::clone(&token_manager), clock.clone() as Arc<dyn elspeth_core::Clock>);
    let result = orchestrator.run(plugins, &serde_json::json!({"scenario": "purge_integrity"})).expect("run succeeds");
    assert_eq!(result.rows_succeeded, 3);
    for _ in 0..3 {
        receiver.try_recv().expect("sink received a row");
    }

    clock.advance(10 * 24 * 60 * 60 * 1000);

    let manager = PurgeManager::new(db.as_ref(), store.as_ref());
    let cutoff = epoch_plus(5 * 24 * 60 * 60);
    let report = manager.sweep(cutoff).expect("sweep succeeds");

    assert_eq!(report.deleted, 3, "every row's payload should have been written and now be eligible");
    assert_eq!(report.skipped, 0);
    for hash in &report.eligible {
        assert!(!store.exists(hash), "purged hash {hash:?} should no longer be retrievable");
    }

    let run_record = db.read_only_connection().expect("read-only connection");
    let row_count: i64 = run_record
        .query_row("SELECT COUNT(*) FROM rows_table WHERE run_id = ?1", rusqlite::params![result.run_id.as_str()], |row| row.get(0))
        .expect("rows_table still has every row");
    assert_eq!(row_count, 3, "audit metadata must survive purge even though the blobs are gone");
}
