// system-tests/tests/support/mod.rs
// ============================================================================
// Module: System Test Harness
// Description: Shared scaffolding for end-to-end pipeline scenarios --
// an in-memory Landscape, a recorder/token manager pair, and helpers for
// registering node descriptors.
// Dependencies: elspeth-core, elspeth-landscape, elspeth-coalesce, tempfile
// ============================================================================

#![allow(dead_code, reason = "Not every scenario test uses every harness helper.")]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only panic-based assertions are permitted.")]

use std::sync::Arc;

use elspeth_coalesce::CoalesceExecutor;
use elspeth_core::Determinism;
use elspeth_core::HashAlgorithm;
use elspeth_core::HashDigest;
use elspeth_core::SystemClock;
use elspeth_landscape::Database;
use elspeth_landscape::LandscapeConfig;
use elspeth_landscape::Recorder;
use elspeth_landscape::TokenManager;
use elspeth_orchestrator::pipeline::NodeDescriptor;

/// A freshly opened Landscape plus the recorder/token manager pair every
/// scenario drives a run through. Keeps the backing tempdir alive for the
/// harness's lifetime.
pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub recorder: Arc<Recorder>,
    pub token_manager: Arc<TokenManager>,
    pub clock: Arc<SystemClock>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).expect("open landscape"));
        let clock = Arc::new(SystemClock);
        let recorder = Arc::new(Recorder::new(Arc::clone(&db), None, clock.clone() as Arc<dyn elspeth_core::Clock>));
        let token_manager = Arc::new(TokenManager::new(Arc::clone(&recorder)));
        Self { _dir: dir, recorder, token_manager, clock }
    }

    /// An executor serving no coalesce nodes, for scenarios that don't fork.
    pub fn empty_coalesce_executor(&self) -> Arc<CoalesceExecutor> {
        Arc::new(CoalesceExecutor::new(Arc::clone(&self.recorder), Arc::clone(&self.token_manager), self.clock.clone() as Arc<dyn elspeth_core::Clock>, Vec::new()))
    }
}

/// A dummy but stable config hash for a reference plugin with no real
/// configuration surface, distinguished by `seed` so distinct plugins don't
/// collide.
pub fn dummy_descriptor(plugin_name: &str, position: Option<u32>, seed: &[u8]) -> NodeDescriptor {
    NodeDescriptor {
        plugin_name: plugin_name.to_string(),
        plugin_version: "0.1.0".to_string(),
        determinism: Determinism::Deterministic,
        config_hash: HashDigest::new(HashAlgorithm::Sha256, seed),
        position,
    }
}
