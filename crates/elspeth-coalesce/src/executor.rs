// crates/elspeth-coalesce/src/executor.rs
// ============================================================================
// Module: Coalesce Executor
// Description: Fork/join state machine merging parallel branches into one
// token, per `spec.md` §4.8.
// Purpose: Hold per-row arrival state across a bounded number of branches and
// resolve it into a merged token (or a typed failure) under one of four
// policies.
// Dependencies: elspeth-core, elspeth-landscape, crate::settings
// ============================================================================

//! ## Overview
//! One [`CoalesceExecutor`] instance serves every named coalesce node in a
//! run. Pending state is keyed by `(coalesce_name, row_id)`, matching the
//! contract exactly; `accept` is called once per arriving branch token,
//! `check_timeouts` is driven cooperatively by the orchestrator between
//! rows, and `flush_pending` drains everything still outstanding once the
//! source ends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use elspeth_core::Clock;
use elspeth_core::NodeId;
use elspeth_core::RowId;
use elspeth_core::RunId;
use elspeth_core::TokenOutcomeKind;
use elspeth_core::Value;
use elspeth_core::hashing::stable_hash;
use elspeth_landscape::LandscapeError;
use elspeth_landscape::NodeStateCompletion;
use elspeth_landscape::Recorder;
use elspeth_landscape::TokenInfo;
use elspeth_landscape::TokenManager;
use serde::Serialize;
use thiserror::Error;

use crate::settings::CoalescePolicy;
use crate::settings::CoalesceSettings;
use crate::settings::MergeStrategy;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by [`CoalesceExecutor`].
#[derive(Debug, Error)]
pub enum CoalesceError {
    /// No coalesce is registered under the given name.
    #[error("no coalesce registered under name: {0}")]
    UnknownCoalesce(String),
    /// A second arrival was observed for the same `(row_id, branch)` pair.
    ///
    /// Fatal: silently overwriting the first arrival would drop a token from
    /// the audit trail.
    #[error("duplicate arrival for coalesce {coalesce_name} row {row_id} branch {branch_name}")]
    DuplicateArrival {
        /// The coalesce the duplicate arrived at.
        coalesce_name: String,
        /// The row that arrived twice on the same branch.
        row_id: RowId,
        /// The branch name that arrived twice.
        branch_name: String,
    },
    /// A recorder operation failed while writing coalesce state.
    #[error(transparent)]
    Landscape(#[from] LandscapeError),
    /// Canonical hashing of a merged or arriving row failed.
    #[error(transparent)]
    Hashing(#[from] elspeth_core::HashError),
}

impl From<CoalesceError> for elspeth_core::EngineError {
    fn from(error: CoalesceError) -> Self {
        match error {
            CoalesceError::DuplicateArrival { .. } => Self::AuditIntegrity(error.to_string()),
            other => Self::CoalesceFailure(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// The result of an `accept`, `check_timeouts`, or `flush_pending` call.
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    /// The arrival is held, waiting for its policy to trigger.
    Buffered,
    /// A merge completed; `token` is the new child carrying the merged row.
    Merged {
        /// The merged child token.
        token: TokenInfo,
    },
    /// The pending merge resolved to a typed failure; no child token exists.
    Failed {
        /// The failure reason, matching the vocabulary in `spec.md` §4.8
        /// (`incomplete_branches`, `late_arrival_after_merge`,
        /// `select_branch_not_arrived`, `quorum_not_met`,
        /// `quorum_not_met_at_timeout`).
        reason: String,
    },
}

// ============================================================================
// SECTION: Pending State
// ============================================================================

/// One branch's recorded arrival at a pending coalesce.
#[derive(Clone)]
struct Arrival {
    branch_name: String,
    token: TokenInfo,
    state_id: elspeth_core::StateId,
    offset_ms: u64,
}

/// Accumulated arrivals for one `(coalesce_name, row_id)` awaiting
/// resolution.
#[derive(Clone)]
struct PendingMerge {
    step: u32,
    opened_at: elspeth_core::Timestamp,
    arrivals: Vec<Arrival>,
    resolved: bool,
}

/// Per-merge metadata persisted on the completed node states' side, so
/// lineage queries can explain exactly what a coalesce did.
#[derive(Serialize)]
struct CoalesceContext {
    coalesce_context: CoalesceContextBody,
}

#[derive(Serialize)]
struct CoalesceContextBody {
    policy: String,
    merge_strategy: String,
    expected_branches: Vec<String>,
    arrived_branches: Vec<String>,
    arrival_offsets_ms: BTreeMap<String, u64>,
    total_wait_ms: u64,
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Merges parallel branches back into a single token under one of four
/// policies, per `spec.md` §4.8.
pub struct CoalesceExecutor {
    recorder: Arc<Recorder>,
    token_manager: Arc<TokenManager>,
    clock: Arc<dyn Clock>,
    settings: BTreeMap<String, CoalesceSettings>,
    pending: Mutex<HashMap<(String, RowId), PendingMerge>>,
}

impl CoalesceExecutor {
    /// Creates an executor serving the given named coalesce registrations.
    #[must_use]
    pub fn new(recorder: Arc<Recorder>, token_manager: Arc<TokenManager>, clock: Arc<dyn Clock>, settings: Vec<CoalesceSettings>) -> Self {
        let settings = settings.into_iter().map(|entry| (entry.name.clone(), entry)).collect();
        Self { recorder, token_manager, clock, settings, pending: Mutex::new(HashMap::new()) }
    }

    /// Records one branch's arrival for a row at a named coalesce.
    ///
    /// # Errors
    ///
    /// Returns [`CoalesceError::UnknownCoalesce`] if `coalesce_name` was not
    /// registered, [`CoalesceError::DuplicateArrival`] if the same branch has
    /// already arrived for this row, or a wrapped recorder/hashing error.
    pub fn accept(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        coalesce_name: &str,
        incoming: &TokenInfo,
        branch_name: &str,
        step: u32,
    ) -> Result<AcceptOutcome, CoalesceError> {
        let settings = self.settings.get(coalesce_name).ok_or_else(|| CoalesceError::UnknownCoalesce(coalesce_name.to_string()))?.clone();
        let now = self.clock.now();
        let input_hash = stable_hash(&incoming.row_data)?;

        let key = (coalesce_name.to_string(), incoming.row_id.clone());
        let mut guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(existing) = guard.get(&key) {
            if existing.resolved || existing.arrivals.iter().any(|arrival| arrival.branch_name == branch_name) {
                if existing.arrivals.iter().any(|arrival| arrival.branch_name == branch_name) && !existing.resolved {
                    return Err(CoalesceError::DuplicateArrival {
                        coalesce_name: coalesce_name.to_string(),
                        row_id: incoming.row_id.clone(),
                        branch_name: branch_name.to_string(),
                    });
                }
                drop(guard);
                let state_id = self.recorder.begin_node_state(run_id, &incoming.token_id, node_id, step, 0, input_hash)?.state_id;
                return self.fail_single_late_arrival(run_id, incoming, &state_id);
            }
        }

        let entry = guard.entry(key.clone()).or_insert_with(|| PendingMerge { step, opened_at: now, arrivals: Vec::new(), resolved: false });
        drop(guard);

        let state = self.recorder.begin_node_state(run_id, &incoming.token_id, node_id, step, 0, input_hash)?;

        let mut guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let pending = guard.get_mut(&key).ok_or_else(|| CoalesceError::UnknownCoalesce(coalesce_name.to_string()))?;
        let offset_ms = now.saturating_millis_since(pending.opened_at);
        pending.arrivals.push(Arrival { branch_name: branch_name.to_string(), token: incoming.clone(), state_id: state.state_id, offset_ms });

        let should_resolve = match settings.policy {
            CoalescePolicy::RequireAll => pending.arrivals.len() >= settings.branches.len(),
            CoalescePolicy::First => true,
            CoalescePolicy::Quorum(n) => pending.arrivals.len() >= n as usize,
            CoalescePolicy::BestEffort => false,
        };

        if !should_resolve {
            drop(guard);
            return Ok(AcceptOutcome::Buffered);
        }

        // `first` resolves on its first arrival, but further branches for the
        // same row can still land afterward; keep the entry (marked resolved)
        // so they hit the late-arrival path above instead of starting a fresh
        // merge. Every other policy only ever resolves once every branch it
        // waits for has arrived, so there is nothing left to arrive late.
        let pending = if matches!(settings.policy, CoalescePolicy::First) {
            let resolved = guard.get_mut(&key).ok_or_else(|| CoalesceError::UnknownCoalesce(coalesce_name.to_string()))?;
            resolved.resolved = true;
            resolved.clone()
        } else {
            guard.remove(&key).ok_or_else(|| CoalesceError::UnknownCoalesce(coalesce_name.to_string()))?
        };
        drop(guard);

        if matches!(settings.policy, CoalescePolicy::First) {
            if let MergeStrategy::Select(ref target) = settings.merge_strategy {
                let first = pending.arrivals.first().map(|arrival| arrival.branch_name.as_str());
                if first != Some(target.as_str()) {
                    return self.resolve_failure(run_id, coalesce_name, &key.1, &settings, pending, "select_branch_not_arrived");
                }
            }
        }

        self.resolve_merge(run_id, coalesce_name, &key.1, &settings, pending)
    }

    /// Resolves pending merges for one named coalesce whose timeout has
    /// elapsed.
    ///
    /// # Errors
    ///
    /// Returns a wrapped recorder/hashing error if a resolution fails to
    /// write its audit records.
    pub fn check_timeouts(&self, run_id: &RunId, coalesce_name: &str) -> Result<Vec<AcceptOutcome>, CoalesceError> {
        let settings = self.settings.get(coalesce_name).ok_or_else(|| CoalesceError::UnknownCoalesce(coalesce_name.to_string()))?.clone();
        let Some(timeout) = settings.timeout else {
            return Ok(Vec::new());
        };
        let now = self.clock.now();
        let due_rows = self.due_rows(coalesce_name, now, timeout);

        let mut outcomes = Vec::new();
        for row_id in due_rows {
            let key = (coalesce_name.to_string(), row_id.clone());
            let mut guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(pending) = guard.remove(&key) else { continue };
            drop(guard);
            outcomes.push(self.resolve_at_deadline(run_id, coalesce_name, &row_id, &settings, pending, true)?);
        }
        Ok(outcomes)
    }

    /// Drains every coalesce's outstanding pending merges at end-of-source.
    ///
    /// # Errors
    ///
    /// Returns a wrapped recorder/hashing error if a resolution fails to
    /// write its audit records.
    pub fn flush_pending(&self, run_id: &RunId) -> Result<Vec<(String, RowId, AcceptOutcome)>, CoalesceError> {
        let remaining: Vec<(String, RowId)> = {
            let guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.keys().cloned().collect()
        };

        let mut outcomes = Vec::new();
        for (coalesce_name, row_id) in remaining {
            let settings = self.settings.get(&coalesce_name).ok_or_else(|| CoalesceError::UnknownCoalesce(coalesce_name.clone()))?.clone();
            let mut guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(pending) = guard.remove(&(coalesce_name.clone(), row_id.clone())) else { continue };
            drop(guard);
            // Already resolved by a `first` merge on arrival; nothing left to
            // flush, and re-resolving would record its arrivals a second time.
            if pending.resolved {
                continue;
            }
            let outcome = self.resolve_at_deadline(run_id, &coalesce_name, &row_id, &settings, pending, false)?;
            outcomes.push((coalesce_name, row_id, outcome));
        }
        Ok(outcomes)
    }

    fn due_rows(&self, coalesce_name: &str, now: elspeth_core::Timestamp, timeout: Duration) -> Vec<RowId> {
        let guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .iter()
            .filter(|((name, _), pending)| {
                name == coalesce_name && !pending.resolved && now.saturating_millis_since(pending.opened_at) >= duration_millis(timeout)
            })
            .map(|((_, row_id), _)| row_id.clone())
            .collect()
    }

    /// Resolves one pending entry once its policy deadline fires (timeout or
    /// end-of-source), per policy: `best_effort` merges whatever arrived
    /// (failing `incomplete_branches` only when nothing arrived at all, per
    /// the resolved Open Question in `DESIGN.md`); `quorum` and `require_all`
    /// fail with the timeout- or end-of-source-specific reason.
    fn resolve_at_deadline(
        &self,
        run_id: &RunId,
        coalesce_name: &str,
        row_id: &RowId,
        settings: &CoalesceSettings,
        pending: PendingMerge,
        at_timeout: bool,
    ) -> Result<AcceptOutcome, CoalesceError> {
        match settings.policy {
            CoalescePolicy::BestEffort => {
                if pending.arrivals.is_empty() {
                    self.resolve_failure(run_id, coalesce_name, row_id, settings, pending, "incomplete_branches")
                } else {
                    self.resolve_merge(run_id, coalesce_name, row_id, settings, pending)
                }
            }
            CoalescePolicy::RequireAll => self.resolve_failure(run_id, coalesce_name, row_id, settings, pending, "incomplete_branches"),
            CoalescePolicy::Quorum(_) => {
                let reason = if at_timeout { "quorum_not_met_at_timeout" } else { "quorum_not_met" };
                self.resolve_failure(run_id, coalesce_name, row_id, settings, pending, reason)
            }
            CoalescePolicy::First => {
                if pending.arrivals.is_empty() {
                    self.resolve_failure(run_id, coalesce_name, row_id, settings, pending, "incomplete_branches")
                } else {
                    self.resolve_merge(run_id, coalesce_name, row_id, settings, pending)
                }
            }
        }
    }

    fn resolve_merge(
        &self,
        run_id: &RunId,
        coalesce_name: &str,
        _row_id: &RowId,
        settings: &CoalesceSettings,
        pending: PendingMerge,
    ) -> Result<AcceptOutcome, CoalesceError> {
        let merged_row = merge_rows(&settings.merge_strategy, &pending.arrivals)?;
        let merged_hash = stable_hash(&merged_row)?;

        let parent_tokens: Vec<TokenInfo> = pending.arrivals.iter().map(|arrival| arrival.token.clone()).collect();
        let child = self.token_manager.coalesce(&parent_tokens, merged_row, pending.step + 1)?;

        let context = coalesce_context(coalesce_name, settings, &pending);
        let context_json = serde_json::to_string(&context).unwrap_or_default();

        for arrival in &pending.arrivals {
            self.recorder.complete_node_state(
                &arrival.state_id,
                NodeStateCompletion::Completed { output_hash: merged_hash.clone(), context_after_json: Some(context_json.clone()) },
            )?;
            self.recorder.record_token_outcome(&arrival.token.token_id, run_id, TokenOutcomeKind::Coalesced, None)?;
        }

        Ok(AcceptOutcome::Merged { token: child })
    }

    fn resolve_failure(
        &self,
        run_id: &RunId,
        coalesce_name: &str,
        _row_id: &RowId,
        settings: &CoalesceSettings,
        pending: PendingMerge,
        reason: &str,
    ) -> Result<AcceptOutcome, CoalesceError> {
        let context = coalesce_context(coalesce_name, settings, &pending);
        let mut context_value = serde_json::to_value(&context).unwrap_or_default();
        if let serde_json::Value::Object(ref mut map) = context_value {
            map.insert("failure_reason".to_string(), serde_json::Value::String(reason.to_string()));
        }
        let error_json = serde_json::to_string(&context_value).unwrap_or_default();

        for arrival in &pending.arrivals {
            self.recorder.complete_node_state(&arrival.state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
            self.recorder.record_token_outcome(&arrival.token.token_id, run_id, TokenOutcomeKind::Failed, Some(error_json.clone()))?;
        }

        Ok(AcceptOutcome::Failed { reason: reason.to_string() })
    }

    fn fail_single_late_arrival(&self, run_id: &RunId, incoming: &TokenInfo, state_id: &elspeth_core::StateId) -> Result<AcceptOutcome, CoalesceError> {
        let error_json = serde_json::json!({ "failure_reason": "late_arrival_after_merge" }).to_string();
        self.recorder.complete_node_state(state_id, NodeStateCompletion::Failed { error_json: error_json.clone() })?;
        self.recorder.record_token_outcome(&incoming.token_id, run_id, TokenOutcomeKind::Failed, Some(error_json))?;
        Ok(AcceptOutcome::Failed { reason: "late_arrival_after_merge".to_string() })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn coalesce_context(_coalesce_name: &str, settings: &CoalesceSettings, pending: &PendingMerge) -> CoalesceContext {
    let arrival_offsets_ms: BTreeMap<String, u64> = pending.arrivals.iter().map(|arrival| (arrival.branch_name.clone(), arrival.offset_ms)).collect();
    let total_wait_ms = arrival_offsets_ms.values().copied().max().unwrap_or(0);
    CoalesceContext {
        coalesce_context: CoalesceContextBody {
            policy: policy_name(settings.policy),
            merge_strategy: merge_strategy_name(&settings.merge_strategy),
            expected_branches: settings.branches.clone(),
            arrived_branches: pending.arrivals.iter().map(|arrival| arrival.branch_name.clone()).collect(),
            arrival_offsets_ms,
            total_wait_ms,
        },
    }
}

fn policy_name(policy: CoalescePolicy) -> String {
    match policy {
        CoalescePolicy::RequireAll => "require_all".to_string(),
        CoalescePolicy::First => "first".to_string(),
        CoalescePolicy::Quorum(n) => format!("quorum({n})"),
        CoalescePolicy::BestEffort => "best_effort".to_string(),
    }
}

fn merge_strategy_name(strategy: &MergeStrategy) -> String {
    match strategy {
        MergeStrategy::Union => "union".to_string(),
        MergeStrategy::Nested => "nested".to_string(),
        MergeStrategy::Select(branch) => format!("select({branch})"),
    }
}

fn merge_rows(strategy: &MergeStrategy, arrivals: &[Arrival]) -> Result<elspeth_core::RowData, CoalesceError> {
    match strategy {
        MergeStrategy::Union => {
            let mut merged = elspeth_core::RowData::new();
            for arrival in arrivals {
                merged.merge_from(&arrival.token.row_data);
            }
            Ok(merged)
        }
        MergeStrategy::Nested => {
            let mut merged = elspeth_core::RowData::new();
            for arrival in arrivals {
                merged = merged.with_field(arrival.branch_name.clone(), Value::Map(arrival.token.row_data.fields().clone()));
            }
            Ok(merged)
        }
        MergeStrategy::Select(branch) => arrivals
            .iter()
            .find(|arrival| &arrival.branch_name == branch)
            .map(|arrival| arrival.token.row_data.clone())
            .ok_or_else(|| CoalesceError::UnknownCoalesce(format!("select target branch never arrived: {branch}"))),
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
    use elspeth_core::core::schema::SchemaContract;
    use elspeth_core::core::schema::SchemaMode;
    use elspeth_core::core::time::SystemClock;
    use elspeth_core::core::value::RowData;
    use elspeth_core::core::value::Value;
    use elspeth_core::Determinism;
    use elspeth_core::HashDigest;
    use elspeth_core::NodeType;
    use elspeth_landscape::Database;
    use elspeth_landscape::LandscapeConfig;
    use elspeth_landscape::TokenManager;

    use super::*;

    /// A fresh Landscape, recorder, and token manager, plus a registered
    /// source node and the coalesce node the fork's children report into.
    struct Fixture {
        _dir: tempfile::TempDir,
        recorder: Arc<Recorder>,
        token_manager: Arc<TokenManager>,
        run_id: RunId,
        source_node_id: NodeId,
        coalesce_node_id: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Arc::new(Database::open(&LandscapeConfig::new(dir.path().join("landscape.db"))).unwrap());
            let recorder = Arc::new(Recorder::new(db, None, Arc::new(SystemClock) as Arc<dyn Clock>));
            let run = recorder.begin_run(&serde_json::json!({})).unwrap();
            let open = SchemaContract::open(SchemaMode::Flexible);
            let source_node = recorder
                .register_node(
                    &run.run_id,
                    NodeType::Source,
                    "inline",
                    "0.1.0",
                    Determinism::Deterministic,
                    HashDigest::new(elspeth_core::HashAlgorithm::Sha256, b"source"),
                    Some(0),
                    open.clone(),
                    open.clone(),
                )
                .unwrap();
            let coalesce_node = recorder
                .register_node(
                    &run.run_id,
                    NodeType::Coalesce,
                    "coalesce",
                    "0.1.0",
                    Determinism::Deterministic,
                    HashDigest::new(elspeth_core::HashAlgorithm::Sha256, b"coalesce"),
                    Some(1),
                    open.clone(),
                    open,
                )
                .unwrap();
            let token_manager = Arc::new(TokenManager::new(Arc::clone(&recorder)));
            Self { _dir: dir, recorder, token_manager, run_id: run.run_id, source_node_id: source_node.node_id, coalesce_node_id: coalesce_node.node_id }
        }

        /// Forks a fresh row into one child token per branch name.
        fn fork_branches(&self, branches: &[&str], seed: i64) -> Vec<TokenInfo> {
            let row = RowData::new().with_field("seed", Value::Int(seed));
            let parent = self.token_manager.create_initial_token(&self.run_id, row, &self.source_node_id, 0).unwrap();
            let branch_names: Vec<String> = branches.iter().map(|name| (*name).to_string()).collect();
            self.token_manager.fork_token(&parent, &branch_names, 0).unwrap()
        }
    }

    fn settings(policy: CoalescePolicy, merge_strategy: MergeStrategy) -> CoalesceSettings {
        CoalesceSettings { name: "join".to_string(), branches: vec!["a".to_string(), "b".to_string()], policy, merge_strategy, timeout: None }
    }

    fn executor(fixture: &Fixture, settings: CoalesceSettings) -> CoalesceExecutor {
        CoalesceExecutor::new(Arc::clone(&fixture.recorder), Arc::clone(&fixture.token_manager), Arc::new(SystemClock) as Arc<dyn Clock>, vec![settings])
    }

    #[test]
    fn first_policy_merges_on_first_arrival_and_fails_the_late_one() {
        let fixture = Fixture::new();
        let exec = executor(&fixture, settings(CoalescePolicy::First, MergeStrategy::Union));
        let children = fixture.fork_branches(&["a", "b"], 1);

        let outcome = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[0], "a", 1).unwrap();
        assert!(matches!(outcome, AcceptOutcome::Merged { .. }));

        let late = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[1], "b", 1).unwrap();
        match late {
            AcceptOutcome::Failed { reason } => assert_eq!(reason, "late_arrival_after_merge"),
            other => panic!("expected a late-arrival failure, got {other:?}"),
        }
    }

    #[test]
    fn best_effort_merges_whatever_arrived_once_flushed() {
        let fixture = Fixture::new();
        let exec = executor(&fixture, settings(CoalescePolicy::BestEffort, MergeStrategy::Union));
        let children = fixture.fork_branches(&["a", "b"], 2);

        let outcome = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[0], "a", 1).unwrap();
        assert!(matches!(outcome, AcceptOutcome::Buffered));

        let flushed = exec.flush_pending(&fixture.run_id).unwrap();
        assert_eq!(flushed.len(), 1);
        match &flushed[0].2 {
            AcceptOutcome::Merged { token } => assert_eq!(token.row_data.get("seed").and_then(Value::as_int), Some(2)),
            other => panic!("expected a merge of the single arrival, got {other:?}"),
        }
    }

    #[test]
    fn require_all_fails_incomplete_branches_when_flushed_short_of_every_branch() {
        let fixture = Fixture::new();
        let exec = executor(&fixture, settings(CoalescePolicy::RequireAll, MergeStrategy::Union));
        let children = fixture.fork_branches(&["a", "b"], 9);

        let outcome = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[0], "a", 1).unwrap();
        assert!(matches!(outcome, AcceptOutcome::Buffered));

        let flushed = exec.flush_pending(&fixture.run_id).unwrap();
        assert_eq!(flushed.len(), 1);
        match &flushed[0].2 {
            AcceptOutcome::Failed { reason } => assert_eq!(reason, "incomplete_branches"),
            other => panic!("expected incomplete_branches, got {other:?}"),
        }
    }

    #[test]
    fn select_merge_strategy_copies_the_target_branchs_row_when_it_arrives_first() {
        let fixture = Fixture::new();
        let exec = executor(&fixture, settings(CoalescePolicy::First, MergeStrategy::Select("b".to_string())));
        let children = fixture.fork_branches(&["a", "b"], 3);

        let outcome = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[1], "b", 1).unwrap();
        match outcome {
            AcceptOutcome::Merged { token } => assert_eq!(token.row_data.get("seed").and_then(Value::as_int), Some(3)),
            other => panic!("expected a merge selecting branch b, got {other:?}"),
        }
    }

    #[test]
    fn select_merge_strategy_fails_when_the_wrong_branch_arrives_first() {
        let fixture = Fixture::new();
        let exec = executor(&fixture, settings(CoalescePolicy::First, MergeStrategy::Select("b".to_string())));
        let children = fixture.fork_branches(&["a", "b"], 4);

        let outcome = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[0], "a", 1).unwrap();
        match outcome {
            AcceptOutcome::Failed { reason } => assert_eq!(reason, "select_branch_not_arrived"),
            other => panic!("expected select_branch_not_arrived, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_arrival_on_the_same_branch_is_rejected() {
        let fixture = Fixture::new();
        let exec = executor(&fixture, settings(CoalescePolicy::RequireAll, MergeStrategy::Union));
        let children = fixture.fork_branches(&["a", "b"], 5);

        let outcome = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[0], "a", 1).unwrap();
        assert!(matches!(outcome, AcceptOutcome::Buffered));

        let error = exec.accept(&fixture.run_id, &fixture.coalesce_node_id, "join", &children[0], "a", 1).unwrap_err();
        match error {
            CoalesceError::DuplicateArrival { branch_name, .. } => assert_eq!(branch_name, "a"),
            other => panic!("expected DuplicateArrival, got {other:?}"),
        }
    }
}
