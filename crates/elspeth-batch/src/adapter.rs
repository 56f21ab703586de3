// crates/elspeth-batch/src/adapter.rs
// ============================================================================
// Module: Batch Adapter
// Description: Wires the worker pool, AIMD controller, reorder buffer, and
// client cache into a concrete `elspeth_core::BatchTransform`.
// Purpose: `spec.md` §4.7: pipeline many rows concurrently across a fixed
// worker pool, retry transient failures under AIMD governance, and emit
// settled results in strict submission order.
// Dependencies: elspeth-core, std::thread, std::sync
// ============================================================================

//! ## Overview
//! [`BatchAdapter`] owns a fixed number of worker threads reading from one
//! shared channel. `accept` assigns each row a monotonically increasing
//! submission index, caches a per-row client, and hands the row to the
//! channel; it blocks once `max_pending` rows are in flight. A worker calls
//! [`crate::query::RowQuery::call`], retrying transient failures under
//! [`crate::aimd::AimdController`] governance until either the call succeeds,
//! fails permanently, or the row's retry budget is exhausted. Settled results
//! pass through [`crate::reorder::ReorderBuffer`] before reaching the output
//! port, so rows that finish out of order never escape out of order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use elspeth_core::BatchResult;
use elspeth_core::BatchTransform;
use elspeth_core::OutputPort;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::TransformError;

use crate::aimd::AimdController;
use crate::aimd::AimdRegistry;
use crate::client_cache::ClientCache;
use crate::query::QueryError;
use crate::query::RowQuery;
use crate::reorder::ReorderBuffer;

// ============================================================================
// SECTION: Submission
// ============================================================================

struct Submission<Q: RowQuery> {
    index: u64,
    row: RowData,
    client: Arc<Q::Client>,
}

// ============================================================================
// SECTION: Shared Worker State
// ============================================================================

struct Shared<Q: RowQuery> {
    query: Arc<Q>,
    aimd: Arc<AimdController>,
    max_capacity_retry: Duration,
    reorder: Mutex<ReorderBuffer<BatchResult>>,
    client_cache: Arc<ClientCache<Q::Client>>,
    output: Mutex<Option<Box<dyn OutputPort>>>,
    inflight: Mutex<usize>,
    drained: Condvar,
}

impl<Q: RowQuery> Shared<Q> {
    fn settle(&self, index: u64, result: Result<RowData, String>) {
        self.client_cache.remove(index);
        let ready = {
            let mut reorder = self.reorder.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            reorder.insert(index, BatchResult { submission_index: index, outcome: result })
        };
        {
            let output = self.output.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(port) = output.as_ref() {
                for (_, settled) in ready {
                    port.emit(settled);
                }
            }
        }
        let mut inflight = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *inflight = inflight.saturating_sub(1);
        self.drained.notify_all();
    }

    fn run_query(&self, row: RowData, client: &Q::Client) -> Result<RowData, String> {
        let start = Instant::now();
        loop {
            match self.query.call(row.clone(), client) {
                Ok(output) => {
                    self.aimd.on_success();
                    return Ok(output);
                }
                Err(err) if err.is_retryable() => {
                    self.aimd.on_retryable_failure();
                    if start.elapsed() >= self.max_capacity_retry {
                        return Err(format!("query_failed: retry budget exhausted: {err}"));
                    }
                    thread::sleep(self.aimd.backoff_delay());
                }
                Err(err) => return Err(format!("query_failed: {err}")),
            }
        }
    }
}

// ============================================================================
// SECTION: Batch Adapter
// ============================================================================

/// A [`BatchTransform`] that pipelines rows across a fixed worker pool under
/// AIMD concurrency governance, preserving FIFO output order.
///
/// `Q` describes the per-row work; `BatchAdapter` supplies everything else:
/// pooling, retry, backpressure, client lifecycle, and reordering.
pub struct BatchAdapter<Q: RowQuery + 'static> {
    shared: Arc<Shared<Q>>,
    sender: Option<mpsc::Sender<Submission<Q>>>,
    workers: Vec<JoinHandle<()>>,
    next_submission_index: u64,
    pool_size: usize,
    max_pending: usize,
}

impl<Q: RowQuery + 'static> BatchAdapter<Q> {
    /// Creates a new adapter. `pool_size` workers process rows concurrently;
    /// `max_concurrency` bounds the AIMD controller's recovery ceiling for
    /// `query`'s endpoint scope; `max_capacity_retry` is the wall-clock
    /// budget a single row may spend retrying before it fails with
    /// `query_failed`.
    #[must_use]
    pub fn new(query: Q, pool_size: usize, max_concurrency: u32, max_capacity_retry: Duration) -> Self {
        let query = Arc::new(query);
        let registry = AimdRegistry::new(max_concurrency.min(pool_size.max(1) as u32), max_concurrency);
        let aimd = registry.scope(query.endpoint_scope());
        let shared = Arc::new(Shared {
            query,
            aimd,
            max_capacity_retry,
            reorder: Mutex::new(ReorderBuffer::new()),
            client_cache: Arc::new(ClientCache::new()),
            output: Mutex::new(None),
            inflight: Mutex::new(0),
            drained: Condvar::new(),
        });
        Self {
            shared,
            sender: None,
            workers: Vec::new(),
            next_submission_index: 0,
            pool_size: pool_size.max(1),
            max_pending: 1,
        }
    }

    fn spawn_workers(&mut self, receiver: mpsc::Receiver<Submission<Q>>) {
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..self.pool_size {
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&self.shared);
            let handle = thread::spawn(move || {
                loop {
                    let submission = {
                        let guard = receiver.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                        guard.recv()
                    };
                    let Ok(submission) = submission else { break };
                    let outcome = shared.run_query(submission.row, submission.client.as_ref());
                    shared.settle(submission.index, outcome);
                }
            });
            self.workers.push(handle);
        }
    }

    fn wait_until_drained(&self, timeout: Duration) -> bool {
        let guard = self.shared.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (guard, result) = self
            .shared
            .drained
            .wait_timeout_while(guard, timeout, |inflight| *inflight > 0)
            .unwrap_or_else(|poisoned| {
                let (guard, result) = poisoned.into_inner();
                (guard, result)
            });
        drop(guard);
        !result.timed_out()
    }
}

impl<Q: RowQuery + 'static> BatchTransform for BatchAdapter<Q> {
    fn on_start(&mut self, _ctx: &PluginContext<'_>) {
        let (sender, receiver) = mpsc::channel();
        self.sender = Some(sender);
        self.spawn_workers(receiver);
    }

    fn connect_output(&mut self, port: Box<dyn OutputPort>, max_pending: usize) {
        self.max_pending = max_pending.max(1);
        let mut output = self.shared.output.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *output = Some(port);
    }

    fn accept(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> Result<(), TransformError> {
        let Some(sender) = self.sender.clone() else {
            return Err(TransformError::Permanent("batch adapter not started".to_string()));
        };

        {
            let guard = self.shared.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let max_pending = self.max_pending;
            let mut guard = self
                .shared
                .drained
                .wait_while(guard, |inflight| *inflight >= max_pending)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += 1;
        }

        let index = self.next_submission_index;
        self.next_submission_index += 1;
        let query = Arc::clone(&self.shared.query);
        let client = self.shared.client_cache.get_or_create(index, || query.make_client());
        sender
            .send(Submission { index, row, client })
            .map_err(|_| TransformError::Permanent("batch adapter worker pool has shut down".to_string()))
    }

    fn flush_batch_processing(&mut self, timeout: std::time::Duration) -> Result<(), TransformError> {
        if self.wait_until_drained(timeout) {
            self.shared.client_cache.shrink_to_batch_scope();
            Ok(())
        } else {
            Err(TransformError::Permanent("flush timed out waiting for in-flight rows to settle".to_string()))
        }
    }

    fn close(&mut self) {
        self.sender = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
