// crates/elspeth-orchestrator/src/reference/channel_sink.rs
// ============================================================================
// Module: Channel Sink
// Description: Hands written rows off to an `std::sync::mpsc` channel.
// Purpose: Reference sink for system tests to assert on written rows without
// a real file/HTTP backend. Per spec.md §5, no async runtime — plain
// `std::sync::mpsc`.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! [`ChannelSink`] sends every written row down an `mpsc::Sender<RowData>`,
//! one at a time, in write order. [`ChannelSink::channel`] builds a sink
//! paired with the `Receiver` a test drains. A closed receiver turns the
//! next [`Sink::write`] into [`SinkError::Write`] rather than panicking.

use std::sync::mpsc;

use elspeth_core::ArtifactDescriptor;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::Sink;
use elspeth_core::SinkError;

/// A [`Sink`] that forwards written rows to an `mpsc::Sender<RowData>`.
pub struct ChannelSink {
    uri: String,
    sender: mpsc::Sender<RowData>,
    total_written: u64,
}

impl ChannelSink {
    /// Builds a channel sink identified by `name`, plus the receiver a test
    /// drains to observe written rows.
    #[must_use]
    pub fn channel(name: impl Into<String>) -> (Self, mpsc::Receiver<RowData>) {
        let (sender, receiver) = mpsc::channel();
        let name = name.into();
        (
            Self {
                uri: format!("channel://{name}"),
                sender,
                total_written: 0,
            },
            receiver,
        )
    }
}

impl Sink for ChannelSink {
    fn write(&mut self, rows: &[RowData], _ctx: &PluginContext<'_>) -> Result<ArtifactDescriptor, SinkError> {
        for row in rows {
            self.sender.send(row.clone()).map_err(|err| SinkError::Write(err.to_string()))?;
        }
        self.total_written += rows.len() as u64;
        Ok(ArtifactDescriptor {
            uri: self.uri.clone(),
            rows_written: rows.len() as u64,
        })
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
    use elspeth_core::Value;

    use super::*;

    fn ctx() -> (elspeth_core::RunId, elspeth_core::NodeId, elspeth_core::SystemClock) {
        (elspeth_core::RunId::new("run-1"), elspeth_core::NodeId::new("node-1"), elspeth_core::SystemClock)
    }

    #[test]
    fn forwards_written_rows_to_the_receiver() {
        let (mut sink, receiver) = ChannelSink::channel("out");
        let (run_id, node_id, clock) = ctx();
        let plugin_ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };

        let rows = vec![RowData::new().with_field("n", Value::Int(1)), RowData::new().with_field("n", Value::Int(2))];
        let descriptor = sink.write(&rows, &plugin_ctx).unwrap();
        assert_eq!(descriptor.rows_written, 2);
        assert_eq!(descriptor.uri, "channel://out");

        assert_eq!(receiver.recv().unwrap().get("n"), Some(&Value::Int(1)));
        assert_eq!(receiver.recv().unwrap().get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn write_fails_once_receiver_is_dropped() {
        let (mut sink, receiver) = ChannelSink::channel("out");
        drop(receiver);
        let (run_id, node_id, clock) = ctx();
        let plugin_ctx = PluginContext { run_id: &run_id, node_id: &node_id, clock: &clock, calls: None };

        let err = sink.write(&[RowData::new()], &plugin_ctx).unwrap_err();
        assert!(matches!(err, SinkError::Write(_)));
    }
}
