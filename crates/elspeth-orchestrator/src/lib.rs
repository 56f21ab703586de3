// crates/elspeth-orchestrator/src/lib.rs
// ============================================================================
// Crate: elspeth-orchestrator
// Description: The end-to-end run driver wiring graph, token manager,
// coalesce executor, batch adapters, checkpoint manager, and recorder
// together.
// Dependencies: elspeth-batch, elspeth-checkpoint, elspeth-coalesce,
// elspeth-config, elspeth-core, elspeth-gate, elspeth-graph,
// elspeth-landscape, elspeth-store, serde_json, thiserror
// ============================================================================

//! ## Overview
//! `spec.md` §4.11 describes the orchestrator as five steps: begin the run,
//! register the graph, stream rows through it, flush anything still pending
//! once the source ends, and finalize. [`orchestrator::Orchestrator::run`]
//! is that procedure; [`pipeline::PipelinePlugins`] is the concrete plugin
//! wiring it drives, and [`reference`] holds the three reference plugins
//! (`InlineSource`, `MapTransform`, `ChannelSink`) real configs can compose
//! against without reaching for a concrete I/O backend.

#![warn(clippy::pedantic, clippy::nursery, missing_errors_doc, missing_panics_doc)]

pub mod dispatch;
pub mod pipeline;
pub mod reference;
pub mod result;

mod orchestrator;

pub use orchestrator::Orchestrator;
pub use orchestrator::OrchestratorError;
pub use pipeline::NodeDescriptor;
pub use pipeline::PipelinePlugins;
pub use pipeline::TransformKind;
pub use result::RunOutcome;
pub use result::RunResult;
