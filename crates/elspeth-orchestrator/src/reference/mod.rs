// crates/elspeth-orchestrator/src/reference/mod.rs
// ============================================================================
// Module: Reference Plugins
// Description: Deterministic, in-process Source/Transform/Sink implementations.
// Purpose: Let system tests (and callers wiring a first real pipeline) compose
// a run without reaching for a concrete I/O backend.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! Only three reference plugins ship in this crate: [`InlineSource`] replays
//! an in-memory row list, [`MapTransform`] wraps a closure as a row-at-a-time
//! [`elspeth_core::Transform`], and [`ChannelSink`] hands written rows off to
//! an `std::sync::mpsc` receiver a test can drain. None of them talk to a
//! real external system; a CSV/HTTP/LLM plugin would register against
//! [`elspeth_core::Registries`] the same way but lives outside this repo.

mod channel_sink;
mod inline_source;
mod map_transform;

pub use channel_sink::ChannelSink;
pub use inline_source::InlineSource;
pub use map_transform::MapTransform;
