// crates/elspeth-core/src/lib.rs
// ============================================================================
// Module: Elspeth Core Library
// Description: Public API surface for the Elspeth core.
// Purpose: Expose the audit data model, canonical hashing, and plugin contracts.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Elspeth core is the shared vocabulary every other crate in this workspace
//! builds on: canonical hashing, the audit data model (Run/Node/Edge/Row/
//! Token/...), the open row `Value` type, schema contracts, and the plugin
//! contract traits (Source/Transform/Sink/Gate/Aggregation) plus their
//! registry. It has no I/O of its own.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::error;
pub use core::error::EngineError;
pub use core::error::SchemaValidationSource;
pub use core::hashing;
pub use core::hashing::CANONICAL_VERSION;
pub use core::hashing::DEFAULT_HASH_ALGORITHM;
pub use core::hashing::HashAlgorithm;
pub use core::hashing::HashDigest;
pub use core::hashing::HashError;
pub use core::identifiers::BatchId;
pub use core::identifiers::BranchName;
pub use core::identifiers::CallId;
pub use core::identifiers::CoalesceName;
pub use core::identifiers::EdgeId;
pub use core::identifiers::ExpandGroupId;
pub use core::identifiers::ForkGroupId;
pub use core::identifiers::JoinGroupId;
pub use core::identifiers::NodeId;
pub use core::identifiers::RoutingEventId;
pub use core::identifiers::RoutingGroupId;
pub use core::identifiers::RowId;
pub use core::identifiers::RunId;
pub use core::identifiers::StateId;
pub use core::identifiers::TokenId;
pub use core::identifiers::TransformErrorId;
pub use core::identifiers::ValidationErrorId;
pub use core::model::Batch;
pub use core::model::BatchMember;
pub use core::model::BatchStatus;
pub use core::model::Call;
pub use core::model::CallStatus;
pub use core::model::CallType;
pub use core::model::Determinism;
pub use core::model::Edge;
pub use core::model::EdgeMode;
pub use core::model::ExportStatus;
pub use core::model::Node;
pub use core::model::NodeState;
pub use core::model::NodeStateStatus;
pub use core::model::NodeType;
pub use core::model::ReproducibilityGrade;
pub use core::model::Row;
pub use core::model::RoutingEvent;
pub use core::model::Run;
pub use core::model::RunStatus;
pub use core::model::Token;
pub use core::model::TokenOutcome;
pub use core::model::TokenOutcomeKind;
pub use core::model::TokenParent;
pub use core::model::TransformErrorRecord;
pub use core::model::ValidationErrorRecord;
pub use core::schema::FieldSpec;
pub use core::schema::FieldType;
pub use core::schema::SchemaContract;
pub use core::schema::SchemaMode;
pub use core::schema::SchemaValidationError;
pub use core::time::Clock;
pub use core::time::MockClock;
pub use core::time::SystemClock;
pub use core::time::Timestamp;
pub use core::value::RowData;
pub use core::value::Value;

pub use interfaces::plugin::Aggregation;
pub use interfaces::plugin::AggregationError;
pub use interfaces::plugin::ArtifactDescriptor;
pub use interfaces::plugin::BatchResult;
pub use interfaces::plugin::BatchTransform;
pub use interfaces::plugin::CallAttempt;
pub use interfaces::plugin::CallSink;
pub use interfaces::plugin::CallSinkError;
pub use interfaces::plugin::FieldResolution;
pub use interfaces::plugin::Gate;
pub use interfaces::plugin::GateError;
pub use interfaces::plugin::OutputPort;
pub use interfaces::plugin::PluginContext;
pub use interfaces::plugin::RoutingAction;
pub use interfaces::plugin::Sink;
pub use interfaces::plugin::SinkError;
pub use interfaces::plugin::Source;
pub use interfaces::plugin::SourceError;
pub use interfaces::plugin::Transform;
pub use interfaces::plugin::TransformError;
pub use interfaces::plugin::TransformResult;
pub use interfaces::plugin::TransformStatus;
pub use interfaces::plugin::ValidationResult;
pub use interfaces::registry::PluginRegistry;
pub use interfaces::registry::RegistryError;
pub use interfaces::registry::Registries;
