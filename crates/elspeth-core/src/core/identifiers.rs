// crates/elspeth-core/src/core/identifiers.rs
// ============================================================================
// Module: Elspeth Identifiers
// Description: Canonical opaque identifiers for runs, nodes, tokens, and audit records.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every identifier in Elspeth is an opaque string assigned by the Landscape
//! recorder at the single write path. These newtypes exist so that a
//! `TokenId` can never be passed where a `NodeId` is expected, even though
//! both are strings on the wire.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Macro
// ============================================================================

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from an owned or borrowed string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    /// Identifies a single pipeline execution.
    ///
    /// # Invariants
    /// - Unique within the Landscape database it was recorded in.
    RunId
);

opaque_id!(
    /// Identifies a registered plugin instance node in the execution graph.
    ///
    /// # Invariants
    /// - Stable for the lifetime of a run; assigned at graph construction time.
    NodeId
);

opaque_id!(
    /// Identifies a directed edge between two nodes.
    EdgeId
);

opaque_id!(
    /// Identifies a row produced by a source.
    ///
    /// # Invariants
    /// - `(run_id, source_node_id, row_index)` also uniquely identifies the row;
    ///   `RowId` is the opaque primary key the recorder assigns for that tuple.
    RowId
);

opaque_id!(
    /// Identifies a single token traveling along a DAG path.
    TokenId
);

opaque_id!(
    /// Identifies a node-state record (a token's visit to a node).
    StateId
);

opaque_id!(
    /// Identifies a routing event.
    RoutingEventId
);

opaque_id!(
    /// Groups routing events produced by a single fanout decision.
    RoutingGroupId
);

opaque_id!(
    /// Groups sibling tokens created by a single fork.
    ForkGroupId
);

opaque_id!(
    /// Groups sibling tokens consumed by a single coalesce merge.
    JoinGroupId
);

opaque_id!(
    /// Groups sibling tokens created by a single 1-to-N expansion.
    ExpandGroupId
);

opaque_id!(
    /// Identifies an aggregation batch.
    BatchId
);

opaque_id!(
    /// Identifies an external call (LLM/HTTP/SQL/filesystem) made under a node state.
    CallId
);

opaque_id!(
    /// Identifies a schema-validation-failure record.
    ValidationErrorId
);

opaque_id!(
    /// Identifies a transform-rejection record.
    TransformErrorId
);

opaque_id!(
    /// Names a coalesce node within the execution graph.
    CoalesceName
);

opaque_id!(
    /// Names a fork/coalesce branch.
    BranchName
);
