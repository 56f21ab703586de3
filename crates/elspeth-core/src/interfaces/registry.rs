// crates/elspeth-core/src/interfaces/registry.rs
// ============================================================================
// Module: Elspeth Plugin Registry
// Description: String-keyed plugin factory registry.
// Purpose: Construct Source/Transform/Sink/Gate/Aggregation instances by name
// without runtime duck typing.
// Dependencies: crate::interfaces::plugin
// ============================================================================

//! ## Overview
//! Per `spec.md` §9 Design Notes, plugin factories are looked up by name
//! through a registry; the engine holds only the trait object, never a
//! concrete type. Only the registry module constructs plugins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::interfaces::plugin::Aggregation;
use crate::interfaces::plugin::Gate;
use crate::interfaces::plugin::Sink;
use crate::interfaces::plugin::Source;
use crate::interfaces::plugin::Transform;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised constructing a plugin from the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No factory is registered under the given name.
    #[error("no plugin registered under name: {0}")]
    Unknown(String),
    /// The factory rejected the supplied configuration.
    #[error("plugin construction failed for {plugin}: {detail}")]
    ConstructionFailed {
        /// Plugin name that failed to construct.
        plugin: String,
        /// Detail describing the failure.
        detail: String,
    },
}

// ============================================================================
// SECTION: Generic Keyed Registry
// ============================================================================

/// A string-keyed factory registry for one plugin kind.
///
/// # Invariants
/// - Registering under an existing name overwrites the previous factory.
pub struct PluginRegistry<T: ?Sized> {
    factories: BTreeMap<String, Arc<dyn Fn(&JsonValue) -> Result<Box<T>, RegistryError> + Send + Sync>>,
}

impl<T: ?Sized> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<T: ?Sized> PluginRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&JsonValue) -> Result<Box<T>, RegistryError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Constructs a plugin instance by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unknown`] when no factory is registered, or
    /// [`RegistryError::ConstructionFailed`] when the factory rejects
    /// `config`.
    pub fn build(&self, name: &str, config: &JsonValue) -> Result<Box<T>, RegistryError> {
        let factory = self.factories.get(name).ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        factory(config)
    }

    /// Returns the names currently registered.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

// ============================================================================
// SECTION: Plugin Kind Registries
// ============================================================================

/// The full set of per-kind registries the engine consults at graph
/// construction time.
#[derive(Default)]
pub struct Registries {
    /// Source plugin factories.
    pub sources: PluginRegistry<dyn Source>,
    /// Transform plugin factories.
    pub transforms: PluginRegistry<dyn Transform>,
    /// Sink plugin factories.
    pub sinks: PluginRegistry<dyn Sink>,
    /// Gate plugin factories.
    pub gates: PluginRegistry<dyn Gate>,
    /// Aggregation plugin factories.
    pub aggregations: PluginRegistry<dyn Aggregation>,
}

impl Registries {
    /// Creates an empty set of registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
