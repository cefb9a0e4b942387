//! Source registry.
//!
//! Provides a `SourceRegistry` struct for registering and retrieving block
//! source factories. This uses constructor-injection rather than global state.

use super::{BlockSource, SourceFactory};
use crate::error::{DaqError, DaqResult};
use daq_common::config::DaqConfig;
use std::collections::HashMap;

/// Registry of available block sources.
///
/// Constructed at startup, populated via `register()`, and queried once by
/// the binary. No global state, testable in isolation.
pub struct SourceRegistry {
    factories: HashMap<&'static str, SourceFactory>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a source factory.
    ///
    /// A second registration under the same name replaces the first and is
    /// logged.
    pub fn register(&mut self, name: &'static str, factory: SourceFactory) {
        if self.factories.insert(name, factory).is_some() {
            tracing::warn!("Source '{name}' registered twice; keeping the latest factory");
        }
    }

    /// Get a source factory by name.
    pub fn get_factory(&self, name: &str) -> Option<SourceFactory> {
        self.factories.get(name).copied()
    }

    /// Create a source instance by name.
    ///
    /// # Errors
    /// Returns `DaqError::SourceNotFound` if no source with the given name is
    /// registered, or the factory's own error (e.g. `DeviceOpen`).
    pub fn create_source(&self, name: &str, config: &DaqConfig) -> DaqResult<Box<dyn BlockSource>> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DaqError::SourceNotFound(name.to_string()))?;
        factory(config)
    }

    /// List all registered source names, sorted.
    pub fn list_sources(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
