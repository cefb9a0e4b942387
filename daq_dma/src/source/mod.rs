//! Block sources.
//!
//! This module contains the [`BlockSource`] trait and its implementations:
//!
//! - [`dma`] - DMA card-to-host character device
//! - [`simulation`] - Software source for development and testing
//!
//! # Adding New Sources
//!
//! 1. Create a new submodule under `source/`
//! 2. Implement [`BlockSource`] and a `create_source` factory
//! 3. Register the factory in [`builtin_registry`]

pub mod dma;
pub mod registry;
pub mod simulation;

pub use registry::SourceRegistry;

use crate::block::Block;
use crate::error::DaqResult;
use daq_common::config::DaqConfig;

/// Factory function type for creating sources from the readout configuration.
pub type SourceFactory = fn(&DaqConfig) -> DaqResult<Box<dyn BlockSource>>;

/// Producer of raw transfer blocks.
///
/// The acquisition loop owns one source and calls [`read_block`] once per
/// iteration with the shared [`Block`].
///
/// # Contract
///
/// | Outcome | `block.actual_size()` | Return |
/// |---------|-----------------------|--------|
/// | transfer completed (0..=size bytes) | byte count | `Ok(())` |
/// | negative transfer result | `-1` | `Err(DaqError::Transfer)` |
/// | bus address not honoured | unchanged | `Err(DaqError::Seek)` |
///
/// Sources never retry internally. Empty and short transfers are reported
/// as-is.
///
/// [`read_block`]: BlockSource::read_block
pub trait BlockSource: Send {
    /// Source identifier (e.g., "dma", "simulation").
    fn name(&self) -> &'static str;

    /// Perform one transfer into `block`.
    ///
    /// Selects `block.address()` first when it is non-zero.
    fn read_block(&mut self, block: &mut Block) -> DaqResult<()>;

    /// Release the underlying handle. Called once at loop teardown.
    fn close(&mut self) -> DaqResult<()> {
        Ok(())
    }
}

/// Registry with every built-in source registered.
pub fn builtin_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(dma::NAME, dma::create_source);
    registry.register(simulation::NAME, simulation::create_source);
    registry
}
