//! # DAQ DMA Readout Library
//!
//! Block acquisition from a DMA card-to-host channel, TDC word decoding and
//! output to rotating files and a message bus.
//!
//! Sources implement [`source::BlockSource`]; sinks implement
//! [`sink::Sink`]. The binary wires them into an
//! [`acquisition::AcquisitionLoop`].
//!
//! # Module Structure
//!
//! - [`acquisition`] - Control loop, statistics
//! - [`block`] - Reusable transfer buffer, transfer classification
//! - [`cancel`] - Cancellation token
//! - [`error`] - `DaqError`
//! - [`run_dir`] - `RunNNNNNN` directory allocation
//! - [`sink`] - Rotating file sink, bus sink
//! - [`source`] - DMA device, simulation source, source registry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────────────┐
//! │ BlockSource  │───►│ AcquisitionLoop  │───►│ RotatingFileSink     │
//! │ (dma / sim)  │    │ (Block, decode)  │    │ BusSink<Producer>    │
//! └──────────────┘    └────────┬─────────┘    └──────────────────────┘
//!                              │
//!                              ▼
//!                     daq_common::word::decode
//! ```

#![deny(missing_docs)]

pub mod acquisition;
pub mod block;
pub mod cancel;
pub mod error;
pub mod run_dir;
pub mod sink;
pub mod source;

// Re-export key types for convenience
pub use crate::acquisition::{AcquisitionLoop, DecodeOptions, LoopStats};
pub use crate::block::{Block, Transfer};
pub use crate::cancel::CancelToken;
pub use crate::error::{DaqError, DaqResult};
pub use crate::run_dir::RunDirectory;
pub use crate::source::{BlockSource, SourceRegistry};
