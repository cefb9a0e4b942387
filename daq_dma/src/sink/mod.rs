//! Output sinks.
//!
//! - [`file`] - Rotating raw + unpacked file pair
//! - [`bus`] - Message-bus producer with queue-full backpressure
//! - `kafka` - Kafka client behind the `kafka` feature
//!
//! The acquisition loop hands every accepted payload to each sink in
//! configuration order, then the decoded records of that payload to the
//! sinks that asked for them.

pub mod bus;
pub mod file;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use bus::{BusProducer, BusSink, EnqueueError, MemoryProducer};
pub use file::RotatingFileSink;

use crate::error::DaqResult;
use daq_common::word::DecodedRecord;

/// Consumer of accepted blocks.
///
/// # Lifecycle
///
/// 1. Created (and its first resources opened) before the loop starts
/// 2. `accept()` once per accepted block, then `accept_record()` per decoded word
/// 3. `close()` exactly once at loop teardown
pub trait Sink: Send {
    /// Sink identifier for logs.
    fn name(&self) -> &'static str;

    /// Consume the payload of one accepted block. The slice is only borrowed
    /// for the duration of the call.
    ///
    /// # Errors
    /// Only unrecoverable conditions (e.g. `DaqError::Rotation`) are
    /// returned; transient write failures are logged by the sink.
    fn accept(&mut self, payload: &[u8]) -> DaqResult<()>;

    /// True when the sink consumes decoded records.
    fn wants_records(&self) -> bool {
        false
    }

    /// Consume one decoded word of the block last passed to `accept()`.
    fn accept_record(&mut self, _record: &DecodedRecord) -> DaqResult<()> {
        Ok(())
    }

    /// Flush and release every resource.
    fn close(&mut self) -> DaqResult<()>;
}
