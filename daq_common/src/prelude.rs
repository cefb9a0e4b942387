//! Prelude module for common re-exports.
//!
//! ```rust
//! use daq_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    AcquisitionConfig, BusSinkConfig, ConfigError, ConfigLoader, DaqConfig, DeviceConfig,
    FileSinkConfig, LogLevel, SharedConfig,
};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{UNBOUNDED_COUNT, WORD_BYTES};

// ─── Decoding ───────────────────────────────────────────────────────
pub use crate::word::{
    DecodedRecord, Hit, RunControl, TdcMeasPolicy, Trigger, decode, decode_words,
};
