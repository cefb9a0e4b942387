//! DAQ Common Library
//!
//! This crate provides shared constants, the TDC word decoder and
//! configuration loading utilities for all DAQ workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Device defaults, transfer limits, file naming constants
//! - [`word`] - 64-bit front-end word decoding (`DecodedRecord`)
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use daq_common::word::{decode, DecodedRecord, TdcMeasPolicy};
//!
//! let record = decode(0x4000_0000_0000_0001, TdcMeasPolicy::default());
//! assert!(matches!(record, DecodedRecord::Hit(_)));
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod word;
