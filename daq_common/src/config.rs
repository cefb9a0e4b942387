//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all DAQ applications, and the [`DaqConfig`] consumed by the
//! readout binary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use daq_common::config::{ConfigLoader, ConfigError, DaqConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = DaqConfig::load(Path::new("daq.toml"))?;
//!     config.validate()?;
//!     println!("Device: {}", config.device.path.display());
//!     Ok(())
//! }
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [device]
//! path = "/dev/xdma0_c2h_0"
//! size = 8192
//!
//! [acquisition]
//! count = 100000
//! tdc_meas_policy = "decrement-uncalibrated"
//!
//! [file_sink]
//! raw_base = "/mnt/ramdisk/data"
//! unpacked_base = "/mnt/ramdisk/data"
//!
//! [bus_sink]
//! enabled = true
//! brokers = "10.0.0.1:9092,10.0.0.2:9092"
//! topic = "daq"
//! ```

use crate::consts::{
    BUS_FLUSH_TIMEOUT, BUS_POLL_INTERVAL, DEFAULT_DEVICE, DEFAULT_RAW_BASE,
    DEFAULT_ROTATION_BLOCKS, DEFAULT_TRANSFER_SIZE, DEFAULT_UNPACKED_BASE, PAGE_SIZE, RW_MAX_SIZE,
    UNBOUNDED_COUNT, WORD_BYTES,
};
use crate::word::TdcMeasPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

fn default_service_name() -> String {
    "daq_dma".to_string()
}

/// Common configuration fields shared across all DAQ applications.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "daq-sl1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Acquisition device settings (`[device]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeviceConfig {
    /// Device node of the DMA channel.
    pub path: PathBuf,
    /// Bus address selected before every transfer (0 = no seek).
    pub address: u32,
    /// Size of a single transfer in bytes.
    pub size: u32,
    /// Offset of the transfer region inside its page (0..4096).
    pub page_offset: u32,
    /// Split requests above the platform transfer ceiling.
    pub chunked: bool,
    /// Use the simulation source instead of the device.
    pub simulate: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DEVICE),
            address: 0,
            size: DEFAULT_TRANSFER_SIZE,
            page_offset: 0,
            chunked: false,
            simulate: false,
        }
    }
}

/// Loop settings (`[acquisition]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AcquisitionConfig {
    /// Number of transfers; `None` runs until cancelled.
    pub count: Option<u32>,
    /// Console verbosity; `>= 1` logs every decoded word.
    pub verbosity: u8,
    /// TDC_MEAS bias correction.
    pub tdc_meas_policy: TdcMeasPolicy,
    /// Run number tagged onto bus messages and console output.
    pub run_number: Option<u32>,
    /// Directory in which a `RunNNNNNN` folder is allocated.
    pub data_dir: Option<PathBuf>,
}

impl AcquisitionConfig {
    /// Transfer budget with the unbounded sentinel applied.
    pub fn budget(&self) -> u32 {
        self.count.unwrap_or(UNBOUNDED_COUNT)
    }
}

/// Rotating file sink settings (`[file_sink]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileSinkConfig {
    /// Write raw and unpacked files.
    pub enabled: bool,
    /// Base path of the raw stream (`<base>_NNNNNN.dat`).
    pub raw_base: PathBuf,
    /// Base path of the unpacked stream (`<base>_NNNNNN.txt`).
    pub unpacked_base: PathBuf,
    /// Accepted blocks per file pair.
    pub rotation_blocks: u32,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            raw_base: PathBuf::from(DEFAULT_RAW_BASE),
            unpacked_base: PathBuf::from(DEFAULT_UNPACKED_BASE),
            rotation_blocks: DEFAULT_ROTATION_BLOCKS,
        }
    }
}

/// Message-bus sink settings (`[bus_sink]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BusSinkConfig {
    /// Produce every accepted block to the bus.
    pub enabled: bool,
    /// Comma-separated bootstrap brokers (`host:port`).
    pub brokers: String,
    /// Destination topic.
    pub topic: String,
    /// Blocking poll while the producer queue is full.
    pub poll_interval_ms: u64,
    /// Final flush timeout.
    pub flush_timeout_ms: u64,
    /// Extra client properties passed through verbatim.
    pub properties: BTreeMap<String, String>,
}

impl Default for BusSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: String::new(),
            topic: String::new(),
            poll_interval_ms: BUS_POLL_INTERVAL.as_millis() as u64,
            flush_timeout_ms: BUS_FLUSH_TIMEOUT.as_millis() as u64,
            properties: BTreeMap::new(),
        }
    }
}

impl BusSinkConfig {
    /// Poll interval as `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Flush timeout as `Duration`.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Complete readout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaqConfig {
    /// Common fields.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Acquisition device.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Loop settings.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Rotating file sink.
    #[serde(default)]
    pub file_sink: FileSinkConfig,
    /// Message-bus sink.
    #[serde(default)]
    pub bus_sink: BusSinkConfig,
}

impl DaqConfig {
    /// Validate the readout configuration.
    ///
    /// # Validation Rules
    /// 1. `device.size` > 0
    /// 2. `device.size` <= RW_MAX_SIZE unless `device.chunked`
    /// 3. `device.page_offset` < PAGE_SIZE
    /// 4. `file_sink.rotation_blocks` > 0 when the file sink is enabled
    /// 5. `bus_sink.brokers` and `bus_sink.topic` set when the bus sink is enabled
    /// 6. `bus_sink.poll_interval_ms` > 0
    ///
    /// A transfer size that is not a multiple of 8 is accepted with a
    /// warning; trailing bytes are never decoded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.device.size == 0 {
            return Err(ConfigError::ValidationError(
                "device.size must be greater than 0".to_string(),
            ));
        }

        if !self.device.chunked && self.device.size as usize > RW_MAX_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "device.size {} exceeds the transfer ceiling {:#x}; enable device.chunked",
                self.device.size, RW_MAX_SIZE
            )));
        }

        if self.device.page_offset >= PAGE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "device.page_offset {} must be < {}",
                self.device.page_offset, PAGE_SIZE
            )));
        }

        if self.device.size as usize % WORD_BYTES != 0 {
            warn!(
                "device.size {} is not a multiple of {}; trailing bytes will not be decoded",
                self.device.size, WORD_BYTES
            );
        }

        if self.file_sink.enabled && self.file_sink.rotation_blocks == 0 {
            return Err(ConfigError::ValidationError(
                "file_sink.rotation_blocks must be greater than 0".to_string(),
            ));
        }

        if self.bus_sink.enabled {
            if self.bus_sink.brokers.is_empty() {
                return Err(ConfigError::ValidationError(
                    "bus_sink.brokers cannot be empty when the bus sink is enabled".to_string(),
                ));
            }
            if self.bus_sink.topic.is_empty() {
                return Err(ConfigError::ValidationError(
                    "bus_sink.topic cannot be empty when the bus sink is enabled".to_string(),
                ));
            }
            if self.bus_sink.poll_interval_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "bus_sink.poll_interval_ms must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for any `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
