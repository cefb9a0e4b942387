//! Error types for the readout pipeline.
//!
//! Per-transfer conditions (empty, short, oversized reads) are not errors;
//! they are classified by [`crate::block::Transfer`] and logged by the loop.

use daq_common::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by sources, sinks and the acquisition loop.
#[derive(Debug, Error)]
pub enum DaqError {
    /// The acquisition device could not be opened.
    #[error("Cannot open device {path:?}: {source}")]
    DeviceOpen {
        /// Device node
        path: PathBuf,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },

    /// The device did not honour the requested bus address.
    #[error("Seek mismatch on {device}: requested {requested:#x}, got {actual:#x}")]
    Seek {
        /// Source name
        device: String,
        /// Requested offset
        requested: u64,
        /// Offset reported by the device
        actual: u64,
    },

    /// A transfer failed (negative read result).
    #[error("Transfer failed on {device}: {source}")]
    Transfer {
        /// Source name
        device: String,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },

    /// A rotated output file could not be opened.
    #[error("Cannot open output file {path:?}: {source}")]
    Rotation {
        /// Output path
        path: PathBuf,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },

    /// Message-bus client error.
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Unknown source name requested from the registry.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

impl DaqError {
    /// True when the loop cannot continue after this error.
    ///
    /// Transfer failures only cost the current iteration.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transfer { .. })
    }
}

/// Result type for readout operations.
pub type DaqResult<T> = Result<T, DaqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_is_not_fatal() {
        let err = DaqError::Transfer {
            device: "dma".to_string(),
            source: std::io::Error::from_raw_os_error(libc::EIO),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("dma"));
    }

    #[test]
    fn test_seek_error_is_fatal() {
        let err = DaqError::Seek {
            device: "dma".to_string(),
            requested: 0x1000,
            actual: 0,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("0x1000"));
    }

    #[test]
    fn test_config_error_display() {
        let err = DaqError::from(ConfigError::ValidationError("size".to_string()));
        assert!(err.to_string().contains("size"));
    }
}
