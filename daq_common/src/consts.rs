//! System-wide constants for the DAQ workspace.
//!
//! Single source of truth for device defaults, transfer limits and output
//! naming. Imported by all crates.

use std::time::Duration;

/// Default DMA card-to-host channel device node.
pub const DEFAULT_DEVICE: &str = "/dev/xdma0_c2h_0";

/// Default size of a single transfer in bytes.
pub const DEFAULT_TRANSFER_SIZE: u32 = 1024;

/// Transfer budget sentinel meaning "run until cancelled".
pub const UNBOUNDED_COUNT: u32 = u32::MAX;

/// Largest request the platform accepts for a single `read(2)`.
pub const RW_MAX_SIZE: usize = 0x7fff_f000;

/// Page size used to mask the buffer page offset.
pub const PAGE_SIZE: u32 = 4096;

/// Size of one packed front-end word.
pub const WORD_BYTES: usize = 8;

/// Accepted blocks per output file pair before rotation.
pub const DEFAULT_ROTATION_BLOCKS: u32 = 10240;

/// Default base name of the raw output stream.
pub const DEFAULT_RAW_BASE: &str = "output_raw";

/// Default base name of the unpacked output stream.
pub const DEFAULT_UNPACKED_BASE: &str = "output_unpacked";

/// Raw stream file extension.
pub const RAW_EXTENSION: &str = "dat";

/// Unpacked stream file extension.
pub const UNPACKED_EXTENSION: &str = "txt";

/// First line of every unpacked file.
pub const UNPACKED_HEADER: &str = "HEAD,FPGA,TDC_CHANNEL,ORBIT_CNT,BX_COUNTER,TDC_MEAS";

/// Biased TDC channels carrying unbiased TDC_MEAS values.
pub const CALIBRATION_CHANNELS: [u16; 2] = [137, 138];

/// Blocking poll interval while the bus producer queue is full.
pub const BUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Final flush timeout for the bus producer.
pub const BUS_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer-side queue limit handed to the bus client.
pub const BUS_QUEUE_MAX_MESSAGES: u32 = 500_000;

/// Size of the run-number prefix prepended to bus messages.
pub const RUN_NUMBER_PREFIX_BYTES: usize = 8;

/// Run number used when the next run directory already exists.
pub const FALLBACK_RUN_NUMBER: u32 = 999_999;

/// Prefix of run directories (`Run000042`).
pub const RUN_DIR_PREFIX: &str = "Run";
