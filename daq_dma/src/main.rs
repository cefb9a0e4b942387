//! # DAQ DMA Readout Binary
//!
//! Reads fixed-size blocks from a DMA card-to-host channel, decodes the
//! front-end words and writes them to rotating files and/or a message bus.
//!
//! # Usage
//!
//! ```bash
//! # 1000 transfers of 8 KiB into output_raw_NNNNNN.dat / output_unpacked_NNNNNN.txt
//! daq_dma -d /dev/xdma0_c2h_0 -s 8192 -c 1000
//!
//! # Unbounded run into data/RunNNNNNN, print every hit
//! daq_dma --data-dir data -v
//!
//! # Stream to Kafka only (requires the `kafka` feature)
//! daq_dma -x -b 10.0.0.1:9092 -t daq -r 42
//!
//! # No hardware
//! daq_dma --simulate -c 100 -v
//! ```

use clap::Parser;
use daq_common::prelude::{ConfigLoader, DaqConfig, LogLevel, TdcMeasPolicy, UNBOUNDED_COUNT};
use daq_dma::acquisition::{AcquisitionLoop, DecodeOptions};
use daq_dma::block::Block;
use daq_dma::cancel::CancelToken;
use daq_dma::error::DaqResult;
use daq_dma::run_dir::RunDirectory;
use daq_dma::sink::{RotatingFileSink, Sink};
use daq_dma::source::{builtin_registry, dma, simulation};
use std::path::{Path, PathBuf};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// DAQ DMA readout - block acquisition, TDC decoding, file and bus output
#[derive(Parser, Debug)]
#[command(name = "daq_dma")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "DMA readout with TDC word decoding, rotating files and message-bus output")]
#[command(long_about = None)]
struct Args {
    /// DMA device node
    #[arg(short, long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Bus address selected before every transfer (decimal or 0x hex)
    #[arg(short, long, value_parser = parse_number)]
    address: Option<u32>,

    /// Transfer size in bytes (decimal or 0x hex)
    #[arg(short, long, value_parser = parse_number)]
    size: Option<u32>,

    /// Page offset of the transfer buffer (masked to 4095)
    #[arg(short, long, value_parser = parse_number)]
    offset: Option<u32>,

    /// Number of transfers; omitted or negative runs until interrupted
    #[arg(short, long, allow_hyphen_values = true, value_parser = parse_count)]
    count: Option<u32>,

    /// Log every decoded hit and enable debug logging (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Base name of the raw output files
    #[arg(short = 'f', long = "file", value_name = "BASE")]
    raw_base: Option<PathBuf>,

    /// Base name of the unpacked output files
    #[arg(short = 'u', long = "unpacked", value_name = "BASE")]
    unpacked_base: Option<PathBuf>,

    /// Do not write output files
    #[arg(short = 'x', long)]
    exclude_writeout: bool,

    /// Message-bus brokers; enables the bus sink
    #[arg(short, long = "broker", value_name = "HOST:PORT[,..]")]
    brokers: Option<String>,

    /// Message-bus topic
    #[arg(short, long)]
    topic: Option<String>,

    /// Run number prefixed to bus messages and shown with trigger words
    #[arg(short, long)]
    run_number: Option<u32>,

    /// Allocate a RunNNNNNN directory here for the output files
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Blocks per output file pair
    #[arg(long, value_name = "BLOCKS")]
    rotation: Option<u32>,

    /// Split transfers above the platform read ceiling
    #[arg(long)]
    chunked: bool,

    /// TDC_MEAS correction (decrement-uncalibrated, restore-calibration)
    #[arg(long)]
    policy: Option<TdcMeasPolicy>,

    /// Use the simulation source instead of the device
    #[arg(long)]
    simulate: bool,

    /// TOML configuration file; command-line options override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

/// Parse a transfer count (decimal or `0x` hex); negative values mean
/// unbounded.
fn parse_count(s: &str) -> Result<u32, String> {
    match s.strip_prefix('-') {
        Some(magnitude) => match parse_number(magnitude)? {
            0 => Ok(0),
            _ => Ok(UNBOUNDED_COUNT),
        },
        None => parse_number(s),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("FATAL: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => DaqConfig::load(path),
        None => Ok(DaqConfig::default()),
    };
    let log_level = loaded
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    let mut config = loaded?;
    apply_args(&mut config, &args);

    info!("DAQ DMA readout v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(data_dir) = config.acquisition.data_dir.clone() {
        let run = RunDirectory::allocate(&data_dir)?;
        config.file_sink.raw_base = place_in(run.path(), &config.file_sink.raw_base);
        config.file_sink.unpacked_base = place_in(run.path(), &config.file_sink.unpacked_base);
        adopt_run_number(&mut config, run.number());
    }

    config.validate()?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_token.cancel();
    })?;

    let source_name = if config.device.simulate {
        info!("Simulation mode enabled");
        simulation::NAME
    } else {
        dma::NAME
    };
    let source = builtin_registry().create_source(source_name, &config)?;

    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if config.file_sink.enabled {
        sinks.push(Box::new(RotatingFileSink::open(&config.file_sink)?));
    }
    if config.bus_sink.enabled {
        sinks.push(build_bus_sink(&config, cancel.clone())?);
    }

    let block = Block::new(
        config.device.address,
        config.device.size,
        config.device.page_offset,
    );
    let decode = DecodeOptions {
        policy: config.acquisition.tdc_meas_policy,
        console: config.acquisition.verbosity >= 1,
        tagging: config.acquisition.run_number.is_some(),
    };

    let acquisition = AcquisitionLoop::new(
        source,
        sinks,
        block,
        config.acquisition.budget(),
        decode,
    );
    let stats = acquisition.run(&cancel)?;

    info!(
        "DAQ DMA readout complete: {} transfers, {} bytes, {} hits",
        stats.transfers, stats.accepted_bytes, stats.hits
    );
    Ok(())
}

/// Overlay command-line options onto the loaded configuration.
fn apply_args(config: &mut DaqConfig, args: &Args) {
    if let Some(device) = &args.device {
        config.device.path = device.clone();
    }
    if let Some(address) = args.address {
        config.device.address = address;
    }
    if let Some(size) = args.size {
        config.device.size = size;
    }
    if let Some(offset) = args.offset {
        config.device.page_offset = offset & 0xfff;
    }
    config.device.chunked |= args.chunked;
    config.device.simulate |= args.simulate;

    if let Some(count) = args.count {
        config.acquisition.count = (count != UNBOUNDED_COUNT).then_some(count);
    }
    if args.verbose > 0 {
        config.acquisition.verbosity = args.verbose;
    }
    if let Some(policy) = args.policy {
        config.acquisition.tdc_meas_policy = policy;
    }
    if let Some(run_number) = args.run_number {
        config.acquisition.run_number = Some(run_number);
    }
    if let Some(data_dir) = &args.data_dir {
        config.acquisition.data_dir = Some(data_dir.clone());
    }

    if args.exclude_writeout {
        config.file_sink.enabled = false;
    }
    if let Some(base) = &args.raw_base {
        config.file_sink.raw_base = base.clone();
    }
    if let Some(base) = &args.unpacked_base {
        config.file_sink.unpacked_base = base.clone();
    }
    if let Some(rotation) = args.rotation {
        config.file_sink.rotation_blocks = rotation;
    }

    if let Some(brokers) = &args.brokers {
        config.bus_sink.enabled = true;
        config.bus_sink.brokers = brokers.clone();
    }
    if let Some(topic) = &args.topic {
        config.bus_sink.topic = topic.clone();
    }
}

/// Tag bus messages with the allocated run number unless one was given.
/// File-only runs stay untagged.
fn adopt_run_number(config: &mut DaqConfig, run_number: u32) {
    if config.bus_sink.enabled && config.acquisition.run_number.is_none() {
        config.acquisition.run_number = Some(run_number);
    }
}

/// `run_dir/<file name of base>`.
fn place_in(run_dir: &Path, base: &Path) -> PathBuf {
    match base.file_name() {
        Some(name) => run_dir.join(name),
        None => run_dir.join(base),
    }
}

#[cfg(feature = "kafka")]
fn build_bus_sink(config: &DaqConfig, cancel: CancelToken) -> DaqResult<Box<dyn Sink>> {
    use daq_dma::sink::BusSink;
    use daq_dma::sink::kafka::KafkaProducer;

    let producer = KafkaProducer::new(&config.bus_sink)?;
    let sink = BusSink::new(producer, &config.bus_sink, cancel)
        .with_run_number(config.acquisition.run_number);
    Ok(Box::new(sink))
}

#[cfg(not(feature = "kafka"))]
fn build_bus_sink(_config: &DaqConfig, _cancel: CancelToken) -> DaqResult<Box<dyn Sink>> {
    Err(daq_dma::error::DaqError::Bus(
        "bus sink requested but daq_dma was built without the `kafka` feature".to_string(),
    ))
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let filter = if args.verbose > 0 {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level.as_directive()))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
