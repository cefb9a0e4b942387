//! Device source tests against a regular file standing in for the DMA node.

use daq_common::config::DaqConfig;
use daq_common::word::{Hit, TdcMeasPolicy};
use daq_dma::acquisition::{AcquisitionLoop, DecodeOptions};
use daq_dma::block::Block;
use daq_dma::cancel::CancelToken;
use daq_dma::error::DaqError;
use daq_dma::sink::RotatingFileSink;
use daq_dma::source::{builtin_registry, dma};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn hit_words(count: u16) -> Vec<u8> {
    let policy = TdcMeasPolicy::default();
    (0..count)
        .flat_map(|i| {
            Hit {
                head: 1,
                fpga: 3,
                tdc_channel: 1 + i,
                orbit_cnt: 1000 + i as u32,
                bx_counter: i,
                tdc_meas: (i % 32) as u8,
            }
            .to_word(policy)
            .to_ne_bytes()
        })
        .collect()
}

#[test]
fn test_registry_opens_device_from_config() {
    let mut node = NamedTempFile::new().unwrap();
    node.write_all(&hit_words(24)).unwrap();
    node.flush().unwrap();

    let mut config = DaqConfig::default();
    config.device.path = node.path().to_path_buf();
    config.device.size = 64;

    let source = builtin_registry()
        .create_source(dma::NAME, &config)
        .unwrap();
    assert_eq!(source.name(), "dma");

    let out = TempDir::new().unwrap();
    config.file_sink.raw_base = out.path().join("raw");
    config.file_sink.unpacked_base = out.path().join("unpacked");
    let sink = RotatingFileSink::open(&config.file_sink).unwrap();

    // 192 bytes in the node: three full blocks, then empty reads.
    let stats = AcquisitionLoop::new(
        source,
        vec![Box::new(sink)],
        Block::new(0, 64, 0),
        5,
        DecodeOptions::default(),
    )
    .run(&CancelToken::new())
    .unwrap();
    assert_eq!(stats.transfers, 5);
    assert_eq!(stats.empty, 2);
    assert_eq!(stats.hits, 24);

    let raw = std::fs::read(out.path().join("raw_000000.dat")).unwrap();
    assert_eq!(raw, hit_words(24));

    let text = std::fs::read_to_string(out.path().join("unpacked_000000.txt")).unwrap();
    let rows: Vec<_> = text.lines().skip(1).collect();
    assert_eq!(rows.len(), 24);
    assert_eq!(rows[0], "1,3,1,1000,0,0");
    assert_eq!(rows[23], "1,3,24,1023,23,23");
}

#[test]
fn test_missing_device_is_fatal() {
    let mut config = DaqConfig::default();
    config.device.path = "/nonexistent/xdma9_c2h_0".into();

    let err = builtin_registry()
        .create_source(dma::NAME, &config)
        .err()
        .unwrap();
    assert!(matches!(err, DaqError::DeviceOpen { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_address_reads_same_window_each_transfer() {
    let mut node = NamedTempFile::new().unwrap();
    node.write_all(&hit_words(16)).unwrap();
    node.flush().unwrap();

    let mut config = DaqConfig::default();
    config.device.path = node.path().to_path_buf();
    let source = builtin_registry()
        .create_source(dma::NAME, &config)
        .unwrap();

    let out = TempDir::new().unwrap();
    config.file_sink.raw_base = out.path().join("raw");
    config.file_sink.unpacked_base = out.path().join("unpacked");
    let sink = RotatingFileSink::open(&config.file_sink).unwrap();

    AcquisitionLoop::new(
        source,
        vec![Box::new(sink)],
        Block::new(64, 32, 0),
        3,
        DecodeOptions::default(),
    )
    .run(&CancelToken::new())
    .unwrap();

    let words = hit_words(16);
    let window = &words[64..96];
    let raw = std::fs::read(out.path().join("raw_000000.dat")).unwrap();
    assert_eq!(raw.len(), 96);
    for chunk in raw.chunks(32) {
        assert_eq!(chunk, window);
    }
}
