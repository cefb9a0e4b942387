//! End-to-end pipeline tests: simulation source → acquisition loop → sinks.

use daq_common::config::{BusSinkConfig, FileSinkConfig};
use daq_common::consts::{UNBOUNDED_COUNT, UNPACKED_HEADER};
use daq_common::word::{DecodedRecord, TdcMeasPolicy, decode_words};
use daq_dma::acquisition::{AcquisitionLoop, DecodeOptions};
use daq_dma::block::Block;
use daq_dma::cancel::CancelToken;
use daq_dma::error::DaqResult;
use daq_dma::sink::bus::DeliveryCounts;
use daq_dma::sink::{BusProducer, BusSink, EnqueueError, MemoryProducer, RotatingFileSink, Sink};
use daq_dma::source::simulation::{SimTransfer, SimulatedSource};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn file_config(dir: &Path, rotation_blocks: u32) -> FileSinkConfig {
    FileSinkConfig {
        enabled: true,
        raw_base: dir.join("data"),
        unpacked_base: dir.join("data"),
        rotation_blocks,
    }
}

fn run_loop(
    source: SimulatedSource,
    sinks: Vec<Box<dyn Sink>>,
    size: u32,
    budget: u32,
    cancel: &CancelToken,
) -> daq_dma::acquisition::LoopStats {
    AcquisitionLoop::new(
        Box::new(source),
        sinks,
        Block::new(0, size, 0),
        budget,
        DecodeOptions::default(),
    )
    .run(cancel)
    .unwrap()
}

#[test]
fn test_rotation_end_to_end() {
    let dir = TempDir::new().unwrap();
    let source = SimulatedSource::new(TdcMeasPolicy::default()).with_script([
        SimTransfer::Full,
        SimTransfer::Bytes(0),
        SimTransfer::Bytes(32),
        SimTransfer::Full,
    ]);
    let sink = RotatingFileSink::open(&file_config(dir.path(), 2)).unwrap();

    let stats = run_loop(source, vec![Box::new(sink)], 64, 4, &CancelToken::new());
    assert_eq!(stats.transfers, 4);
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.short, 1);
    assert_eq!(stats.accepted_bytes, 160);

    let raw0 = std::fs::read(dir.path().join("data_000000.dat")).unwrap();
    let raw1 = std::fs::read(dir.path().join("data_000001.dat")).unwrap();
    assert_eq!(raw0.len(), 64);
    assert_eq!(raw1.len(), 96);
    assert!(!dir.path().join("data_000002.dat").exists());

    for (index, raw) in [(0, &raw0), (1, &raw1)] {
        let text =
            std::fs::read_to_string(dir.path().join(format!("data_{index:06}.txt"))).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(UNPACKED_HEADER));

        // Unpacked rows are exactly the hits of the raw stream, in order.
        let expected: Vec<String> = decode_words(raw, TdcMeasPolicy::default())
            .filter_map(|r| match r {
                DecodedRecord::Hit(h) => Some(h.to_string()),
                _ => None,
            })
            .collect();
        let rows: Vec<String> = lines.map(str::to_string).collect();
        assert_eq!(rows, expected);
    }

    // Word 15 of the simulated stream is a trigger.
    let rows1 = std::fs::read_to_string(dir.path().join("data_000001.txt")).unwrap();
    assert_eq!(rows1.lines().count(), 1 + 4 + 7);
}

#[test]
fn test_failed_transfer_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let source = SimulatedSource::new(TdcMeasPolicy::default())
        .with_script([SimTransfer::Fail, SimTransfer::Bytes(-1)]);
    let sink = RotatingFileSink::open(&file_config(dir.path(), 10)).unwrap();

    let stats = run_loop(source, vec![Box::new(sink)], 64, 2, &CancelToken::new());
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.hits, 0);

    assert!(std::fs::read(dir.path().join("data_000000.dat")).unwrap().is_empty());
    let text = std::fs::read_to_string(dir.path().join("data_000000.txt")).unwrap();
    assert_eq!(text.lines().collect::<Vec<_>>(), vec![UNPACKED_HEADER]);
}

/// Producer shared with the test so it can be inspected after the loop
/// consumed the sink.
struct SharedProducer(Arc<Mutex<MemoryProducer>>);

impl BusProducer for SharedProducer {
    fn topic(&self) -> &str {
        "daq"
    }

    fn enqueue(&mut self, message: &[u8]) -> Result<(), EnqueueError> {
        self.0.lock().unwrap().enqueue(message)
    }

    fn poll(&mut self, timeout: Duration) {
        self.0.lock().unwrap().poll(timeout)
    }

    fn flush(&mut self, timeout: Duration) -> DaqResult<()> {
        self.0.lock().unwrap().flush(timeout)
    }

    fn in_flight(&self) -> usize {
        self.0.lock().unwrap().in_flight()
    }

    fn deliveries(&self) -> DeliveryCounts {
        self.0.lock().unwrap().deliveries()
    }
}

fn bus_config() -> BusSinkConfig {
    BusSinkConfig {
        enabled: true,
        brokers: "localhost:9092".to_string(),
        topic: "daq".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_bus_queue_full_is_retried() {
    let memory = Arc::new(Mutex::new(MemoryProducer::new("daq", 1)));
    let cancel = CancelToken::new();
    let sink = BusSink::new(SharedProducer(memory.clone()), &bus_config(), cancel.clone())
        .with_run_number(Some(1234));
    let source = SimulatedSource::new(TdcMeasPolicy::default())
        .with_script([SimTransfer::Full, SimTransfer::Bytes(0), SimTransfer::Full]);

    let stats = run_loop(source, vec![Box::new(sink)], 64, 3, &cancel);
    assert_eq!(stats.empty, 1);

    let memory = memory.lock().unwrap();
    // The empty block produced nothing; the second full block waited once.
    assert_eq!(memory.enqueue_calls(), 3);
    assert_eq!(memory.blocking_polls(), 1);
    assert_eq!(memory.delivered().len(), 2);
    for message in memory.delivered() {
        assert_eq!(message.len(), 8 + 64);
        assert_eq!(&message[..8], &1234u64.to_ne_bytes());
    }
}

#[test]
fn test_file_and_bus_see_same_payloads() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(Mutex::new(MemoryProducer::new("daq", 16)));
    let cancel = CancelToken::new();
    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(RotatingFileSink::open(&file_config(dir.path(), 100)).unwrap()),
        Box::new(BusSink::new(SharedProducer(memory.clone()), &bus_config(), cancel.clone())),
    ];
    let source = SimulatedSource::new(TdcMeasPolicy::default())
        .with_script([SimTransfer::Bytes(16), SimTransfer::Full]);

    run_loop(source, sinks, 32, 2, &cancel);

    let raw = std::fs::read(dir.path().join("data_000000.dat")).unwrap();
    let produced: Vec<u8> = memory
        .lock()
        .unwrap()
        .delivered()
        .iter()
        .flatten()
        .copied()
        .collect();
    assert_eq!(raw.len(), 48);
    assert_eq!(raw, produced);
}

#[test]
fn test_unbounded_run_stops_on_cancel() {
    struct CancelAfter {
        cancel: CancelToken,
        remaining: u32,
    }

    impl Sink for CancelAfter {
        fn name(&self) -> &'static str {
            "cancel-after"
        }

        fn accept(&mut self, _payload: &[u8]) -> DaqResult<()> {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.cancel.cancel();
            }
            Ok(())
        }

        fn close(&mut self) -> DaqResult<()> {
            Ok(())
        }
    }

    let cancel = CancelToken::new();
    let sink = CancelAfter {
        cancel: cancel.clone(),
        remaining: 5,
    };
    let stats = run_loop(
        SimulatedSource::new(TdcMeasPolicy::default()),
        vec![Box::new(sink)],
        64,
        UNBOUNDED_COUNT,
        &cancel,
    );
    assert_eq!(stats.transfers, 5);
}
