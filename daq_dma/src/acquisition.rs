//! Acquisition loop.
//!
//! The `AcquisitionLoop` owns the block source, the shared [`Block`] and the
//! sinks, and sequences one transfer per iteration:
//!
//! ```text
//!  Running ──(cancel | budget spent | fatal error)──► Draining ──► Stopped
//!     ▲  │
//!     └──┘ prepare → read → classify → sinks → decode
//! ```
//!
//! `Draining` closes every sink and the source exactly once; `run` returns
//! only from `Stopped`.

use crate::block::{Block, Transfer};
use crate::cancel::CancelToken;
use crate::error::{DaqError, DaqResult};
use crate::sink::Sink;
use crate::source::BlockSource;
use daq_common::consts::UNBOUNDED_COUNT;
use daq_common::word::{DecodedRecord, TdcMeasPolicy, decode_words};
use tracing::{debug, error, info, warn};

/// Transfers between periodic statistics lines.
const STATS_EVERY: u64 = 1000;

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Transferring blocks.
    Running,
    /// Closing sinks and source.
    Draining,
    /// Terminal.
    Stopped,
}

/// Counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Transfer attempts (budget consumed).
    pub transfers: u64,
    /// Negative results and transfer errors.
    pub failed: u64,
    /// Zero-byte transfers.
    pub empty: u64,
    /// Partial transfers.
    pub short: u64,
    /// Transfers larger than requested (discarded).
    pub oversized: u64,
    /// Payload bytes handed to the sinks.
    pub accepted_bytes: u64,
    /// Decoded hit words.
    pub hits: u64,
    /// Decoded trigger words.
    pub triggers: u64,
    /// Decoded run-control words.
    pub run_controls: u64,
}

/// Decode and console options.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// TDC_MEAS bias correction.
    pub policy: TdcMeasPolicy,
    /// Log every hit as a table row.
    pub console: bool,
    /// Also log trigger and run-control words.
    pub tagging: bool,
}

impl DecodeOptions {
    /// Console line for a decoded record, if this record is shown at all.
    ///
    /// Hits are shown as table rows whenever the console is on; trigger and
    /// run-control words only when tagging as well.
    pub fn console_line(&self, record: &DecodedRecord) -> Option<String> {
        if !self.console {
            return None;
        }
        match record {
            DecodedRecord::Hit(hit) => Some(hit.table_row().to_string()),
            DecodedRecord::Trigger(trigger) if self.tagging => Some(trigger.to_string()),
            DecodedRecord::RunControl(run) if self.tagging => Some(run.to_string()),
            _ => None,
        }
    }
}

/// Single-worker acquisition loop.
pub struct AcquisitionLoop {
    source: Box<dyn BlockSource>,
    sinks: Vec<Box<dyn Sink>>,
    block: Block,
    budget: u32,
    decode: DecodeOptions,
    state: LoopState,
    stats: LoopStats,
}

impl AcquisitionLoop {
    /// Create a loop. `budget` is the number of transfer attempts;
    /// `UNBOUNDED_COUNT` runs until cancelled.
    pub fn new(
        source: Box<dyn BlockSource>,
        sinks: Vec<Box<dyn Sink>>,
        block: Block,
        budget: u32,
        decode: DecodeOptions,
    ) -> Self {
        Self {
            source,
            sinks,
            block,
            budget,
            decode,
            state: LoopState::Running,
            stats: LoopStats::default(),
        }
    }

    fn decoding(&self) -> bool {
        self.decode.console || self.sinks.iter().any(|s| s.wants_records())
    }

    /// Run until cancelled, the budget is spent or a fatal error occurs.
    ///
    /// # Errors
    /// Returns the fatal error (seek mismatch, rotation failure) after the
    /// sinks and source have been closed.
    pub fn run(mut self, cancel: &CancelToken) -> DaqResult<LoopStats> {
        let sink_names: Vec<_> = self.sinks.iter().map(|s| s.name()).collect();
        info!(
            "Acquisition starting: source={} sinks={:?} size={} budget={}",
            self.source.name(),
            sink_names,
            self.block.requested_size(),
            if self.budget == UNBOUNDED_COUNT {
                "unbounded".to_string()
            } else {
                self.budget.to_string()
            }
        );
        if self.decode.console {
            info!("HEAD | FPGA | CHANNEL | ORBIT_CNT | BX | MEAS");
        }

        let decoding = self.decoding();
        let mut remaining = self.budget;
        let mut fatal = None;

        while self.state == LoopState::Running {
            if cancel.is_cancelled() {
                info!("Shutdown requested");
                self.state = LoopState::Draining;
                break;
            }
            if self.budget != UNBOUNDED_COUNT {
                if remaining == 0 {
                    debug!("Transfer budget spent");
                    self.state = LoopState::Draining;
                    break;
                }
                remaining -= 1;
            }

            if let Err(e) = self.step(decoding) {
                error!("Fatal acquisition error: {}", e);
                fatal = Some(e);
                self.state = LoopState::Draining;
            }

            if self.stats.transfers % STATS_EVERY == 0 {
                debug!("Acquisition stats: {:?}", self.stats);
            }
        }

        let teardown = self.drain();
        self.state = LoopState::Stopped;
        info!("Acquisition stopped: {:?}", self.stats);

        match (fatal, teardown) {
            (Some(e), _) | (None, Err(e)) => Err(e),
            (None, Ok(())) => Ok(self.stats),
        }
    }

    /// One iteration. Only fatal errors are returned.
    fn step(&mut self, decoding: bool) -> DaqResult<()> {
        self.block.prepare();
        self.stats.transfers += 1;

        if let Err(e) = self.source.read_block(&mut self.block) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("Transfer {} failed: {}", self.stats.transfers, e);
            self.stats.failed += 1;
            return Ok(());
        }

        match self.block.transfer() {
            Transfer::Failed => {
                warn!(
                    "Transfer {} returned {}",
                    self.stats.transfers,
                    self.block.actual_size()
                );
                self.stats.failed += 1;
                return Ok(());
            }
            Transfer::Oversized(n) => {
                warn!(
                    "Transfer {} returned {} bytes, more than the {} requested; discarded",
                    self.stats.transfers,
                    n,
                    self.block.requested_size()
                );
                self.stats.oversized += 1;
                return Ok(());
            }
            Transfer::Empty => {
                info!("Transfer {}: empty read", self.stats.transfers);
                self.stats.empty += 1;
            }
            Transfer::Short(n) => {
                info!(
                    "Transfer {}: short read {}/{} bytes",
                    self.stats.transfers,
                    n,
                    self.block.requested_size()
                );
                self.stats.short += 1;
            }
            Transfer::Full(_) => {}
        }

        let payload = self.block.payload();
        self.stats.accepted_bytes += payload.len() as u64;

        for sink in self.sinks.iter_mut() {
            sink.accept(payload)?;
        }

        if !decoding {
            return Ok(());
        }
        for record in decode_words(payload, self.decode.policy) {
            match record {
                DecodedRecord::Hit(_) => self.stats.hits += 1,
                DecodedRecord::Trigger(_) => self.stats.triggers += 1,
                DecodedRecord::RunControl(_) => self.stats.run_controls += 1,
            }
            if let Some(line) = self.decode.console_line(&record) {
                info!("{line}");
            }
            for sink in self.sinks.iter_mut().filter(|s| s.wants_records()) {
                sink.accept_record(&record)?;
            }
        }
        Ok(())
    }

    /// Close every sink, then the source. Returns the first error.
    fn drain(&mut self) -> DaqResult<()> {
        debug!("Draining {} sink(s)", self.sinks.len());
        let mut first: Option<DaqError> = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.close() {
                error!("Closing sink '{}' failed: {}", sink.name(), e);
                first.get_or_insert(e);
            }
        }
        if let Err(e) = self.source.close() {
            error!("Closing source '{}' failed: {}", self.source.name(), e);
            first.get_or_insert(e);
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::simulation::{SimTransfer, SimulatedSource};
    use daq_common::word::{Hit, RunControl, Trigger};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        payloads: Vec<Vec<u8>>,
        records: Vec<DecodedRecord>,
        closes: u32,
    }

    struct RecordingSink(Arc<Mutex<Recorded>>);

    impl Sink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn accept(&mut self, payload: &[u8]) -> DaqResult<()> {
            self.0.lock().unwrap().payloads.push(payload.to_vec());
            Ok(())
        }

        fn wants_records(&self) -> bool {
            true
        }

        fn accept_record(&mut self, record: &DecodedRecord) -> DaqResult<()> {
            self.0.lock().unwrap().records.push(*record);
            Ok(())
        }

        fn close(&mut self) -> DaqResult<()> {
            self.0.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    fn run_script(script: Vec<SimTransfer>, budget: u32) -> (DaqResult<LoopStats>, Recorded) {
        let shared = Arc::new(Mutex::new(Recorded::default()));
        let source = SimulatedSource::new(TdcMeasPolicy::default()).with_script(script);
        let acquisition = AcquisitionLoop::new(
            Box::new(source),
            vec![Box::new(RecordingSink(shared.clone()))],
            Block::new(0, 64, 0),
            budget,
            DecodeOptions::default(),
        );
        let result = acquisition.run(&CancelToken::new());
        let recorded = std::mem::take(&mut *shared.lock().unwrap());
        (result, recorded)
    }

    #[test]
    fn failed_transfer_reaches_no_sink() {
        let (result, recorded) = run_script(vec![SimTransfer::Fail], 1);
        let stats = result.unwrap();
        assert_eq!(stats.transfers, 1);
        assert_eq!(stats.failed, 1);
        assert!(recorded.payloads.is_empty());
        assert!(recorded.records.is_empty());
        assert_eq!(recorded.closes, 1);
    }

    #[test]
    fn empty_transfer_is_an_empty_write() {
        let (result, recorded) = run_script(vec![SimTransfer::Bytes(0)], 1);
        assert_eq!(result.unwrap().empty, 1);
        assert_eq!(recorded.payloads, vec![Vec::<u8>::new()]);
        assert!(recorded.records.is_empty());
    }

    #[test]
    fn full_transfer_decodes_every_word() {
        let (result, recorded) = run_script(vec![SimTransfer::Full], 1);
        let stats = result.unwrap();
        assert_eq!(recorded.payloads[0].len(), 64);
        assert_eq!(recorded.records.len(), 8);
        assert_eq!(stats.hits, 8);
        assert_eq!(stats.accepted_bytes, 64);
    }

    #[test]
    fn oversized_transfer_is_discarded() {
        let (result, recorded) = run_script(vec![SimTransfer::Bytes(65), SimTransfer::Full], 2);
        let stats = result.unwrap();
        assert_eq!(stats.oversized, 1);
        assert_eq!(recorded.payloads.len(), 1);
    }

    #[test]
    fn trailing_bytes_are_not_decoded() {
        let (result, recorded) = run_script(vec![SimTransfer::Bytes(20)], 1);
        assert_eq!(result.unwrap().short, 1);
        assert_eq!(recorded.payloads[0].len(), 20);
        assert_eq!(recorded.records.len(), 2);
    }

    #[test]
    fn every_attempt_consumes_budget() {
        let (result, recorded) = run_script(
            vec![SimTransfer::Fail, SimTransfer::Fail, SimTransfer::Full],
            2,
        );
        assert_eq!(result.unwrap().transfers, 2);
        assert!(recorded.payloads.is_empty());
    }

    struct SeekFailure;

    impl BlockSource for SeekFailure {
        fn name(&self) -> &'static str {
            "seek-failure"
        }

        fn read_block(&mut self, _block: &mut Block) -> DaqResult<()> {
            Err(DaqError::Seek {
                device: "seek-failure".to_string(),
                requested: 0x100,
                actual: 0,
            })
        }
    }

    #[test]
    fn fatal_error_drains_then_returns() {
        let shared = Arc::new(Mutex::new(Recorded::default()));
        let acquisition = AcquisitionLoop::new(
            Box::new(SeekFailure),
            vec![Box::new(RecordingSink(shared.clone()))],
            Block::new(0x100, 64, 0),
            UNBOUNDED_COUNT,
            DecodeOptions::default(),
        );
        let err = acquisition.run(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, DaqError::Seek { .. }));
        assert_eq!(shared.lock().unwrap().closes, 1);
    }

    #[test]
    fn cancelled_token_stops_before_first_transfer() {
        let shared = Arc::new(Mutex::new(Recorded::default()));
        let cancel = CancelToken::new();
        cancel.cancel();
        let acquisition = AcquisitionLoop::new(
            Box::new(SimulatedSource::new(TdcMeasPolicy::default())),
            vec![Box::new(RecordingSink(shared.clone()))],
            Block::new(0, 64, 0),
            UNBOUNDED_COUNT,
            DecodeOptions::default(),
        );
        let stats = acquisition.run(&cancel).unwrap();
        assert_eq!(stats.transfers, 0);
        assert_eq!(shared.lock().unwrap().closes, 1);
    }

    fn sample_records() -> [DecodedRecord; 3] {
        [
            DecodedRecord::Hit(Hit {
                head: 1,
                fpga: 2,
                tdc_channel: 64,
                orbit_cnt: 1000,
                bx_counter: 12,
                tdc_meas: 7,
            }),
            DecodedRecord::Trigger(Trigger {
                sl: 1,
                mcell: 3,
                tag_orbit: 1000,
                tag_bx: 11,
                bx: 12,
                qual: true,
            }),
            DecodedRecord::RunControl(RunControl {
                runnumber: 42,
                ctrl: 0,
            }),
        ]
    }

    #[test]
    fn console_off_shows_nothing() {
        let options = DecodeOptions {
            tagging: true,
            ..Default::default()
        };
        for record in sample_records() {
            assert_eq!(options.console_line(&record), None);
        }
    }

    #[test]
    fn console_shows_hits_as_table_rows() {
        let options = DecodeOptions {
            console: true,
            ..Default::default()
        };
        let [hit, trigger, run] = sample_records();
        assert_eq!(
            options.console_line(&hit).as_deref(),
            Some(" 1 |  2 |   64 |        1000 |    12 |   7")
        );
        assert_eq!(options.console_line(&trigger), None);
        assert_eq!(options.console_line(&run), None);
    }

    #[test]
    fn tagging_shows_trigger_and_run_control() {
        let options = DecodeOptions {
            console: true,
            tagging: true,
            ..Default::default()
        };
        let [hit, trigger, run] = sample_records();
        assert!(options.console_line(&hit).is_some());
        assert_eq!(
            options.console_line(&trigger).as_deref(),
            Some("TRIGGER sl=1 mcell=3 tag_orbit=1000 tag_bx=11 bx=12 qual=1")
        );
        assert_eq!(options.console_line(&run).as_deref(), Some("RUN runnumber=42 ctrl=0x0"));
    }

    #[test]
    fn console_alone_enables_decoding() {
        let source = SimulatedSource::new(TdcMeasPolicy::default()).with_run_number(5);
        let options = DecodeOptions {
            console: true,
            tagging: true,
            ..Default::default()
        };
        let stats = AcquisitionLoop::new(
            Box::new(source),
            Vec::new(),
            Block::new(0, 16 * 8, 0),
            1,
            options,
        )
        .run(&CancelToken::new())
        .unwrap();
        assert_eq!(stats.run_controls, 1);
        assert_eq!(stats.triggers, 1);
        assert_eq!(stats.hits, 14);
    }
}
