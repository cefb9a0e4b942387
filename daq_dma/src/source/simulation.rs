//! Simulation source.
//!
//! The `SimulatedSource` implements [`BlockSource`] without hardware: it
//! fills each block with encoded front-end words (hits with a trigger word
//! every [`TRIGGER_EVERY`] words, and a leading run-control word on the
//! first transfer when a run number is configured).
//!
//! A transfer script can replace the default "always full" behaviour to
//! exercise empty, short, failed and oversized transfers.

use super::BlockSource;
use crate::block::Block;
use crate::error::{DaqError, DaqResult};
use daq_common::config::DaqConfig;
use daq_common::consts::WORD_BYTES;
use daq_common::word::{Hit, RunControl, TdcMeasPolicy, Trigger};
use std::collections::VecDeque;
use tracing::debug;

/// Registry name of this source.
pub const NAME: &str = "simulation";

/// One trigger word is emitted per this many words.
pub const TRIGGER_EVERY: u64 = 16;

/// Factory for the source registry.
pub fn create_source(config: &DaqConfig) -> DaqResult<Box<dyn BlockSource>> {
    let mut source = SimulatedSource::new(config.acquisition.tdc_meas_policy);
    if let Some(run_number) = config.acquisition.run_number {
        source = source.with_run_number(run_number);
    }
    Ok(Box::new(source))
}

/// Scripted transfer outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimTransfer {
    /// Fill the whole block.
    Full,
    /// Report `n` bytes (0 = empty, larger than the block = oversized).
    Bytes(i64),
    /// Fail the transfer.
    Fail,
}

/// Software block source.
#[derive(Debug)]
pub struct SimulatedSource {
    policy: TdcMeasPolicy,
    run_number: Option<u32>,
    script: VecDeque<SimTransfer>,
    transfers: u64,
    words: u64,
}

impl SimulatedSource {
    /// Create a source producing full blocks.
    ///
    /// Hit words are encoded so that decoding with `policy` yields the
    /// generated field values.
    pub fn new(policy: TdcMeasPolicy) -> Self {
        Self {
            policy,
            run_number: None,
            script: VecDeque::new(),
            transfers: 0,
            words: 0,
        }
    }

    /// Lead the first transfer with a run-control word.
    pub fn with_run_number(mut self, run_number: u32) -> Self {
        self.run_number = Some(run_number);
        self
    }

    /// Outcomes of the next transfers, in order. Once the script runs out
    /// every transfer is full.
    pub fn with_script(mut self, script: impl IntoIterator<Item = SimTransfer>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    /// Transfers performed so far.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    fn next_word(&mut self) -> u64 {
        let n = self.words;
        self.words += 1;

        if n == 0 {
            if let Some(runnumber) = self.run_number {
                return RunControl { runnumber, ctrl: 0 }.to_word();
            }
        }

        if n % TRIGGER_EVERY == TRIGGER_EVERY - 1 {
            return Trigger {
                sl: (n % 4) as u8,
                mcell: (n % 8) as u8,
                tag_orbit: self.transfers as u32,
                tag_bx: (n % 3564) as u16,
                bx: ((n + 1) % 3564) as u16,
                qual: n % 2 == 0,
            }
            .to_word();
        }

        Hit {
            head: 1 + (n % 2) as u8,
            fpga: (n % 16) as u8,
            tdc_channel: ((n + 1) % 512) as u16,
            orbit_cnt: self.transfers as u32,
            bx_counter: (n % 3564) as u16,
            tdc_meas: (n % 32) as u8,
        }
        .to_word(self.policy)
    }

    fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(WORD_BYTES) {
            let word = self.next_word();
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
    }
}

impl BlockSource for SimulatedSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn read_block(&mut self, block: &mut Block) -> DaqResult<()> {
        self.transfers += 1;
        let requested = block.requested_size() as usize;
        let outcome = self.script.pop_front().unwrap_or(SimTransfer::Full);
        debug!("simulated transfer {}: {:?}", self.transfers, outcome);

        match outcome {
            SimTransfer::Full => {
                self.fill(block.transfer_buf_mut());
                block.set_actual_size(requested as i64);
            }
            SimTransfer::Bytes(n) if n < 0 => {
                block.set_actual_size(-1);
                return Err(simulated_failure());
            }
            SimTransfer::Bytes(n) => {
                let filled = (n as usize).min(requested);
                self.fill(&mut block.transfer_buf_mut()[..filled]);
                block.set_actual_size(n);
            }
            SimTransfer::Fail => {
                block.set_actual_size(-1);
                return Err(simulated_failure());
            }
        }
        Ok(())
    }
}

fn simulated_failure() -> DaqError {
    DaqError::Transfer {
        device: NAME.to_string(),
        source: std::io::Error::from_raw_os_error(libc::EIO),
    }
}
