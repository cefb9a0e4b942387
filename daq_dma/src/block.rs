//! Acquisition buffer and transfer classification.
//!
//! One [`Block`] is allocated before the loop starts and reused for every
//! transfer. The transfer region starts `page_offset` bytes into the
//! allocation and is refilled with the page-offset byte before each read, so
//! bytes a short read did not touch are recognisable in a dump.

use daq_common::consts::PAGE_SIZE;

/// Reusable acquisition buffer.
#[derive(Debug)]
pub struct Block {
    /// Bus address selected before the transfer.
    address: u32,
    /// Allocation: `page_offset` lead-in followed by the transfer region.
    data: Vec<u8>,
    /// Start of the transfer region inside `data`.
    page_offset: usize,
    /// Bytes requested per transfer.
    requested_size: u32,
    /// Bytes returned by the last transfer (negative = failed).
    actual_size: i64,
}

impl Block {
    /// Allocate a block for transfers of `requested_size` bytes.
    ///
    /// `page_offset` is masked to the page size.
    pub fn new(address: u32, requested_size: u32, page_offset: u32) -> Self {
        let page_offset = (page_offset & (PAGE_SIZE - 1)) as usize;
        Self {
            address,
            data: vec![0u8; page_offset + requested_size as usize],
            page_offset,
            requested_size,
            actual_size: 0,
        }
    }

    /// Bus address of every transfer into this block.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Bytes requested per transfer.
    pub fn requested_size(&self) -> u32 {
        self.requested_size
    }

    /// Result of the last transfer.
    pub fn actual_size(&self) -> i64 {
        self.actual_size
    }

    /// Record the result of a transfer.
    pub fn set_actual_size(&mut self, actual_size: i64) {
        self.actual_size = actual_size;
    }

    /// Reset before a transfer: fill the region with the page-offset byte
    /// and mark the block as failed until a source reports a result.
    pub fn prepare(&mut self) {
        let pattern = self.page_offset as u8;
        self.transfer_buf_mut().fill(pattern);
        self.actual_size = -1;
    }

    /// Transfer region handed to the source.
    pub fn transfer_buf_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.page_offset..]
    }

    /// Bytes accepted from the last transfer.
    ///
    /// Empty for failed, empty and oversized transfers.
    pub fn payload(&self) -> &[u8] {
        let len = self.transfer().accepted_len();
        &self.data[self.page_offset..self.page_offset + len]
    }

    /// Classification of the last transfer.
    pub fn transfer(&self) -> Transfer {
        Transfer::classify(self.actual_size, self.requested_size)
    }
}

/// Outcome of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Negative result: nothing usable, iteration skipped.
    Failed,
    /// Zero bytes: accepted as an empty block.
    Empty,
    /// Fewer bytes than requested: accepted as a partial block.
    Short(usize),
    /// Exactly the requested size.
    Full(usize),
    /// More bytes than requested: discarded.
    Oversized(i64),
}

impl Transfer {
    /// Classify a raw transfer result against the requested size.
    pub fn classify(actual: i64, requested: u32) -> Self {
        let requested = requested as i64;
        if actual < 0 {
            Self::Failed
        } else if actual == 0 {
            Self::Empty
        } else if actual < requested {
            Self::Short(actual as usize)
        } else if actual == requested {
            Self::Full(actual as usize)
        } else {
            Self::Oversized(actual)
        }
    }

    /// True when the block goes on to the sinks.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Empty | Self::Short(_) | Self::Full(_))
    }

    /// Number of payload bytes handed to the sinks.
    pub fn accepted_len(self) -> usize {
        match self {
            Self::Short(n) | Self::Full(n) => n,
            Self::Failed | Self::Empty | Self::Oversized(_) => 0,
        }
    }
}
