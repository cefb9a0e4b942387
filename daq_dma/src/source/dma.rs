//! DMA card-to-host character device.
//!
//! The device is opened read/write and non-blocking. Every transfer selects
//! the bus address with a seek (when non-zero) and then issues one read. In
//! chunked mode a request above the platform ceiling is split into
//! consecutive sub-transfers, each re-seeking to `address + done`.

use super::BlockSource;
use crate::block::Block;
use crate::error::{DaqError, DaqResult};
use daq_common::config::DaqConfig;
use daq_common::consts::RW_MAX_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Registry name of this source.
pub const NAME: &str = "dma";

/// Factory for the source registry.
pub fn create_source(config: &DaqConfig) -> DaqResult<Box<dyn BlockSource>> {
    let device = DmaDevice::open(&config.device.path)?.with_chunking(config.device.chunked);
    Ok(Box::new(device))
}

/// Open DMA channel.
#[derive(Debug)]
pub struct DmaDevice {
    path: PathBuf,
    file: Option<File>,
    chunked: bool,
    chunk_limit: usize,
}

impl DmaDevice {
    /// Open the device node read/write with `O_NONBLOCK`.
    ///
    /// # Errors
    /// Returns `DaqError::DeviceOpen` when the node cannot be opened.
    pub fn open(path: &Path) -> DaqResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| DaqError::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Opened DMA device {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            chunked: false,
            chunk_limit: RW_MAX_SIZE,
        })
    }

    /// Split transfers larger than the chunk limit into sub-transfers.
    pub fn with_chunking(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    /// Override the sub-transfer ceiling (defaults to `RW_MAX_SIZE`).
    pub fn with_chunk_limit(mut self, limit: usize) -> Self {
        self.chunk_limit = limit.max(1);
        self
    }

    /// Device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> DaqResult<&mut File> {
        self.file.as_mut().ok_or_else(|| DaqError::Transfer {
            device: self.path.display().to_string(),
            source: std::io::Error::from_raw_os_error(libc::EBADF),
        })
    }

    fn select(&mut self, address: u64) -> DaqResult<()> {
        let device = self.path.display().to_string();
        let actual = self.file()?.seek(SeekFrom::Start(address))?;
        if actual != address {
            return Err(DaqError::Seek {
                device,
                requested: address,
                actual,
            });
        }
        Ok(())
    }

    fn transfer_error(&self, source: std::io::Error) -> DaqError {
        DaqError::Transfer {
            device: self.path.display().to_string(),
            source,
        }
    }

    fn read_whole(&mut self, address: u64, buf: &mut [u8]) -> DaqResult<usize> {
        if address != 0 {
            self.select(address)?;
        }
        let result = self.file()?.read(buf);
        result.map_err(|e| self.transfer_error(e))
    }

    fn read_chunked(&mut self, address: u64, buf: &mut [u8]) -> DaqResult<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            let want = (buf.len() - done).min(self.chunk_limit);
            if address != 0 {
                self.select(address + done as u64)?;
            }
            let result = self.file()?.read(&mut buf[done..done + want]);
            let n = result.map_err(|e| self.transfer_error(e))?;
            done += n;
            if n != want {
                debug!("{}: short sub-transfer {n}/{want} at {done:#x}", self.path.display());
                break;
            }
        }
        Ok(done)
    }
}

impl BlockSource for DmaDevice {
    fn name(&self) -> &'static str {
        NAME
    }

    fn read_block(&mut self, block: &mut Block) -> DaqResult<()> {
        let address = block.address() as u64;
        let chunked = self.chunked && block.requested_size() as usize > self.chunk_limit;
        let result = if chunked {
            self.read_chunked(address, block.transfer_buf_mut())
        } else {
            self.read_whole(address, block.transfer_buf_mut())
        };
        match result {
            Ok(n) => {
                block.set_actual_size(n as i64);
                Ok(())
            }
            Err(e) => {
                block.set_actual_size(-1);
                Err(e)
            }
        }
    }

    fn close(&mut self) -> DaqResult<()> {
        if self.file.take().is_some() {
            info!("Closed DMA device {}", self.path.display());
        } else {
            warn!("DMA device {} already closed", self.path.display());
        }
        Ok(())
    }
}
