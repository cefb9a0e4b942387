//! Rotating file sink.
//!
//! Writes two co-indexed streams per rotation epoch:
//!
//! | Stream | Path | Content |
//! |--------|------|---------|
//! | raw | `<raw_base>_NNNNNN.dat` | accepted payloads, byte for byte |
//! | unpacked | `<unpacked_base>_NNNNNN.txt` | header, then one CSV row per hit |
//!
//! The pair is rotated when a block arrives and the current pair already
//! holds `rotation_blocks` blocks. Empty blocks count.

use super::Sink;
use crate::error::{DaqError, DaqResult};
use daq_common::config::FileSinkConfig;
use daq_common::consts::{RAW_EXTENSION, UNPACKED_EXTENSION, UNPACKED_HEADER};
use daq_common::word::DecodedRecord;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Path of epoch `index` for `base` (`<base>_NNNNNN.<extension>`).
pub fn epoch_path(base: &Path, index: u32, extension: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!("_{index:06}.{extension}"));
    PathBuf::from(name)
}

struct Stream {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Stream {
    fn create(path: PathBuf) -> DaqResult<Self> {
        match File::create(&path) {
            Ok(file) => Ok(Self {
                path,
                writer: BufWriter::new(file),
            }),
            Err(source) => Err(DaqError::Rotation { path, source }),
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.writer.write_all(bytes) {
            warn!("Write to {} failed: {}", self.path.display(), e);
        }
    }

    fn finish(mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Flush of {} failed: {}", self.path.display(), e);
        }
    }
}

struct FilePair {
    raw: Stream,
    unpacked: Stream,
}

/// Raw + unpacked file pair with block-count rotation.
pub struct RotatingFileSink {
    raw_base: PathBuf,
    unpacked_base: PathBuf,
    rotation_blocks: u32,
    index: u32,
    blocks_in_pair: u32,
    pair: Option<FilePair>,
    row: String,
}

impl RotatingFileSink {
    /// Open pair `000000`.
    ///
    /// # Errors
    /// Returns `DaqError::Rotation` if either file cannot be created.
    pub fn open(config: &FileSinkConfig) -> DaqResult<Self> {
        let mut sink = Self {
            raw_base: config.raw_base.clone(),
            unpacked_base: config.unpacked_base.clone(),
            rotation_blocks: config.rotation_blocks.max(1),
            index: 0,
            blocks_in_pair: 0,
            pair: None,
            row: String::with_capacity(64),
        };
        sink.pair = Some(sink.open_pair()?);
        Ok(sink)
    }

    /// Epoch index of the current pair.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Blocks written to the current pair.
    pub fn blocks_in_pair(&self) -> u32 {
        self.blocks_in_pair
    }

    fn open_pair(&self) -> DaqResult<FilePair> {
        let raw = Stream::create(epoch_path(&self.raw_base, self.index, RAW_EXTENSION))?;
        let mut unpacked = Stream::create(epoch_path(
            &self.unpacked_base,
            self.index,
            UNPACKED_EXTENSION,
        ))?;
        unpacked.write(UNPACKED_HEADER.as_bytes());
        unpacked.write(b"\n");
        info!(
            "Opened output pair {} / {}",
            raw.path.display(),
            unpacked.path.display()
        );
        Ok(FilePair { raw, unpacked })
    }

    fn rotate(&mut self) -> DaqResult<()> {
        if let Some(pair) = self.pair.take() {
            pair.raw.finish();
            pair.unpacked.finish();
        }
        self.index += 1;
        self.blocks_in_pair = 0;
        debug!("Rotating output files to epoch {:06}", self.index);
        self.pair = Some(self.open_pair()?);
        Ok(())
    }
}

impl Sink for RotatingFileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn accept(&mut self, payload: &[u8]) -> DaqResult<()> {
        if self.pair.is_none() {
            warn!("File sink is closed; dropping {} bytes", payload.len());
            return Ok(());
        }
        if self.blocks_in_pair >= self.rotation_blocks {
            self.rotate()?;
        }
        if let Some(pair) = self.pair.as_mut() {
            pair.raw.write(payload);
        }
        self.blocks_in_pair += 1;
        Ok(())
    }

    fn wants_records(&self) -> bool {
        true
    }

    fn accept_record(&mut self, record: &DecodedRecord) -> DaqResult<()> {
        let DecodedRecord::Hit(hit) = record else {
            return Ok(());
        };
        let Some(pair) = self.pair.as_mut() else {
            return Ok(());
        };
        use std::fmt::Write as _;
        self.row.clear();
        // Formatting into a String cannot fail.
        let _ = writeln!(self.row, "{hit}");
        pair.unpacked.write(self.row.as_bytes());
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        if let Some(pair) = self.pair.take() {
            pair.raw.finish();
            pair.unpacked.finish();
            info!("Closed output pair {:06}", self.index);
        }
        Ok(())
    }
}
