//! Run directory allocation.
//!
//! Each run writes into `<data_dir>/RunNNNNNN`, numbered one above the
//! highest existing run. If that directory is already present the run falls
//! back to `Run999999` so existing data is never overwritten.

use crate::error::DaqResult;
use daq_common::consts::{FALLBACK_RUN_NUMBER, RUN_DIR_PREFIX};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Allocated run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    number: u32,
    path: PathBuf,
}

impl RunDirectory {
    /// Scan `data_dir` (created if missing) and create the next run
    /// directory.
    ///
    /// # Errors
    /// Returns `DaqError::Io` if `data_dir` cannot be read or the run
    /// directory cannot be created.
    pub fn allocate(data_dir: &Path) -> DaqResult<Self> {
        fs::create_dir_all(data_dir)?;

        let mut last: Option<u32> = None;
        for entry in fs::read_dir(data_dir)? {
            let entry = entry?;
            if let Some(number) = entry.file_name().to_str().and_then(parse_run_name) {
                last = Some(last.map_or(number, |l| l.max(number)));
            }
        }
        let number = last.map_or(0, |l| l.saturating_add(1));
        let path = data_dir.join(run_name(number));

        if path.exists() {
            warn!(
                "Run folder {} already exists; using run number {}",
                path.display(),
                FALLBACK_RUN_NUMBER
            );
            let path = data_dir.join(run_name(FALLBACK_RUN_NUMBER));
            fs::create_dir_all(&path)?;
            return Ok(Self {
                number: FALLBACK_RUN_NUMBER,
                path,
            });
        }

        fs::create_dir(&path)?;
        info!("Starting {}", path.display());
        Ok(Self { number, path })
    }

    /// Run number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory name of run `number` (`Run000042`).
pub fn run_name(number: u32) -> String {
    format!("{RUN_DIR_PREFIX}{number:06}")
}

fn parse_run_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(RUN_DIR_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
