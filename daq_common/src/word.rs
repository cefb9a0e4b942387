//! Front-end word decoding.
//!
//! The readout firmware packs every record into one 64-bit word. The two
//! most significant bits (`head`) select the record layout:
//!
//! | head | Record | Layout (width @ offset) |
//! |------|--------|-------------------------|
//! | 0 | [`RunControl`] | runnumber 32@0, ctrl 30@32 |
//! | 1, 2 | [`Hit`] | tdc_meas 5@0, bx_counter 12@5, orbit_cnt 32@17, tdc_channel 9@49, fpga 4@58 |
//! | 3 | [`Trigger`] | qual 1@0, bx 12@1, tag_bx 12@13, tag_orbit 32@25, mcell 3@57, sl 2@60 |
//!
//! Decoding is total: every `u64` maps to exactly one [`DecodedRecord`].
//!
//! ## Hit corrections
//!
//! - `tdc_channel` is reported 1-based (`raw + 1`), wrapping at the 9-bit
//!   field width: raw 511 reads back as channel 0.
//! - `tdc_meas` is biased by +1 in firmware except on the calibration
//!   channels 137 and 138. How the bias is removed is selected with
//!   [`TdcMeasPolicy`]; all arithmetic wraps at the 5-bit field width.

use crate::consts::{CALIBRATION_CHANNELS, WORD_BYTES};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;
use std::str::FromStr;

/// Bit field inside a 64-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Offset of the least significant bit.
    pub offset: u32,
    /// Width in bits.
    pub width: u32,
}

impl Field {
    /// Create a field descriptor.
    pub const fn new(offset: u32, width: u32) -> Self {
        Self { offset, width }
    }

    /// Mask of `width` low bits.
    #[inline]
    pub const fn mask(self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Extract the field value (shift, then mask).
    #[inline]
    pub const fn extract(self, word: u64) -> u64 {
        (word >> self.offset) & self.mask()
    }

    /// Place a value at the field position. Excess bits are dropped.
    #[inline]
    pub const fn place(self, value: u64) -> u64 {
        (value & self.mask()) << self.offset
    }

    /// First bit above the field.
    pub const fn end(self) -> u32 {
        self.offset + self.width
    }
}

/// Record discriminant, common to all layouts.
pub const HEAD: Field = Field::new(62, 2);

/// Hit word layout.
pub mod hit {
    use super::Field;

    /// TDC fine time (biased by +1 outside calibration channels).
    pub const TDC_MEAS: Field = Field::new(0, 5);
    /// Bunch crossing counter.
    pub const BX_COUNTER: Field = Field::new(5, 12);
    /// Orbit counter.
    pub const ORBIT_CNT: Field = Field::new(17, 32);
    /// Zero-based TDC channel.
    pub const TDC_CHANNEL: Field = Field::new(49, 9);
    /// FPGA index.
    pub const FPGA: Field = Field::new(58, 4);
}

/// Trigger word layout.
pub mod trigger {
    use super::Field;

    /// Trigger quality flag.
    pub const QUAL: Field = Field::new(0, 1);
    /// Bunch crossing of the trigger.
    pub const BX: Field = Field::new(1, 12);
    /// Tagged bunch crossing.
    pub const TAG_BX: Field = Field::new(13, 12);
    /// Tagged orbit.
    pub const TAG_ORBIT: Field = Field::new(25, 32);
    /// Macro cell.
    pub const MCELL: Field = Field::new(57, 3);
    /// Super layer.
    pub const SL: Field = Field::new(60, 2);
}

/// Run-control word layout.
pub mod run_control {
    use super::Field;

    /// Run number.
    pub const RUNNUMBER: Field = Field::new(0, 32);
    /// Control bits.
    pub const CTRL: Field = Field::new(32, 30);
}

// Layouts tile the word exactly below the head field.
const_assert_eq!(hit::TDC_MEAS.end(), hit::BX_COUNTER.offset);
const_assert_eq!(hit::BX_COUNTER.end(), hit::ORBIT_CNT.offset);
const_assert_eq!(hit::ORBIT_CNT.end(), hit::TDC_CHANNEL.offset);
const_assert_eq!(hit::TDC_CHANNEL.end(), hit::FPGA.offset);
const_assert_eq!(hit::FPGA.end(), HEAD.offset);
const_assert_eq!(trigger::QUAL.end(), trigger::BX.offset);
const_assert_eq!(trigger::BX.end(), trigger::TAG_BX.offset);
const_assert_eq!(trigger::TAG_BX.end(), trigger::TAG_ORBIT.offset);
const_assert_eq!(trigger::TAG_ORBIT.end(), trigger::MCELL.offset);
const_assert_eq!(trigger::MCELL.end(), trigger::SL.offset);
const_assert_eq!(trigger::SL.end(), HEAD.offset);
const_assert_eq!(run_control::RUNNUMBER.end(), run_control::CTRL.offset);
const_assert_eq!(run_control::CTRL.end(), HEAD.offset);
const_assert_eq!(HEAD.end(), 64);

/// How the firmware TDC_MEAS bias is removed from hit words.
///
/// Both policies compare against the 1-based (biased) channel number.
/// They name the two readout variants; with the 5-bit wrap they yield the
/// same value for every input, so switching policy does not change the
/// decoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TdcMeasPolicy {
    /// Subtract 1 unless the channel is a calibration channel.
    #[default]
    DecrementUncalibrated,
    /// Subtract 1 from every hit, then add it back on calibration channels.
    RestoreCalibration,
}

impl TdcMeasPolicy {
    /// Correct a raw TDC_MEAS value for the given 1-based channel.
    #[inline]
    pub fn apply(self, raw: u8, tdc_channel: u16) -> u8 {
        let mask = hit::TDC_MEAS.mask() as u8;
        let calibration = is_calibration_channel(tdc_channel);
        match self {
            Self::DecrementUncalibrated => {
                if calibration {
                    raw & mask
                } else {
                    raw.wrapping_sub(1) & mask
                }
            }
            Self::RestoreCalibration => {
                let meas = raw.wrapping_sub(1) & mask;
                if calibration {
                    meas.wrapping_add(1) & mask
                } else {
                    meas
                }
            }
        }
    }

    /// Inverse of [`apply`](Self::apply): recover the raw field value.
    #[inline]
    pub fn unapply(self, tdc_meas: u8, tdc_channel: u16) -> u8 {
        let mask = hit::TDC_MEAS.mask() as u8;
        let calibration = is_calibration_channel(tdc_channel);
        match self {
            Self::DecrementUncalibrated => {
                if calibration {
                    tdc_meas & mask
                } else {
                    tdc_meas.wrapping_add(1) & mask
                }
            }
            Self::RestoreCalibration => {
                let meas = if calibration {
                    tdc_meas.wrapping_sub(1) & mask
                } else {
                    tdc_meas & mask
                };
                meas.wrapping_add(1) & mask
            }
        }
    }

    /// Stable name used in configuration files and on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DecrementUncalibrated => "decrement-uncalibrated",
            Self::RestoreCalibration => "restore-calibration",
        }
    }
}

impl fmt::Display for TdcMeasPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TdcMeasPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decrement-uncalibrated" => Ok(Self::DecrementUncalibrated),
            "restore-calibration" => Ok(Self::RestoreCalibration),
            other => Err(format!(
                "unknown TDC_MEAS policy '{other}' (expected decrement-uncalibrated or restore-calibration)"
            )),
        }
    }
}

/// True for the 1-based calibration channels 137 and 138.
#[inline]
pub fn is_calibration_channel(tdc_channel: u16) -> bool {
    CALIBRATION_CHANNELS.contains(&tdc_channel)
}

/// TDC hit (head 1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Head tag (1 or 2).
    pub head: u8,
    /// FPGA index.
    pub fpga: u8,
    /// 1-based TDC channel (`(raw + 1) & 0x1FF`; raw 511 becomes 0).
    pub tdc_channel: u16,
    /// Orbit counter.
    pub orbit_cnt: u32,
    /// Bunch crossing counter.
    pub bx_counter: u16,
    /// Corrected TDC fine time (0..=31).
    pub tdc_meas: u8,
}

impl Hit {
    fn decode(word: u64, policy: TdcMeasPolicy) -> Self {
        let tdc_channel = ((hit::TDC_CHANNEL.extract(word) + 1) & hit::TDC_CHANNEL.mask()) as u16;
        let raw_meas = hit::TDC_MEAS.extract(word) as u8;
        Self {
            head: HEAD.extract(word) as u8,
            fpga: hit::FPGA.extract(word) as u8,
            tdc_channel,
            orbit_cnt: hit::ORBIT_CNT.extract(word) as u32,
            bx_counter: hit::BX_COUNTER.extract(word) as u16,
            tdc_meas: policy.apply(raw_meas, tdc_channel),
        }
    }

    /// Re-encode into the firmware word, undoing the channel bias and the
    /// TDC_MEAS correction of `policy`.
    pub fn to_word(&self, policy: TdcMeasPolicy) -> u64 {
        let raw_meas = policy.unapply(self.tdc_meas, self.tdc_channel);
        HEAD.place(self.head as u64)
            | hit::FPGA.place(self.fpga as u64)
            | hit::TDC_CHANNEL.place(self.tdc_channel.wrapping_sub(1) as u64)
            | hit::ORBIT_CNT.place(self.orbit_cnt as u64)
            | hit::BX_COUNTER.place(self.bx_counter as u64)
            | hit::TDC_MEAS.place(raw_meas as u64)
    }

    /// Fixed-width console row (`HEAD | FPGA | CHANNEL | ORBIT | BX | MEAS`).
    pub fn table_row(&self) -> TableRow<'_> {
        TableRow(self)
    }
}

/// CSV row in unpacked-file column order.
impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.head, self.fpga, self.tdc_channel, self.orbit_cnt, self.bx_counter, self.tdc_meas
        )
    }
}

/// Console rendering of a [`Hit`].
pub struct TableRow<'a>(&'a Hit);

impl fmt::Display for TableRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = self.0;
        write!(
            f,
            "{:2} | {:2} | {:4} | {:11} | {:5} | {:3}",
            h.head, h.fpga, h.tdc_channel, h.orbit_cnt, h.bx_counter, h.tdc_meas
        )
    }
}

/// Trigger word (head 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    /// Super layer.
    pub sl: u8,
    /// Macro cell.
    pub mcell: u8,
    /// Tagged orbit.
    pub tag_orbit: u32,
    /// Tagged bunch crossing.
    pub tag_bx: u16,
    /// Bunch crossing of the trigger.
    pub bx: u16,
    /// Quality flag.
    pub qual: bool,
}

impl Trigger {
    fn decode(word: u64) -> Self {
        Self {
            sl: trigger::SL.extract(word) as u8,
            mcell: trigger::MCELL.extract(word) as u8,
            tag_orbit: trigger::TAG_ORBIT.extract(word) as u32,
            tag_bx: trigger::TAG_BX.extract(word) as u16,
            bx: trigger::BX.extract(word) as u16,
            qual: trigger::QUAL.extract(word) == 1,
        }
    }

    /// Re-encode into the firmware word.
    pub fn to_word(&self) -> u64 {
        HEAD.place(DecodedRecord::TRIGGER_HEAD as u64)
            | trigger::SL.place(self.sl as u64)
            | trigger::MCELL.place(self.mcell as u64)
            | trigger::TAG_ORBIT.place(self.tag_orbit as u64)
            | trigger::TAG_BX.place(self.tag_bx as u64)
            | trigger::BX.place(self.bx as u64)
            | trigger::QUAL.place(self.qual as u64)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TRIGGER sl={} mcell={} tag_orbit={} tag_bx={} bx={} qual={}",
            self.sl, self.mcell, self.tag_orbit, self.tag_bx, self.bx, self.qual as u8
        )
    }
}

/// Run-control word (head 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunControl {
    /// Run number.
    pub runnumber: u32,
    /// Control bits (30 bits).
    pub ctrl: u32,
}

impl RunControl {
    fn decode(word: u64) -> Self {
        Self {
            runnumber: run_control::RUNNUMBER.extract(word) as u32,
            ctrl: run_control::CTRL.extract(word) as u32,
        }
    }

    /// Re-encode into the firmware word.
    pub fn to_word(&self) -> u64 {
        HEAD.place(DecodedRecord::RUN_CONTROL_HEAD as u64)
            | run_control::CTRL.place(self.ctrl as u64)
            | run_control::RUNNUMBER.place(self.runnumber as u64)
    }
}

impl fmt::Display for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RUN runnumber={} ctrl={:#x}", self.runnumber, self.ctrl)
    }
}

/// One decoded front-end word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedRecord {
    /// Head 0.
    RunControl(RunControl),
    /// Head 1 or 2.
    Hit(Hit),
    /// Head 3.
    Trigger(Trigger),
}

impl DecodedRecord {
    /// Head tag of run-control words.
    pub const RUN_CONTROL_HEAD: u8 = 0;
    /// Head tag of trigger words.
    pub const TRIGGER_HEAD: u8 = 3;

    /// The 2-bit head tag this record was decoded from.
    pub fn head(&self) -> u8 {
        match self {
            Self::RunControl(_) => Self::RUN_CONTROL_HEAD,
            Self::Hit(h) => h.head,
            Self::Trigger(_) => Self::TRIGGER_HEAD,
        }
    }

    /// Re-encode into the firmware word.
    pub fn to_word(&self, policy: TdcMeasPolicy) -> u64 {
        match self {
            Self::RunControl(r) => r.to_word(),
            Self::Hit(h) => h.to_word(policy),
            Self::Trigger(t) => t.to_word(),
        }
    }
}

/// Decode one word. Pure and total.
#[inline]
pub fn decode(word: u64, policy: TdcMeasPolicy) -> DecodedRecord {
    match HEAD.extract(word) {
        0 => DecodedRecord::RunControl(RunControl::decode(word)),
        3 => DecodedRecord::Trigger(Trigger::decode(word)),
        _ => DecodedRecord::Hit(Hit::decode(word, policy)),
    }
}

/// Iterate a byte buffer as host-endian 64-bit words.
///
/// Trailing bytes that do not fill a whole word are ignored.
pub fn words(bytes: &[u8]) -> impl Iterator<Item = u64> + '_ {
    bytes.chunks_exact(WORD_BYTES).map(|chunk| {
        let mut raw = [0u8; WORD_BYTES];
        raw.copy_from_slice(chunk);
        u64::from_ne_bytes(raw)
    })
}

/// Decode every whole word of a byte buffer.
pub fn decode_words(
    bytes: &[u8],
    policy: TdcMeasPolicy,
) -> impl Iterator<Item = DecodedRecord> + '_ {
    words(bytes).map(move |w| decode(w, policy))
}
