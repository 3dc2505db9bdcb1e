//! Measurement block decoding
//!
//! Pure functions turning a raw register window into a typed [`Reading`].

use serde::{Deserialize, Serialize};
use std::fmt;

use super::constants::{
    OFFSET_ACTIVE_SOURCE, OFFSET_DIFF_VOLTAGE, OFFSET_FREQUENCY, OFFSET_OUTPUT_CURRENT,
    OFFSET_OUTPUT_VOLTAGE, OFFSET_SOURCE1_VOLTAGE, OFFSET_SOURCE2_VOLTAGE, STS_BLOCK_LEN,
    STS_BLOCK_START, TENTHS,
};

/// Source currently feeding the load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSource {
    #[default]
    None,
    Source1,
    Source2,
}

impl ActiveSource {
    /// Map the selector register. Unknown values display as `None`.
    pub fn from_register(raw: u16) -> Self {
        match raw {
            1 => Self::Source1,
            2 => Self::Source2,
            _ => Self::None,
        }
    }
}

impl fmt::Display for ActiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "-"),
            Self::Source1 => write!(f, "S1"),
            Self::Source2 => write!(f, "S2"),
        }
    }
}

/// One decoded measurement set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Volts
    pub output_voltage: f64,
    /// Amps
    pub output_current: f64,
    /// Volts
    pub source1_voltage: f64,
    /// Volts
    pub source2_voltage: f64,
    /// Volts
    pub diff_voltage: f64,
    /// Hertz
    pub frequency: f64,
    pub active_source: ActiveSource,
}

impl Reading {
    /// Wire-compatible "no data" placeholder.
    ///
    /// Internal code uses `Option<Reading>`; this value only appears where an
    /// observer needs the legacy all `-1` record.
    pub const NO_DATA: Reading = Reading {
        output_voltage: -1.0,
        output_current: -1.0,
        source1_voltage: -1.0,
        source2_voltage: -1.0,
        diff_voltage: -1.0,
        frequency: -1.0,
        active_source: ActiveSource::None,
    };

    /// True for the legacy placeholder
    pub fn is_no_data(&self) -> bool {
        *self == Self::NO_DATA
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out={}V/{:.1}A s1={}V s2={}V diff={}V f={:.1}Hz src={}",
            self.output_voltage,
            self.output_current,
            self.source1_voltage,
            self.source2_voltage,
            self.diff_voltage,
            self.frequency,
            self.active_source
        )
    }
}

/// Decode the full 25-register block starting at 0x0020
pub fn decode_block(regs: &[u16; STS_BLOCK_LEN]) -> Reading {
    Reading {
        output_voltage: f64::from(regs[OFFSET_OUTPUT_VOLTAGE]),
        output_current: f64::from(regs[OFFSET_OUTPUT_CURRENT]) * TENTHS,
        source1_voltage: f64::from(regs[OFFSET_SOURCE1_VOLTAGE]),
        source2_voltage: f64::from(regs[OFFSET_SOURCE2_VOLTAGE]),
        diff_voltage: f64::from(regs[OFFSET_DIFF_VOLTAGE]),
        frequency: f64::from(regs[OFFSET_FREQUENCY]) * TENTHS,
        active_source: ActiveSource::from_register(regs[OFFSET_ACTIVE_SOURCE]),
    }
}

/// Decode a sub-window of the block.
///
/// Registers are placed by address; anything the window does not cover
/// reads as zero. The result is best effort: zeros here mean "not read",
/// not "measured zero".
pub fn decode_partial(start: u16, regs: &[u16]) -> Reading {
    let mut block = [0u16; STS_BLOCK_LEN];
    let block_start = usize::from(STS_BLOCK_START);

    for (i, value) in regs.iter().enumerate() {
        let addr = usize::from(start) + i;
        if let Some(offset) = addr.checked_sub(block_start) {
            if offset < STS_BLOCK_LEN {
                block[offset] = *value;
            }
        }
    }

    decode_block(&block)
}

/// Decode whatever window was read, choosing the exact-block path when possible
pub fn decode_window(start: u16, regs: &[u16]) -> Reading {
    if start == STS_BLOCK_START {
        if let Ok(block) = <&[u16; STS_BLOCK_LEN]>::try_from(regs) {
            return decode_block(block);
        }
    }
    decode_partial(start, regs)
}
