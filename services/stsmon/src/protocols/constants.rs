//! Register map and protocol limits for the static transfer switch
//!
//! The switch exposes its measurements as one contiguous block of 16-bit
//! registers. Offsets below are relative to [`STS_BLOCK_START`].

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Address Limits
// ============================================================================

/// Lowest valid slave address on a multi-drop bus
pub const MIN_SLAVE_ID: u8 = 1;

/// Highest valid slave address (248-255 are reserved)
pub const MAX_SLAVE_ID: u8 = 247;

/// Maximum number of registers for FC03/FC04 in one request
///
/// 1 (function) + 1 (byte count) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: usize = 125;

// ============================================================================
// Measurement Block
// ============================================================================

/// First register of the measurement block
pub const STS_BLOCK_START: u16 = 0x0020;

/// Last register of the measurement block (inclusive)
pub const STS_BLOCK_END: u16 = 0x0038;

/// Number of registers in the measurement block
pub const STS_BLOCK_LEN: usize = (STS_BLOCK_END - STS_BLOCK_START) as usize + 1;

/// Output voltage, volts
pub const OFFSET_OUTPUT_VOLTAGE: usize = 0;
/// Output current, 0.1 A
pub const OFFSET_OUTPUT_CURRENT: usize = 1;
/// Source 1 voltage, volts
pub const OFFSET_SOURCE1_VOLTAGE: usize = 2;
/// Source 2 voltage, volts
pub const OFFSET_SOURCE2_VOLTAGE: usize = 3;
/// Differential voltage between sources, volts
pub const OFFSET_DIFF_VOLTAGE: usize = 4;
/// Output frequency, 0.1 Hz (register 0x002F)
pub const OFFSET_FREQUENCY: usize = 0x002F - STS_BLOCK_START as usize;
/// Active source selector (register 0x0038)
pub const OFFSET_ACTIVE_SOURCE: usize = 0x0038 - STS_BLOCK_START as usize;

/// Scale applied to raw current and frequency registers
pub const TENTHS: f64 = 0.1;

// ============================================================================
// Function Codes
// ============================================================================

/// Register read function used for the measurement block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// FC03
    #[default]
    #[serde(alias = "holding")]
    ReadHoldingRegisters,
    /// FC04
    #[serde(alias = "input")]
    ReadInputRegisters,
}

impl FunctionKind {
    /// Wire function code
    pub fn code(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02X}", self.code())
    }
}
