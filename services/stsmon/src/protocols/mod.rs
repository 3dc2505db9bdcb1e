//! Static transfer switch register protocol
//!
//! Register map constants and the pure decoder. Framing and CRC belong to
//! the transport collaborator.

pub mod constants;
pub mod registers;

pub use constants::{FunctionKind, STS_BLOCK_LEN, STS_BLOCK_START};
pub use registers::{decode_block, decode_partial, decode_window, ActiveSource, Reading};
