//! Transport Layer Traits
//!
//! The polling engine sees a bus only through [`RegisterTransport`]: a
//! block read that reports how many registers arrived and whether the
//! request timed out. Framing, CRC and port handling live behind it.

use async_trait::async_trait;
use std::fmt;

use crate::protocols::FunctionKind;

/// Outcome of one block read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockRead {
    /// Registers actually written into the destination buffer
    pub registers_read: usize,
    /// The transport gave up waiting for a response
    pub timed_out: bool,
}

impl BlockRead {
    /// All requested registers arrived
    pub fn complete(count: usize) -> Self {
        Self {
            registers_read: count,
            timed_out: false,
        }
    }

    /// No response within the timeout window
    pub fn timeout() -> Self {
        Self {
            registers_read: 0,
            timed_out: true,
        }
    }

    /// A response arrived but carried fewer registers than requested,
    /// or the request failed for a reason other than a timeout
    pub fn short(registers_read: usize) -> Self {
        Self {
            registers_read,
            timed_out: false,
        }
    }

    /// True when `expected` registers arrived without a timeout
    pub fn is_complete(&self, expected: usize) -> bool {
        !self.timed_out && self.registers_read == expected
    }
}

/// Register read port bound to one physical bus
///
/// Implementations never fail a read: I/O errors, malformed responses and
/// timeouts are reported through [`BlockRead`]. A read future may be
/// dropped mid-flight when the caller's timeout fires; the next read must
/// still work.
#[async_trait]
pub trait RegisterTransport: Send + fmt::Debug {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Read `dest.len()` registers starting at `start` from `slave_id`
    async fn read_block(
        &mut self,
        function: FunctionKind,
        slave_id: u8,
        start: u16,
        dest: &mut [u16],
    ) -> BlockRead;

    /// Release the underlying resource.
    ///
    /// Called at most once per transport by [`super::TransportGuard`].
    fn close(&mut self);
}
