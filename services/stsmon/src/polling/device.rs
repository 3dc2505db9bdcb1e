//! Single addressable switch on a bus

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::trace;

use crate::error::{Result, StsError};
use crate::protocols::constants::{MAX_SLAVE_ID, MIN_SLAVE_ID};
use crate::protocols::{decode_window, FunctionKind, Reading};
use crate::transport::{BlockRead, RegisterTransport};

/// Why a poll produced no reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollFailure {
    /// No response within the read timeout
    Timeout,
    /// A response arrived with fewer registers than requested
    ShortRead { read: usize, expected: usize },
}

impl fmt::Display for PollFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ShortRead { read, expected } => write!(f, "short read {read}/{expected}"),
        }
    }
}

/// Device identity and liveness.
///
/// The online flag is only changed by the polling engine's transition
/// rules; `poll` itself never touches it.
#[derive(Debug, Clone)]
pub struct Device {
    address: u8,
    online: bool,
    last_timed_out: bool,
}

impl Device {
    /// Create an online device. Addresses outside 1..=247 are rejected.
    pub fn new(address: u8) -> Result<Self> {
        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&address) {
            return Err(StsError::validation(format!(
                "slave address {address} outside {MIN_SLAVE_ID}..={MAX_SLAVE_ID}"
            )));
        }
        Ok(Self {
            address,
            online: true,
            last_timed_out: false,
        })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Whether the most recent poll was reported as a timeout
    pub fn last_timed_out(&self) -> bool {
        self.last_timed_out
    }

    pub(super) fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Read `count` registers from `start` and decode them.
    ///
    /// The read is abandoned after `read_timeout` and reported as a timeout.
    pub async fn poll(
        &mut self,
        transport: &mut dyn RegisterTransport,
        function: FunctionKind,
        start: u16,
        count: usize,
        read_timeout: Duration,
    ) -> std::result::Result<Reading, PollFailure> {
        let mut regs = vec![0u16; count];

        let outcome = match tokio::time::timeout(
            read_timeout,
            transport.read_block(function, self.address, start, &mut regs),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => BlockRead::timeout(),
        };
        self.last_timed_out = outcome.timed_out;

        if outcome.timed_out {
            trace!("Slave {} {} timed out", self.address, function);
            return Err(PollFailure::Timeout);
        }
        if outcome.registers_read != count {
            trace!(
                "Slave {} {} returned {}/{} registers",
                self.address,
                function,
                outcome.registers_read,
                count
            );
            return Err(PollFailure::ShortRead {
                read: outcome.registers_read,
                expected: count,
            });
        }

        Ok(decode_window(start, &regs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::{ActiveSource, STS_BLOCK_LEN, STS_BLOCK_START};
    use crate::transport::SimulatedTransport;

    const FC: FunctionKind = FunctionKind::ReadHoldingRegisters;
    const TIMEOUT: Duration = Duration::from_millis(100);

    fn block() -> Vec<u16> {
        let mut regs = vec![0u16; STS_BLOCK_LEN];
        regs[0] = 220;
        regs[1] = 12;
        regs[15] = 499;
        regs[24] = 1;
        regs
    }

    #[test]
    fn test_address_range() {
        assert!(Device::new(0).is_err());
        assert!(Device::new(248).is_err());
        assert!(Device::new(255).is_err());
        assert!(Device::new(1).is_ok());
        assert!(Device::new(247).is_ok());

        let device = Device::new(17).unwrap();
        assert_eq!(device.address(), 17);
        assert!(device.is_online());
        assert!(!device.last_timed_out());
    }

    #[tokio::test]
    async fn test_poll_full_block() {
        let mut sim = SimulatedTransport::new("sim");
        sim.handle().add_device(4, &block());
        let mut device = Device::new(4).unwrap();

        let reading = device
            .poll(&mut sim, FC, STS_BLOCK_START, STS_BLOCK_LEN, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(reading.output_voltage, 220.0);
        assert!((reading.output_current - 1.2).abs() < 1e-9);
        assert!((reading.frequency - 49.9).abs() < 1e-9);
        assert_eq!(reading.active_source, ActiveSource::Source1);
        assert!(!device.last_timed_out());
    }

    #[tokio::test]
    async fn test_poll_sub_window() {
        let mut sim = SimulatedTransport::new("sim");
        sim.handle().add_device(4, &block());
        let mut device = Device::new(4).unwrap();

        let reading = device
            .poll(&mut sim, FC, STS_BLOCK_START, 5, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(reading.output_voltage, 220.0);
        assert_eq!(reading.frequency, 0.0);
        assert_eq!(reading.active_source, ActiveSource::None);
    }

    #[tokio::test]
    async fn test_poll_timeout_flag() {
        let mut sim = SimulatedTransport::new("sim");
        let mut device = Device::new(9).unwrap();

        let result = device
            .poll(&mut sim, FC, STS_BLOCK_START, STS_BLOCK_LEN, TIMEOUT)
            .await;
        assert_eq!(result, Err(PollFailure::Timeout));
        assert!(device.last_timed_out());
        // Liveness is the engine's call
        assert!(device.is_online());
    }

    #[tokio::test]
    async fn test_poll_short_read_is_not_timeout() {
        let mut sim = SimulatedTransport::new("sim");
        let bus = sim.handle();
        bus.add_device(2, &block());
        bus.set_short_reply(2, Some(20));
        let mut device = Device::new(2).unwrap();

        let result = device
            .poll(&mut sim, FC, STS_BLOCK_START, STS_BLOCK_LEN, TIMEOUT)
            .await;
        assert_eq!(
            result,
            Err(PollFailure::ShortRead {
                read: 20,
                expected: 25
            })
        );
        assert!(!device.last_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_bounded_by_timeout() {
        let mut sim = SimulatedTransport::new("sim");
        let bus = sim.handle();
        bus.add_device(3, &block());
        bus.set_latency(Duration::from_secs(5), Duration::ZERO);
        let mut device = Device::new(3).unwrap();

        let started = tokio::time::Instant::now();
        let result = device
            .poll(&mut sim, FC, STS_BLOCK_START, STS_BLOCK_LEN, TIMEOUT)
            .await;
        assert_eq!(result, Err(PollFailure::Timeout));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(device.last_timed_out());
    }
}
