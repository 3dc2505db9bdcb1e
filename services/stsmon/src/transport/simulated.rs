//! In-memory simulated bus
//!
//! Answers block reads from per-slave register banks. Used for bench runs
//! without hardware and throughout the test suite. Runtime behavior
//! (reachability, short replies, register values) is changed through a
//! cloned [`SimulatedBus`] handle while the transport is owned by a bus task.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::traits::{BlockRead, RegisterTransport};
use crate::protocols::{FunctionKind, STS_BLOCK_START};

#[derive(Debug, Default)]
struct SimDevice {
    registers: HashMap<u16, u16>,
    reachable: bool,
    short_reply: Option<usize>,
    reads: u64,
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<u8, SimDevice>,
    closed: bool,
    close_count: u32,
    latency: Duration,
    jitter: Duration,
}

/// Shared control handle for a [`SimulatedTransport`]
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    /// Add (or replace) a reachable slave whose registers start at 0x0020.
    ///
    /// Values past the end of the register space are dropped.
    pub fn add_device(&self, slave_id: u8, block: &[u16]) {
        let mut device = SimDevice {
            reachable: true,
            ..SimDevice::default()
        };
        device
            .registers
            .extend((STS_BLOCK_START..=u16::MAX).zip(block.iter().copied()));
        self.state.lock().devices.insert(slave_id, device);
    }

    /// Remove a slave; reads addressed to it time out
    pub fn remove_device(&self, slave_id: u8) {
        self.state.lock().devices.remove(&slave_id);
    }

    /// Overwrite registers of an existing slave starting at `start`
    pub fn set_registers(&self, slave_id: u8, start: u16, values: &[u16]) {
        if let Some(device) = self.state.lock().devices.get_mut(&slave_id) {
            device
                .registers
                .extend((start..=u16::MAX).zip(values.iter().copied()));
        }
    }

    /// Make a slave stop (or resume) answering
    pub fn set_reachable(&self, slave_id: u8, reachable: bool) {
        if let Some(device) = self.state.lock().devices.get_mut(&slave_id) {
            device.reachable = reachable;
        }
    }

    /// Truncate replies from a slave to `limit` registers (`None` restores full replies)
    pub fn set_short_reply(&self, slave_id: u8, limit: Option<usize>) {
        if let Some(device) = self.state.lock().devices.get_mut(&slave_id) {
            device.short_reply = limit;
        }
    }

    /// Fixed response latency plus uniform jitter in `[0, jitter]`
    pub fn set_latency(&self, latency: Duration, jitter: Duration) {
        let mut state = self.state.lock();
        state.latency = latency;
        state.jitter = jitter;
    }

    /// Number of reads addressed to a slave so far
    pub fn read_count(&self, slave_id: u8) -> u64 {
        self.state
            .lock()
            .devices
            .get(&slave_id)
            .map_or(0, |d| d.reads)
    }

    /// Number of times the transport was closed
    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Simulated register transport
#[derive(Debug)]
pub struct SimulatedTransport {
    name: String,
    bus: SimulatedBus,
}

impl SimulatedTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bus: SimulatedBus::default(),
        }
    }

    /// Control handle sharing this transport's state
    pub fn handle(&self) -> SimulatedBus {
        self.bus.clone()
    }

    fn response_delay(&self) -> Duration {
        let state = self.bus.state.lock();
        if state.jitter.is_zero() {
            return state.latency;
        }
        let extra = rand::thread_rng().gen_range(0..=state.jitter.as_micros() as u64);
        state.latency + Duration::from_micros(extra)
    }
}

#[async_trait]
impl RegisterTransport for SimulatedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_block(
        &mut self,
        function: FunctionKind,
        slave_id: u8,
        start: u16,
        dest: &mut [u16],
    ) -> BlockRead {
        let delay = self.response_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.bus.state.lock();
        if state.closed {
            return BlockRead::short(0);
        }

        let Some(device) = state.devices.get_mut(&slave_id) else {
            trace!("{} {} slave {} absent", self.name, function, slave_id);
            return BlockRead::timeout();
        };
        device.reads += 1;

        if !device.reachable {
            trace!("{} {} slave {} silent", self.name, function, slave_id);
            return BlockRead::timeout();
        }

        let count = device
            .short_reply
            .map_or(dest.len(), |limit| limit.min(dest.len()));
        for (i, slot) in dest.iter_mut().take(count).enumerate() {
            *slot = device
                .registers
                .get(&start.wrapping_add(i as u16))
                .copied()
                .unwrap_or(0);
        }

        if count == dest.len() {
            BlockRead::complete(count)
        } else {
            BlockRead::short(count)
        }
    }

    fn close(&mut self) {
        let mut state = self.bus.state.lock();
        state.closed = true;
        state.close_count += 1;
    }
}
