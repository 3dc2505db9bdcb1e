//! Per-bus polling engine
//!
//! Owns the devices of one bus and runs the online/offline state machine.
//! One call to [`PollingEngine::run_cycle`] sweeps every device once, in
//! registration order, and emits exactly one [`DeviceUpdate`] per device.
//!
//! Online devices are read every cycle. After `offline_threshold`
//! consecutive failures a device goes offline and is only read every
//! `offline_interval` cycles; the interval doubles (see [`next_interval`])
//! for each further failed attempt. A single successful read brings the
//! device straight back to full rate.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::next_interval;
use super::device::{Device, PollFailure};
use crate::config::PollingConfig;
use crate::error::Result;
use crate::protocols::{Reading, STS_BLOCK_LEN, STS_BLOCK_START};
use crate::transport::RegisterTransport;

/// Outcome tag of one device in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollStatus {
    Ok,
    BackOnline,
    Timeout,
    SetOffline,
    StillOffline,
    OfflineSkip,
}

impl PollStatus {
    /// Status text shown to operators
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BackOnline => "OK (BACK ONLINE)",
            Self::Timeout => "TIMEOUT",
            Self::SetOffline => "TIMEOUT [SET OFFLINE]",
            Self::StillOffline => "TIMEOUT (STILL OFFLINE)",
            Self::OfflineSkip => "OFFLINE (SKIP)",
        }
    }

    /// A reading was obtained
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::BackOnline)
    }

    /// The device was actually addressed on the bus
    pub fn was_polled(&self) -> bool {
        !matches!(self, Self::OfflineSkip)
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PollStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Result of one device in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate {
    pub bus: String,
    pub address: u8,
    /// `None` when nothing was read this cycle
    pub reading: Option<Reading>,
    pub status: PollStatus,
    /// Wall-clock time of the read attempt, 0 when skipped
    pub rtt_ms: f64,
    /// 1-based cycle number shared by every device on the bus
    pub cycle: u64,
    /// The transport explicitly reported a timeout
    pub timed_out: bool,
    pub failure: Option<PollFailure>,
    pub timestamp: DateTime<Utc>,
}

impl DeviceUpdate {
    /// Reading with absence mapped to the legacy all `-1` record
    pub fn reading_or_no_data(&self) -> Reading {
        self.reading.unwrap_or(Reading::NO_DATA)
    }
}

#[derive(Serialize)]
struct WireUpdate<'a> {
    bus: &'a str,
    address: u8,
    reading: Reading,
    status: PollStatus,
    rtt_ms: f64,
    cycle: u64,
    timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<PollFailure>,
    timestamp: DateTime<Utc>,
}

impl Serialize for DeviceUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireUpdate {
            bus: &self.bus,
            address: self.address,
            reading: self.reading_or_no_data(),
            status: self.status,
            rtt_ms: self.rtt_ms,
            cycle: self.cycle,
            timed_out: self.timed_out,
            failure: self.failure,
            timestamp: self.timestamp,
        }
        .serialize(serializer)
    }
}

/// Read-only view of one device's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub address: u8,
    pub online: bool,
    pub consecutive_timeouts: u32,
    pub offline_cycles: u32,
    pub offline_interval: u32,
    pub last_reading: Option<Reading>,
    pub last_rtt_ms: f64,
    pub last_timed_out: bool,
}

#[derive(Debug)]
struct PollEntry {
    device: Device,
    consecutive_timeouts: u32,
    offline_cycles: u32,
    offline_interval: u32,
    last_reading: Option<Reading>,
    last_rtt_ms: f64,
}

impl PollEntry {
    fn new(device: Device, initial_interval: u32) -> Self {
        Self {
            device,
            consecutive_timeouts: 0,
            offline_cycles: 0,
            offline_interval: initial_interval,
            last_reading: None,
            last_rtt_ms: 0.0,
        }
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            address: self.device.address(),
            online: self.device.is_online(),
            consecutive_timeouts: self.consecutive_timeouts,
            offline_cycles: self.offline_cycles,
            offline_interval: self.offline_interval,
            last_reading: self.last_reading,
            last_rtt_ms: self.last_rtt_ms,
            last_timed_out: self.device.last_timed_out(),
        }
    }
}

/// Polling state machine for one bus
#[derive(Debug)]
pub struct PollingEngine {
    bus: String,
    config: PollingConfig,
    entries: Vec<PollEntry>,
    cycle: u64,
}

impl PollingEngine {
    pub fn new(bus: impl Into<String>, config: PollingConfig) -> Self {
        Self {
            bus: bus.into(),
            config,
            entries: Vec::new(),
            cycle: 0,
        }
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Completed cycles
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: u8) -> bool {
        self.entries.iter().any(|e| e.device.address() == address)
    }

    /// Addresses in polling order
    pub fn addresses(&self) -> Vec<u8> {
        self.entries.iter().map(|e| e.device.address()).collect()
    }

    /// Register a device at the end of the polling order.
    ///
    /// Returns `Ok(false)` without change if the address is already present.
    pub fn add_device(&mut self, address: u8) -> Result<bool> {
        if self.contains(address) {
            return Ok(false);
        }
        let device = Device::new(address)?;
        self.entries
            .push(PollEntry::new(device, self.config.initial_offline_interval));
        debug!("Bus {} slave {} added", self.bus, address);
        Ok(true)
    }

    /// Drop a device. Returns false if it was not registered.
    pub fn remove_device(&mut self, address: u8) -> bool {
        match self
            .entries
            .iter()
            .position(|e| e.device.address() == address)
        {
            Some(index) => {
                self.entries.remove(index);
                debug!("Bus {} slave {} removed", self.bus, address);
                true
            }
            None => false,
        }
    }

    pub fn device_status(&self, address: u8) -> Option<DeviceStatus> {
        self.entries
            .iter()
            .find(|e| e.device.address() == address)
            .map(PollEntry::status)
    }

    /// Snapshot of every device in polling order
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.entries.iter().map(PollEntry::status).collect()
    }

    /// Sweep every device once and return the new cycle count.
    ///
    /// `emit` is called once per device, in registration order, before the
    /// next device is polled.
    pub async fn run_cycle<F>(&mut self, transport: &mut dyn RegisterTransport, mut emit: F) -> u64
    where
        F: FnMut(DeviceUpdate),
    {
        let cycle = self.cycle + 1;
        let config = self.config;
        let read_timeout = config.read_timeout();

        for entry in &mut self.entries {
            let address = entry.device.address();
            let was_online = entry.device.is_online();

            if !was_online {
                entry.offline_cycles += 1;
                if entry.offline_cycles < entry.offline_interval {
                    entry.last_rtt_ms = 0.0;
                    emit(DeviceUpdate {
                        bus: self.bus.clone(),
                        address,
                        reading: None,
                        status: PollStatus::OfflineSkip,
                        rtt_ms: 0.0,
                        cycle,
                        timed_out: false,
                        failure: None,
                        timestamp: Utc::now(),
                    });
                    continue;
                }
                entry.offline_cycles = 0;
            }

            let started = Instant::now();
            let outcome = entry
                .device
                .poll(
                    transport,
                    config.function,
                    STS_BLOCK_START,
                    STS_BLOCK_LEN,
                    read_timeout,
                )
                .await;
            let rtt_ms = started.elapsed().as_secs_f64() * 1000.0;
            entry.last_rtt_ms = rtt_ms;

            let update = match outcome {
                Ok(reading) => {
                    entry.last_reading = Some(reading);
                    entry.device.set_online(true);
                    entry.consecutive_timeouts = 0;
                    entry.offline_cycles = 0;
                    entry.offline_interval = config.initial_offline_interval;

                    let status = if was_online {
                        PollStatus::Ok
                    } else {
                        info!("Bus {} slave {} back online", self.bus, address);
                        PollStatus::BackOnline
                    };
                    DeviceUpdate {
                        bus: self.bus.clone(),
                        address,
                        reading: Some(reading),
                        status,
                        rtt_ms,
                        cycle,
                        timed_out: false,
                        failure: None,
                        timestamp: Utc::now(),
                    }
                }
                Err(failure) => {
                    entry.consecutive_timeouts = entry.consecutive_timeouts.saturating_add(1);
                    entry.last_reading = None;
                    let next = next_interval(entry.offline_interval);

                    let status = if was_online {
                        if entry.consecutive_timeouts >= config.offline_threshold {
                            entry.device.set_online(false);
                            entry.offline_cycles = 0;
                            entry.offline_interval = next;
                            warn!(
                                "Bus {} slave {} offline after {} failures, retry every {} cycles",
                                self.bus, address, entry.consecutive_timeouts, next
                            );
                            PollStatus::SetOffline
                        } else {
                            PollStatus::Timeout
                        }
                    } else {
                        entry.offline_interval = next;
                        debug!(
                            "Bus {} slave {} still offline, retry every {} cycles",
                            self.bus, address, next
                        );
                        PollStatus::StillOffline
                    };
                    DeviceUpdate {
                        bus: self.bus.clone(),
                        address,
                        reading: None,
                        status,
                        rtt_ms,
                        cycle,
                        timed_out: entry.device.last_timed_out(),
                        failure: Some(failure),
                        timestamp: Utc::now(),
                    }
                }
            };
            emit(update);
        }

        self.cycle = cycle;
        cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ActiveSource;
    use crate::transport::{SimulatedBus, SimulatedTransport};

    fn healthy_block() -> Vec<u16> {
        let mut regs = vec![0u16; STS_BLOCK_LEN];
        regs[0] = 100;
        regs[1] = 5;
        regs[2] = 230;
        regs[3] = 231;
        regs[15] = 500;
        regs[24] = 2;
        regs
    }

    fn setup(addresses: &[u8]) -> (PollingEngine, SimulatedTransport, SimulatedBus) {
        let config = PollingConfig::default()
            .with_threshold(3)
            .with_initial_interval(5);
        let mut engine = PollingEngine::new("test", config);
        let sim = SimulatedTransport::new("sim");
        let bus = sim.handle();
        for &address in addresses {
            engine.add_device(address).unwrap();
            bus.add_device(address, &healthy_block());
        }
        (engine, sim, bus)
    }

    async fn cycle(engine: &mut PollingEngine, sim: &mut SimulatedTransport) -> Vec<DeviceUpdate> {
        let mut updates = Vec::new();
        engine.run_cycle(sim, |u| updates.push(u)).await;
        updates
    }

    #[tokio::test]
    async fn test_healthy_device_reports_ok() {
        let (mut engine, mut sim, _bus) = setup(&[1]);

        let updates = cycle(&mut engine, &mut sim).await;
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.status, PollStatus::Ok);
        assert_eq!(update.cycle, 1);
        assert!(!update.timed_out);
        assert!(update.failure.is_none());

        let reading = update.reading.unwrap();
        assert_eq!(reading.output_voltage, 100.0);
        assert!((reading.output_current - 0.5).abs() < 1e-9);
        assert_eq!(reading.active_source, ActiveSource::Source2);
    }

    #[tokio::test]
    async fn test_offline_exactly_at_threshold() {
        let (mut engine, mut sim, bus) = setup(&[1]);
        bus.set_reachable(1, false);

        let first = cycle(&mut engine, &mut sim).await;
        assert_eq!(first[0].status, PollStatus::Timeout);
        assert!(first[0].timed_out);
        assert!(engine.device_status(1).unwrap().online);

        let second = cycle(&mut engine, &mut sim).await;
        assert_eq!(second[0].status, PollStatus::Timeout);
        let status = engine.device_status(1).unwrap();
        assert!(status.online);
        assert_eq!(status.consecutive_timeouts, 2);
        // Interval untouched while online
        assert_eq!(status.offline_interval, 5);

        let third = cycle(&mut engine, &mut sim).await;
        assert_eq!(third[0].status, PollStatus::SetOffline);
        assert!(third[0].timed_out);
        assert!(third[0].reading.is_none());
        let status = engine.device_status(1).unwrap();
        assert!(!status.online);
        assert_eq!(status.offline_interval, 10);
        assert_eq!(status.offline_cycles, 0);
    }

    #[tokio::test]
    async fn test_backoff_scenario() {
        let (mut engine, mut sim, bus) = setup(&[1]);
        bus.set_reachable(1, false);

        for _ in 0..3 {
            cycle(&mut engine, &mut sim).await;
        }
        assert_eq!(bus.read_count(1), 3);

        for n in 0..9 {
            let updates = cycle(&mut engine, &mut sim).await;
            let update = &updates[0];
            assert_eq!(update.status, PollStatus::OfflineSkip, "skip {n}");
            assert_eq!(update.rtt_ms, 0.0);
            assert!(!update.timed_out);
            assert!(update.reading.is_none());
            assert!(update.reading_or_no_data().is_no_data());
        }
        assert_eq!(bus.read_count(1), 3);

        let updates = cycle(&mut engine, &mut sim).await;
        assert_eq!(updates[0].status, PollStatus::StillOffline);
        assert!(updates[0].timed_out);
        assert_eq!(bus.read_count(1), 4);
        assert_eq!(engine.device_status(1).unwrap().offline_interval, 20);
        assert_eq!(engine.cycle(), 13);
    }

    #[tokio::test]
    async fn test_back_online_resets_state() {
        let (mut engine, mut sim, bus) = setup(&[1]);
        bus.set_reachable(1, false);

        for _ in 0..3 {
            cycle(&mut engine, &mut sim).await;
        }
        for _ in 0..9 {
            cycle(&mut engine, &mut sim).await;
        }
        // Second failed attempt pushes the interval to 20
        cycle(&mut engine, &mut sim).await;
        assert_eq!(engine.device_status(1).unwrap().offline_interval, 20);

        bus.set_reachable(1, true);
        let mut recovered = None;
        for _ in 0..20 {
            let updates = cycle(&mut engine, &mut sim).await;
            if updates[0].status != PollStatus::OfflineSkip {
                recovered = Some(updates.into_iter().next().unwrap());
                break;
            }
        }

        let update = recovered.unwrap();
        assert_eq!(update.status, PollStatus::BackOnline);
        assert!(update.reading.is_some());
        assert!(!update.timed_out);

        let status = engine.device_status(1).unwrap();
        assert!(status.online);
        assert_eq!(status.offline_interval, 5);
        assert_eq!(status.consecutive_timeouts, 0);
        assert_eq!(status.offline_cycles, 0);

        let next = cycle(&mut engine, &mut sim).await;
        assert_eq!(next[0].status, PollStatus::Ok);
    }

    #[tokio::test]
    async fn test_success_resets_timeout_counter() {
        let (mut engine, mut sim, bus) = setup(&[1]);

        bus.set_reachable(1, false);
        cycle(&mut engine, &mut sim).await;
        cycle(&mut engine, &mut sim).await;
        bus.set_reachable(1, true);
        cycle(&mut engine, &mut sim).await;
        assert_eq!(engine.device_status(1).unwrap().consecutive_timeouts, 0);

        bus.set_reachable(1, false);
        let a = cycle(&mut engine, &mut sim).await;
        let b = cycle(&mut engine, &mut sim).await;
        assert_eq!(a[0].status, PollStatus::Timeout);
        assert_eq!(b[0].status, PollStatus::Timeout);
        assert!(engine.device_status(1).unwrap().online);
    }

    #[tokio::test]
    async fn test_interval_capped_at_sixty() {
        let (mut engine, mut sim, bus) = setup(&[1]);
        bus.set_reachable(1, false);

        for _ in 0..1000 {
            cycle(&mut engine, &mut sim).await;
            assert!(engine.device_status(1).unwrap().offline_interval <= 60);
        }
        assert_eq!(engine.device_status(1).unwrap().offline_interval, 60);
    }

    #[tokio::test]
    async fn test_short_read_keeps_cause() {
        let (mut engine, mut sim, bus) = setup(&[1]);
        bus.set_short_reply(1, Some(12));

        let updates = cycle(&mut engine, &mut sim).await;
        let update = &updates[0];
        assert_eq!(update.status, PollStatus::Timeout);
        assert!(!update.timed_out);
        assert_eq!(
            update.failure,
            Some(PollFailure::ShortRead {
                read: 12,
                expected: 25
            })
        );
        assert_eq!(engine.device_status(1).unwrap().consecutive_timeouts, 1);
    }

    #[tokio::test]
    async fn test_shared_cycle_numbers() {
        let (mut engine, mut sim, bus) = setup(&[1, 2]);
        bus.set_reachable(2, false);

        let mut a_cycles = Vec::new();
        let mut b_cycles = Vec::new();
        for _ in 0..25 {
            for update in cycle(&mut engine, &mut sim).await {
                match update.address {
                    1 => a_cycles.push(update.cycle),
                    2 => b_cycles.push(update.cycle),
                    _ => unreachable!(),
                }
            }
        }

        let expected: Vec<u64> = (1..=25).collect();
        assert_eq!(a_cycles, expected);
        assert_eq!(b_cycles, expected);
        assert_eq!(engine.cycle(), 25);
    }

    #[tokio::test]
    async fn test_updates_in_registration_order() {
        let (mut engine, mut sim, _bus) = setup(&[9, 3, 5]);
        let updates = cycle(&mut engine, &mut sim).await;
        let order: Vec<u8> = updates.iter().map(|u| u.address).collect();
        assert_eq!(order, vec![9, 3, 5]);
    }

    #[tokio::test]
    async fn test_empty_cycle_still_counts() {
        let mut engine = PollingEngine::new("empty", PollingConfig::default());
        let mut sim = SimulatedTransport::new("sim");
        assert_eq!(engine.run_cycle(&mut sim, |_| {}).await, 1);
        assert_eq!(engine.run_cycle(&mut sim, |_| {}).await, 2);
        assert_eq!(engine.cycle(), 2);
    }

    #[test]
    fn test_add_and_remove() {
        let mut engine = PollingEngine::new("test", PollingConfig::default());
        assert!(engine.add_device(1).unwrap());
        assert!(engine.add_device(2).unwrap());
        assert!(!engine.add_device(1).unwrap());
        assert!(engine.add_device(0).is_err());
        assert_eq!(engine.addresses(), vec![1, 2]);

        assert!(!engine.remove_device(7));
        assert_eq!(engine.addresses(), vec![1, 2]);

        assert!(engine.remove_device(1));
        assert_eq!(engine.addresses(), vec![2]);
        assert!(!engine.remove_device(1));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(PollStatus::Ok.to_string(), "OK");
        assert_eq!(PollStatus::BackOnline.to_string(), "OK (BACK ONLINE)");
        assert_eq!(PollStatus::Timeout.to_string(), "TIMEOUT");
        assert_eq!(PollStatus::SetOffline.to_string(), "TIMEOUT [SET OFFLINE]");
        assert_eq!(PollStatus::StillOffline.to_string(), "TIMEOUT (STILL OFFLINE)");
        assert_eq!(PollStatus::OfflineSkip.to_string(), "OFFLINE (SKIP)");
        assert!(!PollStatus::OfflineSkip.was_polled());
        assert!(PollStatus::BackOnline.is_success());
    }

    #[test]
    fn test_serialized_update_uses_no_data_record() {
        let update = DeviceUpdate {
            bus: "line-a".to_string(),
            address: 4,
            reading: None,
            status: PollStatus::OfflineSkip,
            rtt_ms: 0.0,
            cycle: 7,
            timed_out: false,
            failure: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["status"], "OFFLINE (SKIP)");
        assert_eq!(json["reading"]["output_voltage"], -1.0);
        assert_eq!(json["reading"]["active_source"], "none");
        assert!(json.get("failure").is_none());
    }
}
