//! Transport Factory
//!
//! Builds the transport for a bus from its configuration. A failure here is
//! fatal to that bus only: the bus never starts and the error is reported.

use std::time::Duration;
use tracing::debug;

use super::simulated::SimulatedTransport;
use super::traits::RegisterTransport;
use crate::config::{default_registers, BusConfig, TransportConfig};
use crate::error::{Result, StsError};
use crate::protocols::constants::{MAX_SLAVE_ID, MIN_SLAVE_ID};

/// Creates one transport per bus
pub trait TransportFactory: Send + Sync {
    fn create(&self, bus: &BusConfig) -> Result<Box<dyn RegisterTransport>>;
}

/// Builds transports from [`TransportConfig`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, bus: &BusConfig) -> Result<Box<dyn RegisterTransport>> {
        match &bus.transport {
            TransportConfig::Simulated {
                latency_ms,
                jitter_ms,
                devices,
            } => {
                let sim = SimulatedTransport::new(format!("sim:{}", bus.name));
                let handle = sim.handle();
                handle.set_latency(
                    Duration::from_millis(*latency_ms),
                    Duration::from_millis(*jitter_ms),
                );

                if devices.is_empty() {
                    let block = default_registers();
                    for &address in &bus.devices {
                        handle.add_device(address, &block);
                    }
                } else {
                    for device in devices {
                        if !(MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&device.address) {
                            return Err(StsError::transport(format!(
                                "bus '{}': simulated slave {} out of range",
                                bus.name, device.address
                            )));
                        }
                        handle.add_device(device.address, &device.registers);
                        handle.set_reachable(device.address, device.reachable);
                    }
                }

                debug!(
                    "Bus {} simulated transport ready (latency {}ms, jitter {}ms)",
                    bus.name, latency_ms, jitter_ms
                );
                Ok(Box::new(sim))
            }
        }
    }
}
