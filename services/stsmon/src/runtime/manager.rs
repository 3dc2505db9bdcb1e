//! Bus lifecycle management
//!
//! Starts one [`BusHandle`] per configured bus and fans their events into a
//! single broadcast channel. A bus that fails to start is reported and
//! skipped; the others keep running.

use futures::future::join_all;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::bus::{BusEvent, BusHandle};
use crate::config::{AppConfig, BusConfig, PollingConfig};
use crate::error::{Result, StsError};
use crate::polling::PollingEngine;
use crate::transport::TransportFactory;

/// Default broadcast buffer; slow observers lag instead of blocking buses
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Owns every running bus
#[derive(Debug)]
pub struct BusManager {
    buses: BTreeMap<String, BusHandle>,
    events: broadcast::Sender<BusEvent>,
    shutdown: CancellationToken,
}

impl Default for BusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BusManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            buses: BTreeMap::new(),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Receive events from every bus started after this call
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    pub fn bus(&self, name: &str) -> Option<&BusHandle> {
        self.buses.get(name)
    }

    pub fn bus_names(&self) -> Vec<String> {
        self.buses.keys().cloned().collect()
    }

    /// Build the transport and spawn the polling task for one bus.
    ///
    /// A construction failure is published as [`BusEvent::Fault`] and
    /// returned; nothing is spawned.
    pub fn start_bus(
        &mut self,
        bus: &BusConfig,
        polling: PollingConfig,
        factory: &dyn TransportFactory,
    ) -> Result<()> {
        if self.buses.contains_key(&bus.name) {
            return Err(StsError::bus(format!("bus '{}' already running", bus.name)));
        }

        match self.build(bus, polling, factory) {
            Ok(handle) => {
                self.buses.insert(bus.name.clone(), handle);
                Ok(())
            }
            Err(e) => {
                error!("Bus {} start failed: {}", bus.name, e);
                let _ = self.events.send(BusEvent::Fault {
                    bus: bus.name.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn build(
        &self,
        bus: &BusConfig,
        polling: PollingConfig,
        factory: &dyn TransportFactory,
    ) -> Result<BusHandle> {
        polling.validate()?;
        let mut engine = PollingEngine::new(bus.name.clone(), polling);
        for &address in &bus.devices {
            engine.add_device(address)?;
        }
        let transport = factory.create(bus)?;
        Ok(BusHandle::spawn(
            engine,
            transport,
            self.events.clone(),
            self.shutdown.child_token(),
        ))
    }

    /// Start every enabled bus; returns how many started.
    ///
    /// Individual failures are already reported as faults and do not stop
    /// the remaining buses.
    pub fn start_from_config(
        &mut self,
        config: &AppConfig,
        factory: &dyn TransportFactory,
    ) -> usize {
        let mut started = 0;
        for bus in config.enabled_buses() {
            let polling = bus.effective_polling(&config.polling);
            if self.start_bus(bus, polling, factory).is_ok() {
                started += 1;
            }
        }
        info!(
            "{} of {} buses started",
            started,
            config.enabled_buses().count()
        );
        started
    }

    /// Stop and forget one bus
    pub async fn stop_bus(&mut self, name: &str) -> Result<()> {
        let handle = self
            .buses
            .remove(name)
            .ok_or_else(|| StsError::bus(format!("bus '{name}' not found")))?;
        handle.stop().await;
        Ok(())
    }

    /// Stop every bus concurrently. Idempotent.
    pub async fn stop_all(&mut self) {
        self.shutdown.cancel();
        join_all(self.buses.values().map(|handle| handle.stop())).await;
        info!("All buses stopped");
    }
}
