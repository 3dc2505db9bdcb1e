//! Service configuration
//!
//! Loaded from a YAML file with `STSMON_` environment overrides, nested keys
//! separated by `__` (e.g. `STSMON_POLLING__CYCLE_DELAY_MS=100`).

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StsError};
use crate::polling::MAX_OFFLINE_INTERVAL;
use crate::protocols::constants::{MAX_SLAVE_ID, MIN_SLAVE_ID, STS_BLOCK_START};
use crate::protocols::FunctionKind;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "STSMON_";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/stsmon.yaml";

/// Register values a simulated device can hold from the block start upwards
const MAX_SIMULATED_REGISTERS: usize = u16::MAX as usize - STS_BLOCK_START as usize + 1;

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub buses: Vec<BusConfig>,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Enables the rolling file log when set
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_dir: None,
        }
    }
}

fn default_service_name() -> String {
    "stsmon".to_string()
}

/// Polling engine and scheduler parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Offline poll interval (cycles) restored whenever a device comes back
    #[serde(default = "default_initial_offline_interval")]
    pub initial_offline_interval: u32,
    /// Consecutive failed polls before an online device is set offline
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold: u32,
    /// Pause between cycles
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
    /// Per-read transport timeout
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub function: FunctionKind,
}

fn default_initial_offline_interval() -> u32 {
    5
}

fn default_offline_threshold() -> u32 {
    3
}

fn default_cycle_delay_ms() -> u64 {
    50
}

fn default_read_timeout_ms() -> u64 {
    200
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_offline_interval: default_initial_offline_interval(),
            offline_threshold: default_offline_threshold(),
            cycle_delay_ms: default_cycle_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            function: FunctionKind::default(),
        }
    }
}

impl PollingConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.offline_threshold = threshold;
        self
    }

    pub fn with_initial_interval(mut self, interval: u32) -> Self {
        self.initial_offline_interval = interval;
        self
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_function(mut self, function: FunctionKind) -> Self {
        self.function = function;
        self
    }

    /// Reject parameters the state machine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.offline_threshold == 0 {
            return Err(StsError::config("offline_threshold must be at least 1"));
        }
        if self.initial_offline_interval == 0 {
            return Err(StsError::config(
                "initial_offline_interval must be at least 1",
            ));
        }
        if self.initial_offline_interval > MAX_OFFLINE_INTERVAL {
            return Err(StsError::config(format!(
                "initial_offline_interval must not exceed {MAX_OFFLINE_INTERVAL}"
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(StsError::config("read_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

/// One physical bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Slave addresses polled on this bus, in polling order
    #[serde(default)]
    pub devices: Vec<u8>,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Overrides the service-wide polling parameters for this bus
    #[serde(default)]
    pub polling: Option<PollingConfig>,
}

fn default_enabled() -> bool {
    true
}

impl BusConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            devices: Vec::new(),
            transport: TransportConfig::default(),
            polling: None,
        }
    }

    pub fn with_devices(mut self, devices: impl IntoIterator<Item = u8>) -> Self {
        self.devices = devices.into_iter().collect();
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Bus override if present, else the service-wide parameters
    pub fn effective_polling(&self, global: &PollingConfig) -> PollingConfig {
        self.polling.unwrap_or(*global)
    }
}

/// Transport backing a bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// In-memory register banks
    Simulated {
        #[serde(default)]
        latency_ms: u64,
        #[serde(default)]
        jitter_ms: u64,
        /// Empty means every configured bus device answers with the default block
        #[serde(default)]
        devices: Vec<SimulatedDeviceConfig>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Simulated {
            latency_ms: 0,
            jitter_ms: 0,
            devices: Vec::new(),
        }
    }
}

/// Simulated slave
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    pub address: u8,
    /// Register values from 0x0020 upwards
    #[serde(default = "default_registers")]
    pub registers: Vec<u16>,
    #[serde(default = "default_enabled")]
    pub reachable: bool,
}

/// A healthy switch feeding from source 1
pub fn default_registers() -> Vec<u16> {
    let mut regs = vec![0u16; crate::protocols::STS_BLOCK_LEN];
    regs[0] = 230;
    regs[1] = 100;
    regs[2] = 230;
    regs[3] = 229;
    regs[4] = 1;
    regs[15] = 500;
    regs[24] = 1;
    regs
}

impl AppConfig {
    /// Load from `path` with environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StsError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let config: AppConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML text without environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: AppConfig = Figment::new().merge(Yaml::string(yaml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.polling.validate()?;

        if self.buses.is_empty() {
            return Err(StsError::config("at least one bus must be configured"));
        }

        let mut names = HashSet::new();
        for bus in &self.buses {
            if bus.name.trim().is_empty() {
                return Err(StsError::config("bus name cannot be empty"));
            }
            if !names.insert(bus.name.as_str()) {
                return Err(StsError::config(format!("duplicate bus name '{}'", bus.name)));
            }
            if let Some(polling) = &bus.polling {
                polling
                    .validate()
                    .map_err(|e| StsError::config(format!("bus '{}': {e}", bus.name)))?;
            }

            let mut addresses = HashSet::new();
            for &address in &bus.devices {
                check_address(&bus.name, address)?;
                if !addresses.insert(address) {
                    return Err(StsError::config(format!(
                        "bus '{}': duplicate device address {address}",
                        bus.name
                    )));
                }
            }

            let TransportConfig::Simulated { devices, .. } = &bus.transport;
            for device in devices {
                check_address(&bus.name, device.address)?;
                if device.registers.len() > MAX_SIMULATED_REGISTERS {
                    return Err(StsError::config(format!(
                        "bus '{}': device {} has {} registers, at most {MAX_SIMULATED_REGISTERS} fit above 0x{STS_BLOCK_START:04X}",
                        bus.name,
                        device.address,
                        device.registers.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Buses marked enabled
    pub fn enabled_buses(&self) -> impl Iterator<Item = &BusConfig> {
        self.buses.iter().filter(|b| b.enabled)
    }
}

fn check_address(bus: &str, address: u8) -> Result<()> {
    if (MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&address) {
        Ok(())
    } else {
        Err(StsError::config(format!(
            "bus '{bus}': device address {address} outside {MIN_SLAVE_ID}..={MAX_SLAVE_ID}"
        )))
    }
}
