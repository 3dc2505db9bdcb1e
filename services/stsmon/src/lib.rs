//! Static transfer switch polling service (`stsmon`)
//!
//! Polls switches sharing multi-drop serial buses, one task per bus. Each
//! device runs an online/offline state machine: unreachable devices are
//! demoted to a backed-off polling cadence so healthy devices keep their bus
//! time, and are promoted back the moment they answer.
//!
//! ```text
//! BusManager ──► BusHandle (task per bus) ──► PollingEngine::run_cycle
//!                     │                              │
//!                     │                   Device::poll ─► RegisterTransport
//!                     ▼                              │
//!              broadcast<BusEvent> ◄── DeviceUpdate ─┘
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod polling;
pub mod protocols;
pub mod runtime;
pub mod transport;

pub use config::{AppConfig, BusConfig, PollingConfig, TransportConfig};
pub use error::{Result, StsError};
pub use polling::{DeviceStatus, DeviceUpdate, PollFailure, PollStatus, PollingEngine};
pub use protocols::{ActiveSource, FunctionKind, Reading};
pub use runtime::{BusEvent, BusHandle, BusManager};
pub use transport::{
    BlockRead, DefaultTransportFactory, RegisterTransport, SimulatedBus, SimulatedTransport,
    TransportFactory,
};
