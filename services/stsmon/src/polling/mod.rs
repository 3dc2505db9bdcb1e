//! Device state machine and per-bus polling engine

pub mod backoff;
pub mod device;
pub mod engine;

pub use backoff::{next_interval, MAX_OFFLINE_INTERVAL};
pub use device::{Device, PollFailure};
pub use engine::{DeviceStatus, DeviceUpdate, PollStatus, PollingEngine};
