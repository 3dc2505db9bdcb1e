//! Bus tasks, their manager and the logging observer

pub mod bus;
pub mod manager;
pub mod observer;

pub use bus::{BusEvent, BusHandle};
pub use manager::{BusManager, DEFAULT_EVENT_CAPACITY};
pub use observer::{log_event, spawn_log_observer};
