//! Register transports
//!
//! A transport is bound to one physical bus and owned by that bus's task.

pub mod factory;
pub mod guard;
pub mod simulated;
pub mod traits;

pub use factory::{DefaultTransportFactory, TransportFactory};
pub use guard::TransportGuard;
pub use simulated::{SimulatedBus, SimulatedTransport};
pub use traits::{BlockRead, RegisterTransport};
