//! stsmon basic library
//!
//! Functions shared by all services:
//! - logging
//! - command-line arguments and bootstrap helpers
//! - shutdown signal handling

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;
