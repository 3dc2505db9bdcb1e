//! Shared service bootstrap helpers

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};

/// Service identity used for logging and the startup banner
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.into(),
        }
    }
}

/// Print a one-line startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    println!(
        "{} v{} - {}",
        service.name, service.version, service.description
    );
}

/// Initialize logging from the common service arguments
pub fn init_logging(
    args: &ServiceArgs,
    service: &ServiceInfo,
) -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_config(LogConfig {
        service_name: service.name.clone(),
        log_dir: args.log_dir.clone(),
        console_level: args.parse_log_level(),
        enable_json: false,
        ansi: !args.no_color,
    })
}
