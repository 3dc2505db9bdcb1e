//! Service Bootstrap
//!
//! Command-line arguments and logging setup for the `stsmon` binary.

use clap::Parser;
use std::path::{Path, PathBuf};

use common::service_bootstrap::{self, ServiceInfo};
use common::ServiceArgs;
use errors::{VoltageError, VoltageResult};

use crate::config::DEFAULT_CONFIG_PATH;

/// Command-line arguments for stsmon
#[derive(Parser, Debug, Clone)]
#[command(
    name = "stsmon",
    version = env!("CARGO_PKG_VERSION"),
    about = "Static transfer switch polling service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(flatten)]
    pub service: ServiceArgs,
}

/// Initialize logging.
///
/// The `--log-dir` flag (or `STSMON_LOG_DIR`) wins over the config file's
/// `service.log_dir`.
pub fn initialize_logging(
    args: &ServiceArgs,
    service_info: &ServiceInfo,
    config_log_dir: Option<&Path>,
) -> VoltageResult<()> {
    let mut args = args.clone();
    if args.log_dir.is_none() {
        args.log_dir = config_log_dir.map(Path::to_path_buf);
    }
    service_bootstrap::init_logging(&args, service_info)
        .map_err(|e| VoltageError::StartupFailed(format!("logging: {e}")))
}
