//! Static transfer switch polling service

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::service_bootstrap::{print_startup_banner, ServiceInfo};
use errors::{VoltageError, VoltageResult};
use stsmon::bootstrap::{self, Args};
use stsmon::runtime::spawn_log_observer;
use stsmon::{AppConfig, BusManager, DefaultTransportFactory};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("stsmon: [{}] {e}", e.error_code());
        std::process::exit(e.exit_code());
    }
}

async fn run() -> VoltageResult<()> {
    let args = Args::parse();
    let service_info = ServiceInfo::new("stsmon", "Static transfer switch polling service");

    // Config first so its log_dir can take effect; errors are logged below
    let loaded = AppConfig::load(&args.config);
    let config_log_dir = loaded
        .as_ref()
        .ok()
        .and_then(|c| c.service.log_dir.clone());
    bootstrap::initialize_logging(&args.service, &service_info, config_log_dir.as_deref())?;
    if !args.service.no_color {
        print_startup_banner(&service_info);
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Config {}: {}", args.config.display(), e);
            return Err(e.into());
        },
    };
    info!(
        "Config {} loaded: {} buses",
        args.config.display(),
        config.buses.len()
    );

    if args.service.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let mut manager = BusManager::new();
    let observer_stop = CancellationToken::new();
    let observer = spawn_log_observer(manager.subscribe(), observer_stop.clone());

    let started = manager.start_from_config(&config, &DefaultTransportFactory);
    if started == 0 {
        observer_stop.cancel();
        let _ = observer.await;
        return Err(VoltageError::StartupFailed("no bus could be started".into()));
    }

    let signal = common::shutdown::wait_for_shutdown().await;
    info!("Shutting down on {}", signal);

    manager.stop_all().await;
    observer_stop.cancel();
    let _ = observer.await;
    info!("Shutdown complete");
    Ok(())
}
