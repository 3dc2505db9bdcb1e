//! Logging observer
//!
//! Subscribes to bus events and writes them to the log. Level follows the
//! status: healthy polls at debug, state changes at info/warn, faults at
//! error.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::bus::BusEvent;
use crate::polling::{DeviceUpdate, PollStatus};

/// Log one event
pub fn log_event(event: &BusEvent) {
    match event {
        BusEvent::Started { bus, devices } => info!("Bus {} up with {} devices", bus, devices),
        BusEvent::Update(update) => log_update(update),
        BusEvent::Fault { bus, reason } => error!("Bus {} fault: {}", bus, reason),
        BusEvent::Stopped { bus, cycles } => info!("Bus {} down after {} cycles", bus, cycles),
    }
}

fn log_update(update: &DeviceUpdate) {
    let reading = update.reading_or_no_data();
    match update.status {
        PollStatus::Ok => debug!(
            bus = %update.bus,
            slave = update.address,
            cycle = update.cycle,
            rtt_ms = update.rtt_ms,
            "{} {}",
            update.status,
            reading
        ),
        PollStatus::BackOnline => info!(
            bus = %update.bus,
            slave = update.address,
            cycle = update.cycle,
            "{} {}",
            update.status,
            reading
        ),
        PollStatus::Timeout | PollStatus::StillOffline => debug!(
            bus = %update.bus,
            slave = update.address,
            cycle = update.cycle,
            timed_out = update.timed_out,
            "{} {}",
            update.status,
            update.failure.map(|f| f.to_string()).unwrap_or_default()
        ),
        PollStatus::SetOffline => warn!(
            bus = %update.bus,
            slave = update.address,
            cycle = update.cycle,
            "{}",
            update.status
        ),
        PollStatus::OfflineSkip => trace!(
            bus = %update.bus,
            slave = update.address,
            cycle = update.cycle,
            "{}",
            update.status
        ),
    }
}

/// Spawn a task logging every event until `cancel` fires or all buses are gone
pub fn spawn_log_observer(
    mut events: broadcast::Receiver<BusEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(missed)) => warn!("Observer lagged, {} events dropped", missed),
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Observer exit");
    })
}
