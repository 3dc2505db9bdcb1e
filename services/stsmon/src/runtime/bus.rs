//! Per-bus polling task
//!
//! Each bus runs in its own tokio task that owns the [`PollingEngine`] and the
//! transport. Outside callers talk to it through [`BusHandle`]: device changes
//! travel as commands and are applied between cycles, so the device list is
//! never shared.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StsError};
use crate::polling::{DeviceStatus, DeviceUpdate, PollingEngine};
use crate::transport::{RegisterTransport, TransportGuard};

/// Pending commands per bus
const COMMAND_CAPACITY: usize = 32;

/// Upper bound for waiting on an in-flight cycle at stop
const MAX_STOP_GRACE: Duration = Duration::from_secs(30);

/// Slack added to the computed stop grace period
const STOP_MARGIN: Duration = Duration::from_millis(500);

/// Lifecycle and data events published by bus tasks
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    Started { bus: String, devices: usize },
    Update(DeviceUpdate),
    /// The bus could not start or its loop died
    Fault { bus: String, reason: String },
    Stopped { bus: String, cycles: u64 },
}

impl BusEvent {
    pub fn bus(&self) -> &str {
        match self {
            BusEvent::Started { bus, .. }
            | BusEvent::Fault { bus, .. }
            | BusEvent::Stopped { bus, .. } => bus,
            BusEvent::Update(update) => &update.bus,
        }
    }
}

enum BusCommand {
    AddDevice {
        address: u8,
        reply: oneshot::Sender<Result<bool>>,
    },
    RemoveDevice {
        address: u8,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<DeviceStatus>>,
    },
}

impl std::fmt::Debug for BusCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusCommand::AddDevice { address, .. } => write!(f, "AddDevice({address})"),
            BusCommand::RemoveDevice { address, .. } => write!(f, "RemoveDevice({address})"),
            BusCommand::Snapshot { .. } => write!(f, "Snapshot"),
        }
    }
}

#[derive(Debug, Default)]
struct BusShared {
    running: AtomicBool,
    devices: AtomicUsize,
    cycles: AtomicU64,
}

/// Control handle for a running bus
#[derive(Debug)]
pub struct BusHandle {
    name: String,
    commands: mpsc::Sender<BusCommand>,
    events: broadcast::Sender<BusEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<BusShared>,
    read_timeout: Duration,
}

impl BusHandle {
    /// Spawn the polling task for `engine` on `transport`.
    ///
    /// The task stops when `cancel` (or a parent token) is cancelled.
    pub fn spawn(
        engine: PollingEngine,
        transport: Box<dyn RegisterTransport>,
        events: broadcast::Sender<BusEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let name = engine.bus().to_string();
        let read_timeout = engine.config().read_timeout();
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let shared = Arc::new(BusShared {
            running: AtomicBool::new(true),
            devices: AtomicUsize::new(engine.len()),
            cycles: AtomicU64::new(0),
        });

        let guard = TransportGuard::new(name.clone(), transport);
        let task = tokio::spawn(run_bus(
            engine,
            guard,
            rx,
            events.clone(),
            cancel.clone(),
            Arc::clone(&shared),
        ));

        Self {
            name,
            commands,
            events,
            cancel,
            task: Mutex::new(Some(task)),
            shared,
            read_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the loop has exited for any reason
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    /// Register a device; applied before the next cycle.
    ///
    /// Returns `Ok(false)` if the address is already on this bus.
    pub async fn add_device(&self, address: u8) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(BusCommand::AddDevice { address, reply }).await?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Remove a device; a poll already in flight completes first
    pub async fn remove_device(&self, address: u8) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(BusCommand::RemoveDevice { address, reply }).await?;
        rx.await.map_err(|_| self.gone())
    }

    /// Snapshot of every device between cycles
    pub async fn devices(&self) -> Result<Vec<DeviceStatus>> {
        let (reply, rx) = oneshot::channel();
        self.send(BusCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| self.gone())
    }

    /// Stop the loop and release the transport.
    ///
    /// No new cycle starts after this is called. An in-flight cycle gets a
    /// grace period sized to one full sweep, after which the task is aborted
    /// and the handle publishes `Fault` and `Stopped` on its behalf.
    /// Safe to call repeatedly and after a fault.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let Some(mut task) = self.task.lock().take() else {
            return;
        };

        let grace = self.stop_grace();
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => debug!("Bus {} task joined", self.name),
            Ok(Err(e)) => warn!("Bus {} task err: {}", self.name, e),
            Err(_) => {
                warn!("Bus {} stop timeout after {:?}, abort", self.name, grace);
                task.abort();
                let aborted = matches!(task.await, Err(e) if e.is_cancelled());
                self.shared.running.store(false, Ordering::Release);
                // A task that finished on its own already sent Stopped
                if aborted {
                    let _ = self.events.send(BusEvent::Fault {
                        bus: self.name.clone(),
                        reason: format!("stop timeout after {grace:?}, task aborted"),
                    });
                    let _ = self.events.send(BusEvent::Stopped {
                        bus: self.name.clone(),
                        cycles: self.cycles(),
                    });
                }
            }
        }
    }

    fn stop_grace(&self) -> Duration {
        let devices = self.shared.devices.load(Ordering::Acquire).max(1) as u32;
        self.read_timeout
            .saturating_mul(devices)
            .min(MAX_STOP_GRACE)
            + STOP_MARGIN
    }

    async fn send(&self, command: BusCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| self.gone())
    }

    fn gone(&self) -> StsError {
        StsError::bus(format!("bus '{}' is not running", self.name))
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn apply(engine: &mut PollingEngine, command: BusCommand, shared: &BusShared) {
    match command {
        BusCommand::AddDevice { address, reply } => {
            let _ = reply.send(engine.add_device(address));
        }
        BusCommand::RemoveDevice { address, reply } => {
            let _ = reply.send(engine.remove_device(address));
        }
        BusCommand::Snapshot { reply } => {
            let _ = reply.send(engine.statuses());
        }
    }
    shared.devices.store(engine.len(), Ordering::Release);
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_bus(
    mut engine: PollingEngine,
    mut guard: TransportGuard,
    mut commands: mpsc::Receiver<BusCommand>,
    events: broadcast::Sender<BusEvent>,
    cancel: CancellationToken,
    shared: Arc<BusShared>,
) {
    let name = engine.bus().to_string();
    let delay = engine.config().cycle_delay();

    info!(
        "Bus {} started: {} devices, {} via {}, delay {:?}",
        name,
        engine.len(),
        engine.config().function,
        guard.name(),
        delay
    );
    let _ = events.send(BusEvent::Started {
        bus: name.clone(),
        devices: engine.len(),
    });

    'bus: loop {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'bus,
                Some(command) = commands.recv() => apply(&mut engine, command, &shared),
                _ = &mut sleep => break,
            }
        }
        while let Ok(command) = commands.try_recv() {
            apply(&mut engine, command, &shared);
        }
        if cancel.is_cancelled() {
            break;
        }

        let cycle = AssertUnwindSafe(engine.run_cycle(&mut guard, |update| {
            // No receivers is fine
            let _ = events.send(BusEvent::Update(update));
        }))
        .catch_unwind()
        .await;

        match cycle {
            Ok(n) => shared.cycles.store(n, Ordering::Release),
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!("Bus {} fault: {}", name, reason);
                let _ = events.send(BusEvent::Fault {
                    bus: name.clone(),
                    reason,
                });
                break;
            }
        }
    }

    guard.close();
    shared.running.store(false, Ordering::Release);
    let cycles = shared.cycles.load(Ordering::Acquire);
    info!("Bus {} stopped after {} cycles", name, cycles);
    let _ = events.send(BusEvent::Stopped { bus: name, cycles });
}
