//! Shared test transports

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use stsmon::protocols::STS_BLOCK_LEN;
use stsmon::{BlockRead, BusConfig, FunctionKind, RegisterTransport, Result, TransportFactory};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Step {
    /// Full reply with these registers
    Reply(Vec<u16>),
    Timeout,
    /// Reply carrying only this many registers
    Short(usize),
    /// Never answer; the caller's timeout must fire
    Hang,
    Panic(&'static str),
}

/// Measurement block with an identifiable output voltage
pub fn block(output_voltage: u16) -> Vec<u16> {
    let mut regs = vec![0u16; STS_BLOCK_LEN];
    regs[0] = output_voltage;
    regs[1] = 5;
    regs[2] = 230;
    regs[3] = 231;
    regs[15] = 500;
    regs[24] = 2;
    regs
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<u8, VecDeque<Step>>,
    defaults: HashMap<u8, Step>,
    calls: Vec<u8>,
}

/// Observes a [`ScriptedTransport`] after it was moved into a bus
#[derive(Debug, Clone, Default)]
pub struct ScriptProbe {
    state: Arc<Mutex<ScriptState>>,
    closes: Arc<AtomicU32>,
}

impl ScriptProbe {
    /// Slave addresses in the order they were read
    pub fn calls(&self) -> Vec<u8> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, slave_id: u8) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|&&id| id == slave_id)
            .count()
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Change the fallback reply of a slave at runtime
    pub fn set_default(&self, slave_id: u8, step: Step) {
        self.state.lock().defaults.insert(slave_id, step);
    }
}

/// Transport replaying per-slave scripts, then a per-slave default.
/// Slaves with neither time out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    probe: ScriptProbe,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(self, slave_id: u8, step: Step) -> Self {
        self.probe.set_default(slave_id, step);
        self
    }

    pub fn with_script(self, slave_id: u8, steps: impl IntoIterator<Item = Step>) -> Self {
        self.probe
            .state
            .lock()
            .scripts
            .insert(slave_id, steps.into_iter().collect());
        self
    }

    pub fn probe(&self) -> ScriptProbe {
        self.probe.clone()
    }

    fn next_step(&self, slave_id: u8) -> Step {
        let mut state = self.probe.state.lock();
        state.calls.push(slave_id);
        if let Some(step) = state.scripts.get_mut(&slave_id).and_then(VecDeque::pop_front) {
            return step;
        }
        state
            .defaults
            .get(&slave_id)
            .cloned()
            .unwrap_or(Step::Timeout)
    }
}

#[async_trait]
impl RegisterTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn read_block(
        &mut self,
        _function: FunctionKind,
        slave_id: u8,
        _start: u16,
        dest: &mut [u16],
    ) -> BlockRead {
        match self.next_step(slave_id) {
            Step::Reply(regs) => {
                let n = regs.len().min(dest.len());
                dest[..n].copy_from_slice(&regs[..n]);
                if n == dest.len() {
                    BlockRead::complete(n)
                } else {
                    BlockRead::short(n)
                }
            }
            Step::Timeout => BlockRead::timeout(),
            Step::Short(n) => BlockRead::short(n.min(dest.len())),
            Step::Hang => std::future::pending::<BlockRead>().await,
            Step::Panic(msg) => panic!("{msg}"),
        }
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out prepared transports by bus name
#[derive(Default)]
pub struct PreparedFactory {
    transports: Mutex<HashMap<String, Box<dyn RegisterTransport>>>,
}

impl PreparedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, bus: &str, transport: impl RegisterTransport + 'static) -> Self {
        self.transports
            .lock()
            .insert(bus.to_string(), Box::new(transport));
        self
    }
}

impl TransportFactory for PreparedFactory {
    fn create(&self, bus: &BusConfig) -> Result<Box<dyn RegisterTransport>> {
        self.transports
            .lock()
            .remove(&bus.name)
            .ok_or_else(|| stsmon::StsError::transport(format!("no transport for {}", bus.name)))
    }
}
