//! Exactly-once transport release

use async_trait::async_trait;
use tracing::{debug, warn};

use super::traits::{BlockRead, RegisterTransport};
use crate::protocols::FunctionKind;

/// Owns a bus transport and closes it exactly once.
///
/// `close()` is idempotent. If the guard is dropped without an explicit
/// close (the bus task was aborted) the transport is closed on drop.
#[derive(Debug)]
pub struct TransportGuard {
    bus: String,
    inner: Option<Box<dyn RegisterTransport>>,
}

impl TransportGuard {
    pub fn new(bus: impl Into<String>, transport: Box<dyn RegisterTransport>) -> Self {
        Self {
            bus: bus.into(),
            inner: Some(transport),
        }
    }

    /// True once the transport has been released
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the transport. Later calls are no-ops.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.inner.take() {
            transport.close();
            debug!("Bus {} transport {} closed", self.bus, transport.name());
        }
    }
}

#[async_trait]
impl RegisterTransport for TransportGuard {
    fn name(&self) -> &str {
        self.inner.as_ref().map_or("closed", |t| t.name())
    }

    async fn read_block(
        &mut self,
        function: FunctionKind,
        slave_id: u8,
        start: u16,
        dest: &mut [u16],
    ) -> BlockRead {
        match self.inner.as_mut() {
            Some(transport) => transport.read_block(function, slave_id, start, dest).await,
            None => BlockRead::short(0),
        }
    }

    fn close(&mut self) {
        TransportGuard::close(self);
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!("Bus {} transport released on drop", self.bus);
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::simulated::SimulatedTransport;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let sim = SimulatedTransport::new("sim");
        let handle = sim.handle();
        let mut guard = TransportGuard::new("bus-a", Box::new(sim));

        guard.close();
        guard.close();
        drop(guard);

        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_once() {
        let sim = SimulatedTransport::new("sim");
        let handle = sim.handle();
        {
            let _guard = TransportGuard::new("bus-a", Box::new(sim));
        }
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_read_after_close_reports_nothing() {
        let sim = SimulatedTransport::new("sim");
        sim.handle().add_device(1, &[1, 2, 3]);
        let mut guard = TransportGuard::new("bus-a", Box::new(sim));
        guard.close();

        let mut buf = [0u16; 3];
        let result = guard
            .read_block(FunctionKind::ReadHoldingRegisters, 1, 0x20, &mut buf)
            .await;
        assert_eq!(result, BlockRead::short(0));
        assert_eq!(guard.name(), "closed");
    }
}
