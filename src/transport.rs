//! Transport session: raw register I/O over the Modbus RTU client.
//!
//! The [`Transport`] trait is the seam between the link manager and the
//! physical bus. Production code uses [`SerialTransport`], which drives
//! `tokio-modbus` over a `tokio-serial` stream; tests substitute a scripted
//! fake.
//!
//! One physical RS-485 device can carry several wallboxes (multi-drop), but a
//! tty can only be opened once. All sessions for one device therefore share a
//! single lazily-opened port behind an async mutex; the mutex doubles as the
//! bus lock that serialises frames from concurrent adapters. Each session
//! keeps its own attached/detached flag so that connect state, probing and
//! the reconnect cooldown stay per-adapter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Context, Reader, Writer};
use tokio_modbus::slave::{Slave, SlaveContext};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use crate::error::{BridgeError, BridgeResult};

/// Fixed serial profile of the Heidelberg Energy Control: 19200 baud, 8E1.
pub const BAUD_RATE: u32 = 19_200;

/// Default per-call bus timeout.
pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Raw register I/O as consumed by the link manager.
///
/// All bus operations are bounded by the session's bus timeout; a stuck call
/// returns [`BridgeError::Timeout`] after that interval, there is no
/// mid-call cancellation beyond it.
pub trait Transport: Send {
    /// Open the underlying transport. Idempotent.
    fn open(&mut self) -> impl Future<Output = BridgeResult<()>> + Send;

    /// Detach from the transport without failing. Cached state elsewhere is
    /// unaffected.
    fn close(&mut self);

    /// Whether this session considers itself attached.
    fn is_open(&self) -> bool;

    /// Read `count` input registers starting at `address` (FC04).
    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = BridgeResult<Vec<u16>>> + Send;

    /// Read `count` holding registers starting at `address` (FC03).
    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = BridgeResult<Vec<u16>>> + Send;

    /// Write a single holding register (FC06).
    fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> impl Future<Output = BridgeResult<()>> + Send;
}

/// One shared serial port, lazily opened, honest about being gone.
#[derive(Debug)]
pub struct PortState {
    device: String,
    timeout: Duration,
    ctx: Option<Context>,
}

/// Shared handle to the physical port of one serial device.
pub type SharedPort = Arc<Mutex<PortState>>;

/// Create the shared port handle for `device`. Opening happens on first use.
pub fn shared_port(device: impl Into<String>, timeout: Duration) -> SharedPort {
    Arc::new(Mutex::new(PortState {
        device: device.into(),
        timeout,
        ctx: None,
    }))
}

impl PortState {
    fn ensure_open(&mut self) -> BridgeResult<&mut Context> {
        if self.ctx.is_none() {
            let builder = tokio_serial::new(&self.device, BAUD_RATE)
                .data_bits(DataBits::Eight)
                .parity(Parity::Even)
                .stop_bits(StopBits::One)
                .timeout(self.timeout);
            let stream = SerialStream::open(&builder)?;
            tracing::debug!(device = %self.device, "serial port opened");
            self.ctx = Some(rtu::attach(stream));
        }
        self.ctx.as_mut().ok_or(BridgeError::NotConnected)
    }

    /// Drop the port handle so the next user reopens it with a clean RTU
    /// framer. Required after timeouts: a late response would otherwise be
    /// read as the prefix of the next frame.
    fn drop_handle(&mut self) {
        if self.ctx.take().is_some() {
            tracing::debug!(device = %self.device, "serial port dropped");
        }
    }
}

/// Transport session for one wallbox on a (possibly shared) serial device.
pub struct SerialTransport {
    shared: SharedPort,
    slave: Slave,
    timeout: Duration,
    attached: bool,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("slave", &self.slave)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Create a detached session for `client_id` on the shared port.
    pub fn new(shared: SharedPort, client_id: u8, timeout: Duration) -> Self {
        Self {
            shared,
            slave: Slave(client_id),
            timeout,
            attached: false,
        }
    }
}

fn flatten<T>(result: tokio_modbus::Result<T>) -> BridgeResult<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(BridgeError::Exception(exception.to_string())),
        Err(source) => Err(BridgeError::Protocol(source)),
    }
}

impl Transport for SerialTransport {
    async fn open(&mut self) -> BridgeResult<()> {
        let mut port = self.shared.lock().await;
        port.ensure_open()?;
        self.attached = true;
        Ok(())
    }

    fn close(&mut self) {
        // Peers may still be using the shared port; only detach this session.
        self.attached = false;
    }

    fn is_open(&self) -> bool {
        self.attached
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> BridgeResult<Vec<u16>> {
        if !self.attached {
            return Err(BridgeError::NotConnected);
        }
        let slave = self.slave;
        let mut port = self.shared.lock().await;
        let ctx = port.ensure_open()?;
        ctx.set_slave(slave);
        let outcome = match timeout(self.timeout, ctx.read_input_registers(address, count)).await {
            Ok(result) => flatten(result),
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        };
        if outcome.as_ref().is_err_and(|e| e.is_transport()) {
            port.drop_handle();
        }
        outcome
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> BridgeResult<Vec<u16>> {
        if !self.attached {
            return Err(BridgeError::NotConnected);
        }
        let slave = self.slave;
        let mut port = self.shared.lock().await;
        let ctx = port.ensure_open()?;
        ctx.set_slave(slave);
        let outcome = match timeout(self.timeout, ctx.read_holding_registers(address, count)).await
        {
            Ok(result) => flatten(result),
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        };
        if outcome.as_ref().is_err_and(|e| e.is_transport()) {
            port.drop_handle();
        }
        outcome
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> BridgeResult<()> {
        if !self.attached {
            return Err(BridgeError::NotConnected);
        }
        let slave = self.slave;
        let mut port = self.shared.lock().await;
        let ctx = port.ensure_open()?;
        ctx.set_slave(slave);
        let outcome = match timeout(self.timeout, ctx.write_single_register(address, value)).await {
            Ok(result) => flatten(result),
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        };
        if outcome.as_ref().is_err_and(|e| e.is_transport()) {
            port.drop_handle();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_session_does_no_io() {
        let port = shared_port("/dev/tty-not-present", Duration::from_millis(50));
        let mut session = SerialTransport::new(port, 1, Duration::from_millis(50));
        assert!(!session.is_open());
        let err = session.read_input_registers(1, 18).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_only_detaches() {
        let port = shared_port("/dev/tty-not-present", Duration::from_millis(50));
        let mut session = SerialTransport::new(Arc::clone(&port), 1, Duration::from_millis(50));
        session.close();
        assert!(!session.is_open());
        // The shared handle is untouched by a detach.
        assert!(port.lock().await.ctx.is_none());
    }
}
