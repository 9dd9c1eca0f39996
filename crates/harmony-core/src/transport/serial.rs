//! serialport-based transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{SerialPort, SerialPortType};
use tracing::{debug, info, instrument};

use super::traits::{SerialTransport, TransportError};
use crate::protocol::constants::{COMMAND_TIMEOUT, HARMONY_PRODUCT_ID, HARMONY_VENDOR_ID};

/// USB serial link to the device.
///
/// The port is closed when this value is dropped.
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialPortTransport {
    /// Open the first port whose USB identity matches the device.
    #[instrument(level = "info")]
    pub fn open(baud_rate: u32) -> Result<Self, TransportError> {
        let name = Self::discover()?;
        Self::open_path(&name, baud_rate)
    }

    /// Find the device's port name by USB vendor/product ID.
    pub fn discover() -> Result<String, TransportError> {
        let ports = serialport::available_ports().map_err(|e| TransportError::OpenFailed {
            port: "<enumeration>".into(),
            message: e.to_string(),
        })?;

        for port in ports {
            if let SerialPortType::UsbPort(usb) = &port.port_type {
                debug!(
                    port = %port.port_name,
                    vid = %format!("{:04X}", usb.vid),
                    pid = %format!("{:04X}", usb.pid),
                    "Inspecting USB serial port"
                );
                if usb.vid == HARMONY_VENDOR_ID && usb.pid == HARMONY_PRODUCT_ID {
                    info!(
                        port = %port.port_name,
                        serial = usb.serial_number.as_deref().unwrap_or("unknown"),
                        "Found device"
                    );
                    return Ok(port.port_name);
                }
            }
        }

        Err(TransportError::DeviceNotFound {
            vid: HARMONY_VENDOR_ID,
            pid: HARMONY_PRODUCT_ID,
        })
    }

    /// Open a specific port path.
    #[instrument(level = "info")]
    pub fn open_path(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(COMMAND_TIMEOUT)
            .open()
            .map_err(|e| TransportError::OpenFailed {
                port: path.to_string(),
                message: e.to_string(),
            })?;

        info!(port = %path, baud_rate, "Port opened successfully");

        Ok(Self {
            port,
            name: path.to_string(),
        })
    }
}

impl SerialTransport for SerialPortTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    #[instrument(skip(self, buf), fields(len = buf.len(), timeout_ms = timeout.as_millis() as u64))]
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };

        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            self.port
                .set_timeout(remaining)
                .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(timed_out()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }

        debug!(bytes_read = filled, "Read complete");
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}
