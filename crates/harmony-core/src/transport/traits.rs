//! Serial transport layer abstraction.
//!
//! Defines the `SerialTransport` trait for the device link,
//! allowing different implementations (serialport, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open port {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract duplex byte stream to the device.
///
/// Implementations may deliver bytes in arbitrarily small reads; callers
/// only ever see exact-length reads through [`SerialTransport::read_exact`].
pub trait SerialTransport: Send {
    /// Write all bytes to the device. Writes are not time-boxed.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Fill `buf` completely, failing once `timeout` has elapsed.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError>;

    /// Name of the underlying port, for logs.
    fn port_name(&self) -> &str;
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(data)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).read_exact(buf, timeout)
    }

    fn port_name(&self) -> &str {
        (**self).port_name()
    }
}
