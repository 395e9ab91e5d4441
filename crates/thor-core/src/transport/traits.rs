//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for bulk USB communication, so the
//! protocol engine can run against real hardware (nusb) or a scripted mock.

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn timeout(timeout: Duration) -> Self {
        TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }

    /// Classify a blocking I/O failure from the USB stack.
    pub(crate) fn from_io(err: io::Error, timeout: Duration, writing: bool) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::timeout(timeout),
            io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => TransportError::Disconnected,
            _ if writing => TransportError::WriteFailed(err.to_string()),
            _ => TransportError::ReadFailed(err.to_string()),
        }
    }
}

/// Abstract bulk USB channel consumed by the protocol engine.
///
/// Every call is bounded by the caller's timeout. A transport must be driven
/// by a single [`crate::Thor`] at a time; concurrent use from several
/// threads interleaves frames and is not supported.
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the OUT endpoint.
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Read one transfer (at most `max_len` bytes) from the IN endpoint.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

impl<T: UsbTransport + ?Sized> UsbTransport for &T {
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).write(data, timeout)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read(max_len, timeout)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn vendor_id(&self) -> u16 {
        (**self).vendor_id()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }
}
