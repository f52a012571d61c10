//! Error types for ipmc.

use std::io;
use thiserror::Error;

/// Result type for ipmc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ipmc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on an open transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The OS refused to hand over the port (busy, missing, no permission).
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable {
        /// Port name/path.
        port: String,
        /// Reason reported by the OS.
        reason: String,
    },

    /// No response within the allotted time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Enumeration returned no serial ports at all.
    #[error("No serial ports available")]
    NoPortsFound,

    /// Every candidate port was probed and none answered the handshake.
    #[error("No IPMC device found on any serial port")]
    DeviceNotFound,

    /// User-supplied value failed validation; nothing was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The device answered a command with something other than an acknowledgement.
    #[error("Device rejected {command}: response {response:#04x}")]
    Rejected {
        /// Command as sent, without terminator.
        command: String,
        /// First byte of the response.
        response: u8,
    },

    /// A command was issued while no device is connected.
    #[error("Not connected to an IPMC device")]
    NotConnected,

    /// The embedding application asked the operation to stop.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the transport itself is broken.
    ///
    /// A session holding the transport must drop it when this returns `true`.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            Self::Io(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
