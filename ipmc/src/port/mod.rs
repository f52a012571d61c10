//! Port abstraction for serial communication with the IPMC board.
//!
//! The protocol layer never touches the OS directly. It talks to three traits:
//!
//! - [`PortEnumerator`] lists candidate ports.
//! - [`PortOpener`] claims one of them and hands back a [`Port`].
//! - [`Port`] is the open transport: blocking reads with timeouts, writes,
//!   and a peek at how many bytes are buffered.
//!
//! ```text
//! +--------------------+
//! |  DeviceSession     |
//! +---------+----------+
//!           |
//! +---------v----------+     +--------------------+
//! |  Discovery / link  +---->|  SerialBackend     |
//! +---------+----------+     | (enumerate + open) |
//!           |                +---------+----------+
//! +---------v----------+               |
//! |    Port trait      |<--------------+
//! +---------+----------+
//!           |
//!   +-------+--------+
//!   |                |
//! NativePort      MockPort
//! (serialport)    (tests)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ipmc::port::Port;
//!
//! fn poke<P: Port>(port: &mut P) -> ipmc::Result<()> {
//!     port.write_all_bytes(b"S\n")?;
//!     let pending = port.read_available()?;
//!     println!("Received: {pending:?}");
//!     Ok(())
//! }
//! ```

mod bridge;
pub mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub use bridge::BridgeKind;

/// Fixed line rate of the IPMC firmware.
pub const BAUD_RATE: u32 = 115_200;

/// Default read timeout for transport-level reads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial port descriptor as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// Classified USB-to-UART bridge.
    pub bridge: BridgeKind,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Descriptor for a port known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bridge: BridgeKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// One-line description for listings.
    pub fn describe(&self) -> String {
        let bridge = if self.bridge.is_known() {
            format!(" [{}]", self.bridge.name())
        } else if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product = self
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        format!("{}{}{}", self.name, bridge, product)
    }
}

/// An open serial transport.
///
/// Reads honor the configured timeout and report it as
/// [`std::io::ErrorKind::TimedOut`], like the `serialport` crate does.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Number of received bytes waiting in the input buffer.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Discard everything in the input buffer.
    fn clear_input(&mut self) -> Result<()>;

    /// Release the OS handle. Calling it again is a no-op.
    fn close(&mut self);

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Drain whatever is already buffered without waiting for more.
    fn read_available(&mut self) -> Result<Vec<u8>> {
        let pending = self.bytes_available()?;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        let mut filled = 0;
        while filled < pending {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Block until exactly `n` bytes arrive or `deadline` passes.
    fn read_exact_until(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        let configured = self.timeout();
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        let outcome = loop {
            if filled == n {
                break Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break Err(Error::Timeout(format!(
                    "expected {n} byte(s) on {}, got {filled}",
                    self.name()
                )));
            }
            if let Err(e) = self.set_timeout((deadline - now).min(configured)) {
                break Err(e);
            }
            match self.read(&mut buf[filled..]) {
                Ok(read) => filled += read,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => break Err(Error::Io(e)),
            }
        };

        self.set_timeout(configured)?;
        outcome.map(|()| buf)
    }
}

/// Lists serial ports present on the host.
pub trait PortEnumerator {
    /// List all available serial ports, in host enumeration order.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;
}

/// Claims a serial port for exclusive use.
pub trait PortOpener {
    /// The transport handed back on success.
    type Port: Port;

    /// Open the port described by `config`.
    ///
    /// Fails with [`Error::PortUnavailable`] when the OS refuses the port.
    fn open(&self, config: &SerialConfig) -> Result<Self::Port>;
}

/// Everything discovery needs from the host: listing and opening ports.
pub trait SerialBackend: PortEnumerator + PortOpener {}

impl<T: PortEnumerator + PortOpener> SerialBackend for T {}

// Re-export the native implementation when enabled
#[cfg(feature = "native")]
pub use native::{NativePort, NativeSerial};

pub use mock::{MockHandle, MockPort, MockSerial};
