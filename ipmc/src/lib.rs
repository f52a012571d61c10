//! # ipmc
//!
//! Host-side control of the IPMC dual-output signal generator over a serial
//! line.
//!
//! This crate provides:
//!
//! - Port discovery: scan every serial port for a board that prints
//!   `IPMC_READY` and acknowledges a probe
//! - The command codec for frequency, amplitude and waveform settings
//! - A [`DeviceSession`] that owns the confirmed port and remembers what the
//!   device has acknowledged
//!
//! ## Features
//!
//! - `native` (default): Real serial ports via the `serialport` crate
//! - `serde`: Serialization support for snapshots and port listings
//!
//! ## Example
//!
//! ```rust,no_run
//! use ipmc::{Channel, DeviceSession, Waveform};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = DeviceSession::native();
//!     session.connect(&mut |event| println!("{event:?}"))?;
//!
//!     session.set_frequency(12.5)?;
//!     session.set_amplitude(Channel::One, 5.0)?;
//!     session.set_waveform(Waveform::Triangular)?;
//!
//!     println!("{:?}", session.snapshot());
//!     session.disconnect();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod host;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker consulted between discovery probes.
///
/// The checker should return `true` when the current scan should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativeSerial};
#[cfg(feature = "native")]
pub use host::discover_ports;
pub use {
    error::{Error, Result},
    host::format_port_list,
    port::{BridgeKind, Port, PortEnumerator, PortInfo, PortOpener, SerialBackend, SerialConfig},
    protocol::{
        Channel, Command, DiscoveryEvent, DiscoveryState, Timings, Waveform, parse_amplitude,
        parse_frequency,
    },
    session::{DeviceSession, SessionSnapshot, SessionState},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
