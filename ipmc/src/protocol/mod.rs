//! IPMC serial protocol.
//!
//! The line protocol is a small ASCII/binary hybrid:
//!
//! ```text
//! device -> host   "...IPMC_READY..."     readiness banner after boot
//! host   -> device "S\n"                  confirmation probe
//! device -> host   0x01                   acknowledgement
//! host   -> device "F1<tenths of Hz>\n"   frequency
//! host   -> device "A<0|1|2><volts>\n"    amplitude (both / channel 1 / channel 2)
//! host   -> device "T1<0..3>\n"           waveform
//! host   -> device "E"                    terminate
//! ```
//!
//! The device never frames its answers, so every exchange is timed: write,
//! wait a settle delay, then look at whatever arrived. Those delays live in
//! [`Timings`].

pub mod command;
pub mod discovery;
pub mod link;

use std::time::Duration;

use crate::error::{Error, Result};

pub use command::{Channel, Command, Waveform, parse_amplitude, parse_frequency};
pub use discovery::{DiscoveredDevice, Discovery, DiscoveryEvent, DiscoveryState, Observer};

/// Banner the firmware prints once it is ready for commands.
pub const READY_MARKER: &[u8] = b"IPMC_READY";

/// Positive acknowledgement byte.
pub const ACK: u8 = 0x01;

/// Protocol delays.
///
/// Defaults match the timing the firmware was written against. They are
/// configurable so tests and slow adapters can tune them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Read timeout applied to every opened port.
    pub read_timeout: Duration,
    /// How long a port gets to print [`READY_MARKER`].
    pub ready_window: Duration,
    /// Sampling period while waiting, and the granularity of observer ticks.
    pub poll_interval: Duration,
    /// Wait between the confirmation probe and reading its answer.
    pub confirm_delay: Duration,
    /// Wait before reading the acknowledgement of frequency/amplitude commands.
    pub value_settle: Duration,
    /// Wait before reading the acknowledgement of waveform commands.
    pub waveform_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            ready_window: Duration::from_secs(3),
            poll_interval: Duration::from_millis(200),
            confirm_delay: Duration::from_secs(1),
            value_settle: Duration::from_millis(500),
            waveform_settle: Duration::from_millis(300),
        }
    }
}

impl Timings {
    /// Upper bound for probing a single silent port.
    pub fn per_port_budget(&self) -> Duration {
        self.ready_window + self.poll_interval
    }

    /// Reject timings discovery cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Check whether `data` contains the readiness banner.
pub fn contains_ready_marker(data: &[u8]) -> bool {
    data.windows(READY_MARKER.len())
        .any(|window| window == READY_MARKER)
}
