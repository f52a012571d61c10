//! Port scanning handshake.
//!
//! Every candidate port goes through the same sequence, one port at a time so
//! that at most one OS handle is ever held:
//!
//! ```text
//!  Idle -> ProbingPort -> AwaitingReady -> AwaitingConfirm -> Found
//!              |               |                 |
//!              +-------<-------+--------<--------+  (next port)
//!              |
//!              +-> Exhausted (no port left)
//! ```
//!
//! 1. Open the port at 115200 baud. Ports that refuse to open are skipped.
//! 2. Sample buffered input for `IPMC_READY` until the ready window closes.
//! 3. Send `S\n`, wait the confirm delay, read one byte. `0x01` means found.
//!
//! The readiness banner alone is not enough: other boards print similar boot
//! chatter. Only the acknowledged probe confirms an IPMC controller.
//!
//! All waits are split into poll-interval slices and the observer is called
//! after each slice, so a UI can keep drawing while a scan runs.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::{BAUD_RATE, Port, PortInfo, SerialBackend, SerialConfig};
use crate::protocol::{ACK, Command, Timings, contains_ready_marker};

/// Where a discovery run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscoveryState {
    /// Not started.
    Idle,
    /// Opening a candidate port.
    ProbingPort,
    /// Waiting for the readiness banner.
    AwaitingReady,
    /// Probe sent, waiting for the acknowledgement.
    AwaitingConfirm,
    /// Device confirmed.
    Found,
    /// All candidates tried without success.
    Exhausted,
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "idle",
            Self::ProbingPort => "opening",
            Self::AwaitingReady => "waiting for ready banner",
            Self::AwaitingConfirm => "confirming",
            Self::Found => "found",
            Self::Exhausted => "exhausted",
        };
        f.write_str(text)
    }
}

/// Progress report handed to the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent<'a> {
    /// Candidate list ready.
    Enumerated {
        /// Number of candidate ports.
        count: usize,
    },
    /// The state machine moved.
    StateChanged {
        /// Port being probed (empty once exhausted).
        port: &'a str,
        /// New state.
        state: DiscoveryState,
    },
    /// One poll slice elapsed. The observer may pump its UI here.
    Tick {
        /// Port being probed.
        port: &'a str,
        /// Current state.
        state: DiscoveryState,
        /// Time spent in the current state.
        elapsed: Duration,
    },
    /// A port was ruled out.
    Skipped {
        /// Port that was skipped.
        port: &'a str,
        /// Why.
        reason: String,
    },
}

/// A confirmed device and the transport it answered on.
pub struct DiscoveredDevice<P> {
    /// Descriptor of the winning port.
    pub info: PortInfo,
    /// Open, confirmed transport.
    pub port: P,
}

impl<P> fmt::Debug for DiscoveredDevice<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredDevice")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Observer callback type.
pub type Observer<'o> = dyn for<'e> FnMut(&DiscoveryEvent<'e>) + 'o;

enum Verdict {
    Confirmed,
    Rejected(String),
}

/// One discovery run over a backend's ports.
pub struct Discovery<'a, B: SerialBackend> {
    backend: &'a B,
    timings: Timings,
    port_filter: Option<String>,
    interrupted: fn() -> bool,
    state: DiscoveryState,
}

impl<'a, B: SerialBackend> Discovery<'a, B> {
    /// Prepare a run over every port `backend` lists.
    pub fn new(backend: &'a B, timings: Timings) -> Self {
        Self {
            backend,
            timings,
            port_filter: None,
            interrupted: crate::is_interrupted_requested,
            state: DiscoveryState::Idle,
        }
    }

    /// Only probe the port with this exact name.
    ///
    /// The port is tried even if the host does not list it.
    #[must_use]
    pub fn with_port_filter(mut self, port: Option<String>) -> Self {
        self.port_filter = port;
        self
    }

    /// Replace the global interrupt check consulted between ports.
    #[must_use]
    pub fn with_interrupt_check(mut self, interrupted: fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Current state.
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Scan candidates until one confirms.
    ///
    /// Per-port failures are logged and reported as [`DiscoveryEvent::Skipped`];
    /// only the overall outcome is returned.
    pub fn run(&mut self, observer: &mut Observer<'_>) -> Result<DiscoveredDevice<B::Port>> {
        self.timings.validate()?;
        let candidates = self.candidates();
        observer(&DiscoveryEvent::Enumerated {
            count: candidates.len(),
        });

        if candidates.is_empty() {
            warn!("No serial ports available");
            self.transition("", DiscoveryState::Exhausted, observer);
            return Err(Error::NoPortsFound);
        }

        info!("Scanning {} serial port(s) for an IPMC device", candidates.len());

        for info in candidates {
            if (self.interrupted)() {
                debug!("Discovery interrupted before {}", info.name);
                return Err(Error::Interrupted);
            }

            if let Some(port) = self.probe(&info, observer) {
                info!("IPMC device confirmed on {}", info.name);
                self.transition(&info.name, DiscoveryState::Found, observer);
                return Ok(DiscoveredDevice { info, port });
            }
        }

        warn!("No IPMC device answered on any port");
        self.transition("", DiscoveryState::Exhausted, observer);
        Err(Error::DeviceNotFound)
    }

    fn candidates(&self) -> Vec<PortInfo> {
        let listed = match self.backend.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Failed to enumerate serial ports: {e}");
                Vec::new()
            },
        };

        match &self.port_filter {
            None => listed,
            Some(wanted) => {
                let matching: Vec<PortInfo> = listed
                    .into_iter()
                    .filter(|p| &p.name == wanted)
                    .collect();
                if matching.is_empty() {
                    debug!("{wanted} is not listed by the host, trying it anyway");
                    vec![PortInfo::named(wanted.clone())]
                } else {
                    matching
                }
            },
        }
    }

    /// Run the handshake on one port. The port is closed unless confirmed.
    fn probe(&mut self, info: &PortInfo, observer: &mut Observer<'_>) -> Option<B::Port> {
        let name = info.name.as_str();
        self.transition(name, DiscoveryState::ProbingPort, observer);

        let config = SerialConfig::new(name, BAUD_RATE).with_timeout(self.timings.read_timeout);
        let mut port = match self.backend.open(&config) {
            Ok(port) => port,
            Err(e) => {
                warn!("Skipping {name}: {e}");
                observer(&DiscoveryEvent::Skipped {
                    port: name,
                    reason: e.to_string(),
                });
                return None;
            },
        };

        let reason = match self.handshake(&mut port, name, observer) {
            Ok(Verdict::Confirmed) => return Some(port),
            Ok(Verdict::Rejected(reason)) => reason,
            Err(e) => format!("I/O failure while probing: {e}"),
        };

        debug!("Skipping {name}: {reason}");
        port.close();
        observer(&DiscoveryEvent::Skipped { port: name, reason });
        None
    }

    fn handshake(
        &mut self,
        port: &mut B::Port,
        name: &str,
        observer: &mut Observer<'_>,
    ) -> Result<Verdict> {
        self.transition(name, DiscoveryState::AwaitingReady, observer);
        if !self.await_ready(port, name, observer)? {
            return Ok(Verdict::Rejected(format!(
                "no ready banner within {:?}",
                self.timings.ready_window
            )));
        }

        self.transition(name, DiscoveryState::AwaitingConfirm, observer);
        // Drop the rest of the boot chatter so the next byte is the answer
        port.clear_input()?;
        port.write_all_bytes(&Command::Probe.encode())?;
        self.wait_sliced(
            name,
            DiscoveryState::AwaitingConfirm,
            self.timings.confirm_delay,
            observer,
        );

        if port.bytes_available()? == 0 {
            return Ok(Verdict::Rejected("no answer to confirmation probe".into()));
        }
        let deadline = Instant::now() + self.timings.read_timeout;
        let answer = port.read_exact_until(1, deadline)?;
        trace!("{name} -> {answer:02X?}");

        match answer.first() {
            Some(&ACK) => Ok(Verdict::Confirmed),
            Some(other) => Ok(Verdict::Rejected(format!(
                "unexpected probe answer {other:#04x}"
            ))),
            None => Ok(Verdict::Rejected("empty probe answer".into())),
        }
    }

    /// Sample input until the banner shows up or the ready window closes.
    fn await_ready(
        &self,
        port: &mut B::Port,
        name: &str,
        observer: &mut Observer<'_>,
    ) -> Result<bool> {
        let start = Instant::now();
        let mut seen: Vec<u8> = Vec::new();

        loop {
            let chunk = port.read_available()?;
            if !chunk.is_empty() {
                trace!("{name} -> {:?}", String::from_utf8_lossy(&chunk));
                seen.extend_from_slice(&chunk);
                if contains_ready_marker(&seen) {
                    debug!("{name} is ready after {:?}", start.elapsed());
                    return Ok(true);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timings.ready_window {
                return Ok(false);
            }

            thread::sleep(
                self.timings
                    .poll_interval
                    .min(self.timings.ready_window - elapsed),
            );
            observer(&DiscoveryEvent::Tick {
                port: name,
                state: DiscoveryState::AwaitingReady,
                elapsed: start.elapsed(),
            });
        }
    }

    fn wait_sliced(
        &self,
        name: &str,
        state: DiscoveryState,
        total: Duration,
        observer: &mut Observer<'_>,
    ) {
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }
            thread::sleep(self.timings.poll_interval.min(total - elapsed));
            observer(&DiscoveryEvent::Tick {
                port: name,
                state,
                elapsed: start.elapsed(),
            });
        }
    }

    fn transition(&mut self, port: &str, state: DiscoveryState, observer: &mut Observer<'_>) {
        trace!("Discovery: {} -> {} ({port})", self.state, state);
        self.state = state;
        observer(&DiscoveryEvent::StateChanged { port, state });
    }
}
