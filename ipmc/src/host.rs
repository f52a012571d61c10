//! Host-side utilities for serial port listing.

use log::debug;

use crate::port::{PortEnumerator, PortInfo};

/// List the ports `enumerator` reports, or nothing if enumeration fails.
pub fn ports_from<E: PortEnumerator + ?Sized>(enumerator: &E) -> Vec<PortInfo> {
    match enumerator.list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Discover all serial ports on this machine.
#[cfg(feature = "native")]
#[must_use]
pub fn discover_ports() -> Vec<PortInfo> {
    ports_from(&crate::port::NativeSerial)
}

/// Format a list of ports for display, one line each.
pub fn format_port_list(ports: &[PortInfo]) -> Vec<String> {
    ports.iter().map(PortInfo::describe).collect()
}
