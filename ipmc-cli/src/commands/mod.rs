//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod list_ports;
pub(crate) mod progress;
pub(crate) mod scan;
pub(crate) mod set;
pub(crate) mod shell;

use anyhow::Result;
use console::style;
use ipmc::{DeviceSession, NativeSerial, SerialBackend, SessionSnapshot, Timings};

use crate::{CliError, use_fancy_output};
use progress::ScanProgress;

/// Resolved session parameters for one invocation.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    /// Restrict discovery to this port.
    pub port: Option<String>,
    /// Protocol delays.
    pub timings: Timings,
    /// Initial sync mode.
    pub sync: bool,
    /// Suppress non-essential output.
    pub quiet: bool,
    /// Never prompt.
    pub non_interactive: bool,
}

impl Context {
    /// Disconnected session over the host's serial ports.
    pub(crate) fn session(&self) -> DeviceSession<NativeSerial> {
        self.configure(DeviceSession::native())
    }

    /// Apply these parameters to a fresh session.
    pub(crate) fn configure<B: SerialBackend>(&self, session: DeviceSession<B>) -> DeviceSession<B> {
        session
            .with_timings(self.timings)
            .with_port_filter(self.port.clone())
            .with_sync(self.sync)
    }

    fn show_progress(&self) -> bool {
        !self.quiet && use_fancy_output()
    }
}

/// Run discovery with a spinner on stderr.
pub(crate) fn connect<B: SerialBackend>(
    session: &mut DeviceSession<B>,
    ctx: &Context,
) -> Result<()> {
    let mut progress = ScanProgress::new(ctx.show_progress());
    let outcome = session.connect(&mut |event| progress.observe(event));

    match outcome {
        Ok(()) => {
            progress.finish(session.snapshot().port.as_deref().unwrap_or_default());
            Ok(())
        },
        Err(ipmc::Error::Interrupted) => {
            progress.abandon();
            Err(CliError::Cancelled("Scan cancelled".into()).into())
        },
        Err(e) => {
            progress.abandon();
            Err(e.into())
        },
    }
}

fn volts(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v} V"))
}

/// Human-readable snapshot, one field per line.
pub(crate) fn format_snapshot(snapshot: &SessionSnapshot) -> Vec<String> {
    let state = match &snapshot.port {
        Some(port) if snapshot.is_connected() => format!("connected ({port})"),
        _ => "disconnected".to_string(),
    };
    let frequency = snapshot
        .frequency_hz
        .map_or_else(|| "-".to_string(), |hz| format!("{hz} Hz"));
    let waveform = snapshot
        .waveform
        .map_or_else(|| "-".to_string(), |w| w.to_string());

    vec![
        format!("{:<12} {state}", "Device:"),
        format!("{:<12} {frequency}", "Frequency:"),
        format!("{:<12} {}", "Output 1:", volts(snapshot.amplitude_1)),
        format!("{:<12} {}", "Output 2:", volts(snapshot.amplitude_2)),
        format!("{:<12} {waveform}", "Waveform:"),
        format!(
            "{:<12} {}",
            "Sync:",
            if snapshot.sync { "on" } else { "off" }
        ),
    ]
}

/// Print a snapshot to stdout, as JSON or styled text.
pub(crate) fn print_snapshot(snapshot: &SessionSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }
    for line in format_snapshot(snapshot) {
        let (label, value) = line.split_at(12);
        println!("{}{}", style(label).bold(), value);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ipmc::port::{MockHandle, MockPort, MockSerial};
    use ipmc::{Channel, Waveform};
    use std::time::Duration;

    pub(crate) fn test_context() -> Context {
        Context {
            port: None,
            timings: Timings {
                read_timeout: Duration::from_millis(20),
                ready_window: Duration::from_millis(30),
                poll_interval: Duration::from_millis(5),
                confirm_delay: Duration::from_millis(5),
                value_settle: Duration::from_millis(2),
                waveform_settle: Duration::from_millis(1),
            },
            sync: true,
            quiet: true,
            non_interactive: true,
        }
    }

    /// Disconnected session whose only port hosts an acknowledging device.
    pub(crate) fn mock_session() -> (DeviceSession<MockSerial>, MockHandle) {
        let device = MockPort::new("/dev/ttyMOCK")
            .with_startup(b"IPMC_READY\r\n".to_vec())
            .reply_to_all(vec![0x01]);
        let wire = device.handle();
        let session = test_context().configure(DeviceSession::new(MockSerial::new().with_port(device)));
        (session, wire)
    }

    #[test]
    fn test_connect_through_helper() {
        let (mut session, wire) = mock_session();
        connect(&mut session, &test_context()).unwrap();
        assert!(session.is_connected());
        assert_eq!(wire.written(), b"S\n");
    }

    #[test]
    fn test_connect_reports_missing_device() {
        let mut session = test_context().configure(DeviceSession::new(MockSerial::new()));
        let err = connect(&mut session, &test_context()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ipmc::Error>(),
            Some(ipmc::Error::NoPortsFound)
        ));
    }

    #[test]
    fn test_format_snapshot() {
        let (mut session, _wire) = mock_session();
        let lines = format_snapshot(&session.snapshot());
        assert_eq!(lines[0], "Device:      disconnected");
        assert_eq!(lines[1], "Frequency:   -");

        connect(&mut session, &test_context()).unwrap();
        session.set_frequency(12.5).unwrap();
        session.set_amplitude(Channel::One, 5.0).unwrap();
        session.set_waveform(Waveform::Sawtooth).unwrap();

        let lines = format_snapshot(&session.snapshot());
        assert_eq!(lines[0], "Device:      connected (/dev/ttyMOCK)");
        assert_eq!(lines[1], "Frequency:   12.5 Hz");
        assert_eq!(lines[2], "Output 1:    5 V");
        assert_eq!(lines[3], "Output 2:    5 V");
        assert_eq!(lines[4], format!("Waveform:    {}", Waveform::Sawtooth));
        assert_eq!(lines[5], "Sync:        on");
    }
}
