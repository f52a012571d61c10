//! Command exchange over a confirmed transport.

use std::thread;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{ACK, Command, Timings};

/// Send `command` and wait for its acknowledgement.
///
/// Validation runs before anything is written. Stale input is discarded
/// first so the byte read after the settle delay belongs to this command.
/// Commands without an answer return as soon as they are written.
pub fn transact<P: Port + ?Sized>(port: &mut P, command: &Command, timings: &Timings) -> Result<()> {
    command.validate()?;

    let frame = command.encode();
    port.clear_input()?;
    trace!("{} <- {:?}", port.name(), String::from_utf8_lossy(&frame));
    port.write_all_bytes(&frame)?;

    let Some(settle) = command.settle_delay(timings) else {
        return Ok(());
    };
    thread::sleep(settle);

    let response = port.read_available()?;
    trace!("{} -> {response:02X?}", port.name());

    match response.first() {
        Some(&ACK) => {
            if response.len() > 1 {
                debug!(
                    "Ignoring {} trailing byte(s) after acknowledgement",
                    response.len() - 1
                );
            }
            Ok(())
        },
        Some(&other) => Err(Error::Rejected {
            command: command.label(),
            response: other,
        }),
        None => Err(Error::Timeout(format!(
            "no acknowledgement for {} within {settle:?}",
            command.label()
        ))),
    }
}

/// Tell the device the session is over and release the port.
///
/// Best-effort: a write failure is logged, the port is closed regardless.
pub fn terminate<P: Port + ?Sized>(port: &mut P) {
    if let Err(e) = port.write_all_bytes(&Command::Terminate.encode()) {
        warn!("Failed to send terminate to {}: {e}", port.name());
    }
    port.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPort;
    use crate::protocol::{Channel, Waveform};
    use std::time::Duration;

    fn fast() -> Timings {
        Timings {
            read_timeout: Duration::from_millis(20),
            ready_window: Duration::from_millis(20),
            poll_interval: Duration::from_millis(2),
            confirm_delay: Duration::from_millis(2),
            value_settle: Duration::from_millis(2),
            waveform_settle: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_acknowledged_command() {
        let mut port = MockPort::new("m").reply(vec![ACK]);
        let wire = port.handle();

        transact(&mut port, &Command::SetFrequency(15.3), &fast()).unwrap();
        assert_eq!(wire.written(), b"F1153\n");
    }

    #[test]
    fn test_stale_input_is_discarded_before_send() {
        let mut port = MockPort::new("m")
            .with_startup(vec![0x00, 0x00])
            .reply(vec![ACK]);

        transact(&mut port, &Command::SetWaveform(Waveform::Square), &fast()).unwrap();
    }

    #[test]
    fn test_rejected_command() {
        let mut port = MockPort::new("m").reply(vec![0x15]);
        let command = Command::SetAmplitude {
            channel: Channel::Two,
            volts: 4.0,
        };

        match transact(&mut port, &command, &fast()) {
            Err(Error::Rejected { command, response }) => {
                assert_eq!(command, "A24");
                assert_eq!(response, 0x15);
            },
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_silent_device_times_out() {
        let mut port = MockPort::new("m");
        let err = transact(&mut port, &Command::SetFrequency(1.0), &fast()).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_invalid_command_writes_nothing() {
        let mut port = MockPort::new("m").reply_to_all(vec![ACK]);
        let wire = port.handle();

        let err = transact(&mut port, &Command::SetFrequency(45.0), &fast()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_terminate_sends_e_and_closes() {
        let mut port = MockPort::new("m");
        let wire = port.handle();

        terminate(&mut port);
        assert_eq!(wire.written(), b"E");
        assert!(wire.is_closed());
    }

    #[test]
    fn test_terminate_closes_even_when_write_fails() {
        let mut port = MockPort::new("m").failing_writes();
        let wire = port.handle();

        terminate(&mut port);
        assert!(wire.is_closed());
    }
}
