//! `set` command: one-shot configuration.

use anyhow::{Context as _, Result};
use ipmc::{Channel, Command, DeviceSession, SerialBackend, Waveform};
use log::info;

use super::{Context, connect, print_snapshot};
use crate::CliError;

/// Values requested on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct SetRequest {
    pub frequency: Option<f64>,
    pub amplitude_1: Option<f64>,
    pub amplitude_2: Option<f64>,
    pub waveform: Option<Waveform>,
    pub sync: bool,
}

impl SetRequest {
    /// Commands to send, in order: frequency, output 1, output 2, waveform.
    ///
    /// Everything is validated here so a bad value never costs a scan.
    pub(crate) fn commands(&self) -> Result<Vec<Command>, CliError> {
        if self.sync && self.amplitude_2.is_some() {
            return Err(CliError::Usage(
                "output 2 follows output 1 while sync is enabled; pass --no-sync to set it".into(),
            ));
        }

        let commands: Vec<Command> = [
            self.frequency.map(Command::SetFrequency),
            self.amplitude_1.map(|volts| Command::SetAmplitude {
                channel: Channel::One,
                volts,
            }),
            self.amplitude_2.map(|volts| Command::SetAmplitude {
                channel: Channel::Two,
                volts,
            }),
            self.waveform.map(Command::SetWaveform),
        ]
        .into_iter()
        .flatten()
        .collect();

        if commands.is_empty() {
            return Err(CliError::Usage(
                "nothing to set; pass --frequency, --amplitude1, --amplitude2 or --waveform".into(),
            ));
        }
        for command in &commands {
            command
                .validate()
                .map_err(|e| CliError::Usage(e.to_string()))?;
        }
        Ok(commands)
    }
}

/// Send `commands` in order, stopping at the first failure.
fn apply<B: SerialBackend>(session: &mut DeviceSession<B>, commands: Vec<Command>) -> Result<()> {
    for command in commands {
        let label = command.label();
        session
            .send(command)
            .with_context(|| format!("Failed to apply {label}"))?;
        info!("Applied {label}");
    }
    Ok(())
}

/// Connect, apply the request, print the resulting state and disconnect.
pub(crate) fn cmd_set(ctx: &Context, request: &SetRequest, json: bool) -> Result<()> {
    let commands = request.commands()?;

    let mut session = ctx.session();
    connect(&mut session, ctx)?;
    let outcome = apply(&mut session, commands);

    // Show what the device actually holds, even after a partial failure
    let snapshot = session.snapshot();
    session.disconnect();
    print_snapshot(&snapshot, json)?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{mock_session, test_context};

    fn request() -> SetRequest {
        SetRequest {
            sync: true,
            ..SetRequest::default()
        }
    }

    #[test]
    fn test_commands_in_fixed_order() {
        let request = SetRequest {
            frequency: Some(12.5),
            amplitude_1: Some(5.0),
            amplitude_2: Some(3.0),
            waveform: Some(Waveform::Triangular),
            sync: false,
        };
        let labels: Vec<_> = request
            .commands()
            .unwrap()
            .iter()
            .map(Command::label)
            .collect();
        assert_eq!(labels, vec!["F1125", "A15", "A23", "T13"]);
    }

    #[test]
    fn test_empty_request_is_usage_error() {
        assert!(matches!(request().commands(), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_amplitude_two_needs_no_sync() {
        let synced = SetRequest {
            amplitude_2: Some(4.0),
            ..request()
        };
        assert!(matches!(synced.commands(), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_out_of_range_value_is_usage_error() {
        let bad = SetRequest {
            frequency: Some(45.0),
            ..request()
        };
        assert!(matches!(bad.commands(), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_apply_sends_in_order_and_mirrors_when_synced() {
        let (mut session, wire) = mock_session();
        connect(&mut session, &test_context()).unwrap();
        wire.take_written();

        let commands = SetRequest {
            frequency: Some(7.0),
            amplitude_1: Some(5.0),
            waveform: Some(Waveform::Square),
            ..request()
        }
        .commands()
        .unwrap();
        apply(&mut session, commands).unwrap();

        assert_eq!(wire.written(), b"F170\nA05\nT11\n");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.frequency_hz, Some(7.0));
        assert_eq!(snapshot.amplitude_2, Some(5.0));
        assert_eq!(snapshot.waveform, Some(Waveform::Square));
    }

    #[test]
    fn test_apply_stops_at_first_rejection() {
        let (mut session, wire) = mock_session();
        connect(&mut session, &test_context()).unwrap();
        wire.take_written();
        wire.queue_reply(vec![0x00]);

        let commands = SetRequest {
            frequency: Some(7.0),
            waveform: Some(Waveform::Sine),
            ..request()
        }
        .commands()
        .unwrap();
        let err = apply(&mut session, commands).unwrap_err();

        assert!(err.to_string().contains("F170"));
        assert_eq!(wire.written(), b"F170\n");
        assert_eq!(session.snapshot().waveform, None);
    }
}
