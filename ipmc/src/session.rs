//! Device session: the single owner of the confirmed transport.
//!
//! The presentation layer creates one [`DeviceSession`] per run and drives it
//! through `connect`, `send` and `disconnect`. It reads back what the device
//! has acknowledged through [`DeviceSession::snapshot`], never by keeping its
//! own copy.
//!
//! Cached values change only after the device acknowledges a command. A
//! rejected or unanswered command leaves them as they were.

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialBackend};
use crate::protocol::{
    Channel, Command, Discovery, DiscoveryEvent, Observer, Timings, Waveform, link,
};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SessionState {
    /// No transport held.
    Disconnected,
    /// A confirmed transport is held.
    Connected,
}

/// Read-only copy of the session for display.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    /// Connection status.
    pub state: SessionState,
    /// Port the device answered on, while connected.
    pub port: Option<String>,
    /// Last acknowledged frequency in Hz.
    pub frequency_hz: Option<f64>,
    /// Last acknowledged amplitude of output 1 in volts.
    pub amplitude_1: Option<f64>,
    /// Last acknowledged amplitude of output 2 in volts.
    pub amplitude_2: Option<f64>,
    /// Last acknowledged signal shape.
    pub waveform: Option<Waveform>,
    /// Whether output 2 mirrors output 1.
    pub sync: bool,
    /// Value a channel-2 input should be pre-filled with.
    pub channel_2_preset: Option<f64>,
}

impl SessionSnapshot {
    /// Whether a transport is held.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Applied {
    frequency_hz: Option<f64>,
    amplitude_1: Option<f64>,
    amplitude_2: Option<f64>,
    waveform: Option<Waveform>,
}

struct Link<P> {
    info: PortInfo,
    port: P,
}

/// Connection to one IPMC board plus its last acknowledged configuration.
pub struct DeviceSession<B: SerialBackend> {
    backend: B,
    timings: Timings,
    port_filter: Option<String>,
    link: Option<Link<B::Port>>,
    applied: Applied,
    sync: bool,
    channel_2_explicit: Option<f64>,
}

impl<B: SerialBackend> DeviceSession<B> {
    /// Disconnected session over `backend`, default timings, sync enabled.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            timings: Timings::default(),
            port_filter: None,
            link: None,
            applied: Applied::default(),
            sync: true,
            channel_2_explicit: None,
        }
    }

    /// Override protocol timings.
    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Restrict discovery to a single port name.
    #[must_use]
    pub fn with_port_filter(mut self, port: Option<String>) -> Self {
        self.port_filter = port;
        self
    }

    /// Initial sync mode.
    #[must_use]
    pub fn with_sync(mut self, enabled: bool) -> Self {
        self.sync = enabled;
        self
    }

    /// Backend the session scans.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Active timings.
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Connection status.
    pub fn state(&self) -> SessionState {
        if self.link.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Whether a transport is held.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Run discovery and keep the confirmed transport.
    ///
    /// Already connected: returns `Ok` without scanning again.
    pub fn connect(&mut self, observer: &mut Observer<'_>) -> Result<()> {
        if let Some(link) = &self.link {
            debug!("Already connected on {}", link.info.name);
            return Ok(());
        }

        let found = Discovery::new(&self.backend, self.timings)
            .with_port_filter(self.port_filter.clone())
            .run(observer)?;

        info!("Connected to IPMC on {}", found.info.name);
        self.link = Some(Link {
            info: found.info,
            port: found.port,
        });
        Ok(())
    }

    /// [`connect`](Self::connect) without progress reporting.
    pub fn connect_quietly(&mut self) -> Result<()> {
        self.connect(&mut |_: &DiscoveryEvent<'_>| {})
    }

    /// Send terminate and release the port. No-op when disconnected.
    pub fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            info!("Disconnecting from {}", link.info.name);
            link::terminate(&mut link.port);
        }
    }

    /// Validate and send a configuration command.
    ///
    /// Invalid values are refused before the connection is even looked at,
    /// so they never reach the wire. A broken transport is dropped and the
    /// session falls back to disconnected.
    pub fn send(&mut self, command: Command) -> Result<()> {
        command.validate()?;
        let command = self.route(command)?;

        let Some(link) = self.link.as_mut() else {
            return Err(Error::NotConnected);
        };

        match link::transact(&mut link.port, &command, &self.timings) {
            Ok(()) => {
                debug!("{} acknowledged", command.label());
                self.record(&command);
                Ok(())
            },
            Err(e) if e.is_transport_failure() => {
                warn!("Lost connection to {}: {e}", link.info.name);
                link.port.close();
                self.link = None;
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    /// Set the output frequency in Hz.
    pub fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.send(Command::SetFrequency(hz))
    }

    /// Set an output's amplitude in volts.
    pub fn set_amplitude(&mut self, channel: Channel, volts: f64) -> Result<()> {
        self.send(Command::SetAmplitude { channel, volts })
    }

    /// Select the signal shape.
    pub fn set_waveform(&mut self, waveform: Waveform) -> Result<()> {
        self.send(Command::SetWaveform(waveform))
    }

    /// Toggle sync mode. Local only, nothing is sent.
    pub fn set_sync(&mut self, enabled: bool) {
        if self.sync != enabled {
            debug!("Sync mode {}", if enabled { "on" } else { "off" });
            self.sync = enabled;
        }
    }

    /// Whether output 2 mirrors output 1.
    pub fn sync(&self) -> bool {
        self.sync
    }

    /// Current state for display.
    pub fn snapshot(&self) -> SessionSnapshot {
        let channel_2_preset = if self.sync {
            self.applied.amplitude_1
        } else {
            self.channel_2_explicit.or(self.applied.amplitude_2)
        };

        SessionSnapshot {
            state: self.state(),
            port: self.link.as_ref().map(|l| l.info.name.clone()),
            frequency_hz: self.applied.frequency_hz,
            amplitude_1: self.applied.amplitude_1,
            amplitude_2: self.applied.amplitude_2,
            waveform: self.applied.waveform,
            sync: self.sync,
            channel_2_preset,
        }
    }

    /// Map a requested command to what actually goes on the wire.
    fn route(&self, command: Command) -> Result<Command> {
        match command {
            Command::SetAmplitude { channel, volts } if self.sync => match channel {
                Channel::One | Channel::Both => Ok(Command::SetAmplitude {
                    channel: Channel::Both,
                    volts,
                }),
                Channel::Two => Err(Error::InvalidInput(
                    "Output 2 follows output 1 while sync is enabled".into(),
                )),
            },
            Command::Probe | Command::Confirm | Command::Terminate => Err(Error::InvalidInput(
                format!("{} is handled by the session itself", command.label()),
            )),
            other => Ok(other),
        }
    }

    fn record(&mut self, command: &Command) {
        match *command {
            Command::SetFrequency(hz) => self.applied.frequency_hz = Some(hz),
            Command::SetAmplitude { channel, volts } => match channel {
                Channel::Both => {
                    self.applied.amplitude_1 = Some(volts);
                    self.applied.amplitude_2 = Some(volts);
                    // Without sync this was an explicit write to output 2 as well
                    if !self.sync {
                        self.channel_2_explicit = Some(volts);
                    }
                },
                Channel::One => self.applied.amplitude_1 = Some(volts),
                Channel::Two => {
                    self.applied.amplitude_2 = Some(volts);
                    self.channel_2_explicit = Some(volts);
                },
            },
            Command::SetWaveform(waveform) => self.applied.waveform = Some(waveform),
            Command::Probe | Command::Confirm | Command::Terminate => {},
        }
    }
}

impl<B: SerialBackend> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(feature = "native")]
impl DeviceSession<crate::port::NativeSerial> {
    /// Session over the host's real serial ports.
    pub fn native() -> Self {
        Self::new(crate::port::NativeSerial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MockHandle, MockPort, MockSerial};
    use crate::protocol::ACK;
    use std::time::Duration;

    fn fast() -> Timings {
        Timings {
            read_timeout: Duration::from_millis(20),
            ready_window: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            confirm_delay: Duration::from_millis(5),
            value_settle: Duration::from_millis(2),
            waveform_settle: Duration::from_millis(1),
        }
    }

    /// A connected session whose device acknowledges everything.
    fn connected() -> (DeviceSession<MockSerial>, MockHandle) {
        let device = MockPort::new("/dev/ttyIPMC")
            .with_startup(b"IPMC_READY\n".to_vec())
            .reply_to_all(vec![ACK]);
        let wire = device.handle();
        let backend = MockSerial::new()
            .with_unavailable("/dev/ttyS0")
            .with_port(device);

        let mut session = DeviceSession::new(backend).with_timings(fast());
        session.connect_quietly().unwrap();
        wire.take_written();
        (session, wire)
    }

    #[test]
    fn test_connect_skips_busy_port() {
        let (session, _wire) = connected();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Connected);
        assert_eq!(snapshot.port.as_deref(), Some("/dev/ttyIPMC"));
        assert_eq!(
            session.backend().open_attempts(),
            vec!["/dev/ttyS0", "/dev/ttyIPMC"]
        );
    }

    #[test]
    fn test_connect_twice_is_noop() {
        let (mut session, _wire) = connected();
        session.connect_quietly().unwrap();
        assert_eq!(session.backend().open_attempts().len(), 2);
        assert!(session.is_connected());
    }

    #[test]
    fn test_connect_failure_stays_disconnected() {
        let backend = MockSerial::new().with_port(MockPort::new("/dev/ttyQUIET"));
        let mut session = DeviceSession::new(backend).with_timings(fast());

        let err = session.connect_quietly().unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.backend().open_now(), 0);
    }

    #[test]
    fn test_send_without_connection() {
        let mut session = DeviceSession::new(MockSerial::new()).with_timings(fast());
        let err = session.set_frequency(10.0).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[test]
    fn test_out_of_range_frequency_writes_nothing() {
        let (mut session, wire) = connected();
        session.set_frequency(12.0).unwrap();
        wire.take_written();

        let err = session.set_frequency(0.05).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(wire.written().is_empty());
        assert_eq!(session.snapshot().frequency_hz, Some(12.0));
    }

    #[test]
    fn test_out_of_range_amplitude_writes_nothing() {
        let (mut session, wire) = connected();
        session.set_sync(false);

        for channel in [Channel::One, Channel::Two] {
            for volts in [-0.1, 20.1] {
                assert!(session.set_amplitude(channel, volts).is_err());
            }
        }
        assert!(wire.written().is_empty());
        assert_eq!(session.snapshot().amplitude_1, None);
        assert_eq!(session.snapshot().amplitude_2, None);
    }

    #[test]
    fn test_synced_amplitude_mirrors_channel_two() {
        let (mut session, wire) = connected();
        assert!(session.sync());

        session.set_amplitude(Channel::One, 5.0).unwrap();

        assert_eq!(wire.written(), b"A05\n");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.amplitude_1, Some(5.0));
        assert_eq!(snapshot.amplitude_2, Some(5.0));
    }

    #[test]
    fn test_channel_two_locked_while_synced() {
        let (mut session, wire) = connected();
        let err = session.set_amplitude(Channel::Two, 3.0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_independent_channels_when_sync_off() {
        let (mut session, wire) = connected();
        session.set_sync(false);

        session.set_amplitude(Channel::One, 4.0).unwrap();
        session.set_amplitude(Channel::Two, 9.5).unwrap();

        assert_eq!(wire.written(), b"A14\nA29\n");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.amplitude_1, Some(4.0));
        assert_eq!(snapshot.amplitude_2, Some(9.5));
    }

    #[test]
    fn test_channel_two_preset_follows_sync_rules() {
        let (mut session, _wire) = connected();

        session.set_amplitude(Channel::One, 6.0).unwrap();
        session.set_sync(false);
        // Never set on its own: falls back to the mirrored value
        assert_eq!(session.snapshot().channel_2_preset, Some(6.0));

        session.set_amplitude(Channel::Two, 2.0).unwrap();
        session.set_sync(true);
        session.set_amplitude(Channel::One, 8.0).unwrap();
        assert_eq!(session.snapshot().channel_2_preset, Some(8.0));

        session.set_sync(false);
        assert_eq!(session.snapshot().channel_2_preset, Some(2.0));
    }

    #[test]
    fn test_both_channels_without_sync_updates_preset() {
        let (mut session, wire) = connected();
        session.set_sync(false);

        session.set_amplitude(Channel::Two, 2.0).unwrap();
        session.set_amplitude(Channel::Both, 9.0).unwrap();

        assert_eq!(wire.written(), b"A22\nA09\n");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.amplitude_2, Some(9.0));
        assert_eq!(snapshot.channel_2_preset, Some(9.0));

        // Still the last explicit value once sync is toggled back off
        session.set_sync(true);
        session.set_amplitude(Channel::One, 5.0).unwrap();
        session.set_sync(false);
        assert_eq!(session.snapshot().channel_2_preset, Some(9.0));
    }

    #[test]
    fn test_rejected_command_keeps_state() {
        let (mut session, wire) = connected();
        session.set_waveform(Waveform::Sine).unwrap();

        wire.queue_reply(vec![0x00]);
        let err = session.set_waveform(Waveform::Square).unwrap_err();
        assert!(matches!(err, Error::Rejected { response: 0x00, .. }));
        assert_eq!(session.snapshot().waveform, Some(Waveform::Sine));
        assert!(session.is_connected());
    }

    #[test]
    fn test_unanswered_amplitude_keeps_state() {
        let device = MockPort::new("p").with_startup(b"IPMC_READY\n".to_vec()).reply(vec![ACK]);
        let backend = MockSerial::new().with_port(device);
        let mut session = DeviceSession::new(backend).with_timings(fast());
        session.connect_quietly().unwrap();

        let err = session.set_amplitude(Channel::One, 5.0).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(session.snapshot().amplitude_1, None);
        assert_eq!(session.snapshot().amplitude_2, None);
    }

    #[test]
    fn test_write_failure_demotes_session() {
        let (mut session, wire) = connected();
        wire.set_fail_writes(true);

        let err = session.set_frequency(10.0).unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(wire.is_closed());
        assert_eq!(session.snapshot().frequency_hz, None);
    }

    #[test]
    fn test_frequency_and_waveform_on_the_wire() {
        let (mut session, wire) = connected();
        session.set_frequency(15.3).unwrap();
        session.set_waveform(Waveform::Square).unwrap();

        assert_eq!(wire.written(), b"F1153\nT11\n");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.frequency_hz, Some(15.3));
        assert_eq!(snapshot.waveform, Some(Waveform::Square));
    }

    #[test]
    fn test_protocol_frames_refused_through_send() {
        let (mut session, wire) = connected();
        for command in [Command::Probe, Command::Confirm, Command::Terminate] {
            assert!(matches!(session.send(command), Err(Error::InvalidInput(_))));
        }
        assert!(wire.written().is_empty());
    }

    #[test]
    fn test_disconnect_sends_terminate_and_is_idempotent() {
        let (mut session, wire) = connected();
        session.set_frequency(3.0).unwrap();
        wire.take_written();

        session.disconnect();
        assert_eq!(wire.written(), b"E");
        assert!(wire.is_closed());

        let before = session.snapshot();
        session.disconnect();
        assert_eq!(session.snapshot(), before);
        assert_eq!(before.state, SessionState::Disconnected);
        assert_eq!(before.frequency_hz, Some(3.0));
        assert_eq!(wire.written(), b"E");
    }

    #[test]
    fn test_drop_terminates_connection() {
        let (session, wire) = connected();
        drop(session);
        assert_eq!(wire.written(), b"E");
        assert!(wire.is_closed());
    }
}
