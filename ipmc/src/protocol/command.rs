//! Command set and wire encoding.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{ACK, Timings};

/// Lowest accepted frequency in Hz.
pub const FREQUENCY_MIN_HZ: f64 = 0.1;
/// Highest accepted frequency in Hz.
pub const FREQUENCY_MAX_HZ: f64 = 30.0;
/// Lowest accepted peak-to-peak amplitude in volts.
pub const AMPLITUDE_MIN_V: f64 = 0.0;
/// Highest accepted peak-to-peak amplitude in volts.
pub const AMPLITUDE_MAX_V: f64 = 20.0;

/// Signal shape generated by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Waveform {
    /// Sine wave (code 0).
    #[default]
    Sine,
    /// Square wave (code 1).
    Square,
    /// Sawtooth wave (code 2).
    Sawtooth,
    /// Triangular wave (code 3).
    Triangular,
}

impl Waveform {
    /// All variants in wire-code order.
    pub const ALL: [Self; 4] = [Self::Sine, Self::Square, Self::Sawtooth, Self::Triangular];

    /// Digit sent after `T1`.
    pub fn code(self) -> u8 {
        match self {
            Self::Sine => 0,
            Self::Square => 1,
            Self::Sawtooth => 2,
            Self::Triangular => 3,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Sawtooth => "sawtooth",
            Self::Triangular => "triangular",
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Waveform {
    type Err = Error;

    /// Accepts a name (case-insensitive) or the wire code `0`..`3`.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        match wanted.as_str() {
            "sine" | "sin" | "0" => Ok(Self::Sine),
            "square" | "sq" | "1" => Ok(Self::Square),
            "sawtooth" | "saw" | "2" => Ok(Self::Sawtooth),
            "triangular" | "triangle" | "tri" | "3" => Ok(Self::Triangular),
            "" => Err(Error::InvalidInput("No signal type selected".into())),
            _ => Err(Error::InvalidInput(format!(
                "Unknown signal type '{}'; expected sine, square, sawtooth or triangular",
                s.trim()
            ))),
        }
    }
}

/// Amplitude output addressed by an `A` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Channel {
    /// Both outputs at once (`A0`).
    Both,
    /// First IPMC output (`A1`).
    One,
    /// Second IPMC output (`A2`).
    Two,
}

impl Channel {
    /// Digit sent after `A`.
    pub fn code(self) -> u8 {
        match self {
            Self::Both => 0,
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// A host-side protocol message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Set output frequency in Hz.
    SetFrequency(f64),
    /// Set peak-to-peak amplitude in volts.
    SetAmplitude {
        /// Target output(s).
        channel: Channel,
        /// Peak-to-peak volts.
        volts: f64,
    },
    /// Select the signal shape.
    SetWaveform(Waveform),
    /// Confirmation probe sent once the readiness banner was seen.
    Probe,
    /// Acknowledgement frame. Only the device sends it; encoded for completeness.
    Confirm,
    /// End of session.
    Terminate,
}

impl Command {
    /// Check value ranges. Pure: never touches a port.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::SetFrequency(hz) => check_frequency(hz),
            Self::SetAmplitude { volts, .. } => check_amplitude(volts),
            Self::SetWaveform(_) | Self::Probe | Self::Confirm | Self::Terminate => Ok(()),
        }
    }

    /// Exact bytes put on the wire.
    ///
    /// Values are truncated toward zero: frequency in tenths of Hz, amplitude
    /// in whole volts.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::SetFrequency(hz) => format!("F1{}\n", (hz * 10.0) as i64).into_bytes(),
            Self::SetAmplitude { channel, volts } => {
                format!("A{}{}\n", channel.code(), volts as i64).into_bytes()
            },
            Self::SetWaveform(waveform) => format!("T1{}\n", waveform.code()).into_bytes(),
            Self::Probe => b"S\n".to_vec(),
            Self::Confirm => vec![ACK],
            Self::Terminate => b"E".to_vec(),
        }
    }

    /// Printable form of the frame without its terminator, for logs and errors.
    pub fn label(&self) -> String {
        let frame = self.encode();
        match self {
            Self::Confirm => format!("{ACK:#04x}"),
            _ => String::from_utf8_lossy(&frame).trim_end().to_string(),
        }
    }

    /// Delay between writing this command and reading its answer.
    ///
    /// `None` means the device does not answer.
    pub fn settle_delay(&self, timings: &Timings) -> Option<Duration> {
        match self {
            Self::SetFrequency(_) | Self::SetAmplitude { .. } => Some(timings.value_settle),
            Self::SetWaveform(_) => Some(timings.waveform_settle),
            Self::Probe => Some(timings.confirm_delay),
            Self::Confirm | Self::Terminate => None,
        }
    }
}

fn check_frequency(hz: f64) -> Result<()> {
    if hz.is_finite() && (FREQUENCY_MIN_HZ..=FREQUENCY_MAX_HZ).contains(&hz) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Frequency must be between {FREQUENCY_MIN_HZ} and {FREQUENCY_MAX_HZ} Hz (got {hz})"
        )))
    }
}

fn check_amplitude(volts: f64) -> Result<()> {
    if volts.is_finite() && (AMPLITUDE_MIN_V..=AMPLITUDE_MAX_V).contains(&volts) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Amplitude must be between {AMPLITUDE_MIN_V} and {AMPLITUDE_MAX_V} V (got {volts})"
        )))
    }
}

fn parse_number(text: &str, what: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::InvalidInput(format!("{what} must be a number (got '{}')", text.trim())))
}

/// Parse and range-check a user-entered frequency in Hz.
pub fn parse_frequency(text: &str) -> Result<f64> {
    let hz = parse_number(text, "Frequency")?;
    check_frequency(hz)?;
    Ok(hz)
}

/// Parse and range-check a user-entered amplitude in volts.
pub fn parse_amplitude(text: &str) -> Result<f64> {
    let volts = parse_number(text, "Amplitude")?;
    check_amplitude(volts)?;
    Ok(volts)
}
