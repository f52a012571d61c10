//! `shell` command: interactive control console.
//!
//! Reads one command per line. On a terminal the prompt comes from
//! `dialoguer`; otherwise (pipes, `--non-interactive`) lines are read from
//! stdin so the console can be scripted.

use anyhow::Result;
use console::style;
use dialoguer::{Error as DialoguerError, Input, theme::ColorfulTheme};
use ipmc::{Channel, DeviceSession, SerialBackend, Waveform};
use std::io::{self, BufRead, IsTerminal, Write};

use super::{Context, connect, format_snapshot};
use crate::{CliError, was_interrupted};

const HELP: &[(&str, &str)] = &[
    ("connect", "scan serial ports and connect to the IPMC board"),
    ("disconnect", "release the board"),
    ("freq <hz>", "set the output frequency (0.1 to 30 Hz)"),
    ("amp1 <volts>", "set output 1 amplitude (0 to 20 V)"),
    ("amp2 <volts>", "set output 2 amplitude (sync off only)"),
    ("wave <shape>", "sine, square, sawtooth or triangular (or 0-3)"),
    ("sync on|off", "mirror output 1 onto output 2"),
    ("status", "show the applied configuration"),
    ("help", "show this list"),
    ("quit", "disconnect and leave"),
];

/// One parsed console line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ShellCommand {
    Connect,
    Disconnect,
    Frequency(f64),
    Amplitude(Channel, f64),
    Waveform(Waveform),
    Sync(bool),
    Status,
    Help,
    Quit,
}

/// Parse a console line. Blank lines yield `None`.
pub(crate) fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    let verb = verb.to_ascii_lowercase();
    let no_arg = |command: ShellCommand| match arg {
        None => Ok(Some(command)),
        Some(a) => Err(format!("'{verb}' takes no argument (got '{a}')")),
    };
    let value = |usage: &str| arg.ok_or_else(|| format!("usage: {usage}"));

    match verb.as_str() {
        "connect" | "c" => no_arg(ShellCommand::Connect),
        "disconnect" | "dc" => no_arg(ShellCommand::Disconnect),
        "freq" | "frequency" | "f" => ipmc::parse_frequency(value("freq <hz>")?)
            .map(|hz| Some(ShellCommand::Frequency(hz)))
            .map_err(|e| e.to_string()),
        "amp1" | "a1" => ipmc::parse_amplitude(value("amp1 <volts>")?)
            .map(|v| Some(ShellCommand::Amplitude(Channel::One, v)))
            .map_err(|e| e.to_string()),
        "amp2" | "a2" => ipmc::parse_amplitude(value("amp2 <volts>")?)
            .map(|v| Some(ShellCommand::Amplitude(Channel::Two, v)))
            .map_err(|e| e.to_string()),
        // A missing shape goes through the parser so it reports no selection
        "wave" | "waveform" | "w" => arg
            .unwrap_or_default()
            .parse::<Waveform>()
            .map(|w| Some(ShellCommand::Waveform(w)))
            .map_err(|e| e.to_string()),
        "sync" => match arg.map(str::to_ascii_lowercase).as_deref() {
            Some("on" | "true" | "1") => Ok(Some(ShellCommand::Sync(true))),
            Some("off" | "false" | "0") => Ok(Some(ShellCommand::Sync(false))),
            _ => Err("usage: sync on|off".into()),
        },
        "status" | "s" => no_arg(ShellCommand::Status),
        "help" | "h" | "?" => no_arg(ShellCommand::Help),
        "quit" | "exit" | "q" => no_arg(ShellCommand::Quit),
        other => Err(format!("unknown command '{other}'; type 'help' for a list")),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Where console lines come from.
enum LineSource {
    Terminal(ColorfulTheme),
    Reader(Box<dyn BufRead>),
}

impl LineSource {
    fn next_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self {
            Self::Terminal(theme) => Input::<String>::with_theme(&*theme)
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .map(Some)
                .map_err(map_prompt_error),
            Self::Reader(reader) => {
                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 {
                    Ok(None)
                } else {
                    Ok(Some(line))
                }
            },
        }
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == io::ErrorKind::Interrupted {
                CliError::Cancelled("Shell cancelled".into()).into()
            } else {
                anyhow::Error::new(io_err).context("Failed to read from the terminal")
            }
        },
    }
}

/// Session plus the console state around it.
struct Console<B: SerialBackend> {
    session: DeviceSession<B>,
    ctx: Context,
}

impl<B: SerialBackend> Console<B> {
    fn prompt(&self) -> String {
        match self.session.snapshot().port {
            Some(port) => format!("ipmc ({port})"),
            None => "ipmc (disconnected)".to_string(),
        }
    }

    fn execute(&mut self, command: ShellCommand, out: &mut dyn Write) -> Result<Flow> {
        let outcome = match command {
            ShellCommand::Connect => {
                if let Some(port) = self.session.snapshot().port {
                    writeln!(out, "Already connected on {port}")?;
                    return Ok(Flow::Continue);
                }
                connect(&mut self.session, &self.ctx).map(|()| {
                    let port = self.session.snapshot().port.unwrap_or_default();
                    format!("Connected on {port}")
                })
            },
            ShellCommand::Disconnect => {
                let message = if self.session.is_connected() {
                    "Disconnected"
                } else {
                    "Not connected"
                };
                self.session.disconnect();
                Ok(message.to_string())
            },
            ShellCommand::Frequency(hz) => self
                .session
                .set_frequency(hz)
                .map(|()| format!("Frequency set to {hz} Hz"))
                .map_err(Into::into),
            ShellCommand::Amplitude(channel, volts) => {
                let synced = self.session.sync();
                self.session
                    .set_amplitude(channel, volts)
                    .map(|()| match channel {
                        Channel::One if synced => format!("Outputs 1 and 2 set to {volts} V"),
                        Channel::Two => format!("Output 2 set to {volts} V"),
                        _ => format!("Output 1 set to {volts} V"),
                    })
                    .map_err(Into::into)
            },
            ShellCommand::Waveform(waveform) => self
                .session
                .set_waveform(waveform)
                .map(|()| format!("Waveform set to {waveform}"))
                .map_err(Into::into),
            ShellCommand::Sync(enabled) => {
                self.session.set_sync(enabled);
                if enabled {
                    Ok("Sync on: output 2 follows output 1".to_string())
                } else {
                    let preset = self
                        .session
                        .snapshot()
                        .channel_2_preset
                        .map_or_else(|| "-".to_string(), |v| format!("{v} V"));
                    Ok(format!("Sync off: output 2 preset {preset}"))
                }
            },
            ShellCommand::Status => {
                for line in format_snapshot(&self.session.snapshot()) {
                    writeln!(out, "{line}")?;
                }
                return Ok(Flow::Continue);
            },
            ShellCommand::Help => {
                for (usage, what) in HELP {
                    writeln!(out, "  {usage:<14} {what}")?;
                }
                return Ok(Flow::Continue);
            },
            ShellCommand::Quit => return Ok(Flow::Quit),
        };

        match outcome {
            Ok(message) => writeln!(out, "{message}")?,
            Err(e) => {
                if e.downcast_ref::<CliError>()
                    .is_some_and(|c| matches!(c, CliError::Cancelled(_)))
                {
                    return Err(e);
                }
                writeln!(out, "{} {e:#}", style("Error:").red().bold())?;
            },
        }
        Ok(Flow::Continue)
    }

    fn run(&mut self, source: &mut LineSource, out: &mut dyn Write) -> Result<()> {
        if !self.ctx.quiet {
            writeln!(out, "Type 'help' for a list of commands.")?;
        }

        loop {
            if was_interrupted() {
                self.session.disconnect();
                return Err(CliError::Cancelled("Shell cancelled".into()).into());
            }

            let Some(line) = source.next_line(&self.prompt())? else {
                break;
            };
            match parse_line(&line) {
                Ok(None) => {},
                Ok(Some(command)) => {
                    if self.execute(command, out)? == Flow::Quit {
                        break;
                    }
                },
                Err(message) => writeln!(out, "{} {message}", style("Error:").red().bold())?,
            }
        }

        self.session.disconnect();
        Ok(())
    }
}

/// Run the console until `quit`, end of input or Ctrl-C.
pub(crate) fn cmd_shell(ctx: &Context) -> Result<()> {
    let mut source = if !ctx.non_interactive && io::stdin().is_terminal() {
        LineSource::Terminal(ColorfulTheme::default())
    } else {
        LineSource::Reader(Box::new(io::stdin().lock()))
    };

    let mut console = Console {
        session: ctx.session(),
        ctx: ctx.clone(),
    };
    console.run(&mut source, &mut io::stdout())
}
