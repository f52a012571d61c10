//! ipmc CLI - control panel for IPMC dual-output signal generators.
//!
//! ## Features
//!
//! - Scan serial ports for an IPMC board
//! - Apply frequency, amplitude and waveform settings in one shot
//! - Interactive shell for live adjustment
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use ipmc::{Timings, Waveform};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;

use commands::Context;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if spinners and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Failures that map to a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad arguments or an impossible request (exit 2).
    #[error("{0}")]
    Usage(String),
    /// The user aborted (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// ipmc - discover and drive an IPMC signal generator over serial.
///
/// Environment variables:
///   IPMC_PORT              - Only scan this serial port
///   IPMC_NON_INTERACTIVE   - Non-interactive mode (no prompts)
#[derive(Parser)]
#[command(name = "ipmc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    ipmc scan\n  \
    ipmc set --frequency 12.5 --amplitude1 5 --waveform triangular\n  \
    ipmc --port /dev/ttyACM0 shell")]
struct Cli {
    /// Only probe this serial port (all ports are scanned if not specified).
    #[arg(short, long, global = true, env = "IPMC_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (never prompt, read shell commands from stdin).
    #[arg(long, global = true, env = "IPMC_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List serial ports present on this machine.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Find the IPMC board and report which port it answers on.
    Scan {
        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Connect, apply settings, print the resulting state and disconnect.
    Set(SetArgs),

    /// Interactive control console.
    Shell,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected with --install if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions into your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Arguments of `ipmc set`.
#[derive(clap::Args, Debug, Default)]
struct SetArgs {
    /// Output frequency in Hz (0.1 to 30).
    #[arg(short, long, value_parser = parse_frequency_arg, allow_negative_numbers = true)]
    frequency: Option<f64>,

    /// Amplitude of output 1 in volts (0 to 20). Also drives output 2 while synced.
    #[arg(long, value_parser = parse_amplitude_arg, allow_negative_numbers = true)]
    amplitude1: Option<f64>,

    /// Amplitude of output 2 in volts (0 to 20). Requires --no-sync.
    #[arg(long, value_parser = parse_amplitude_arg, allow_negative_numbers = true)]
    amplitude2: Option<f64>,

    /// Signal shape: sine, square, sawtooth or triangular.
    #[arg(short, long, value_parser = parse_waveform_arg)]
    waveform: Option<Waveform>,

    /// Mirror output 1 onto output 2 (default unless `[defaults] sync = false`).
    #[arg(long, overrides_with = "no_sync")]
    sync: bool,

    /// Drive the two outputs independently.
    #[arg(long, overrides_with = "sync")]
    no_sync: bool,

    /// Output the resulting state as JSON to stdout.
    #[arg(long)]
    json: bool,
}

impl SetArgs {
    /// Sync mode requested on the command line, if any. The last flag wins.
    fn sync_override(&self) -> Option<bool> {
        match (self.sync, self.no_sync) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn parse_frequency_arg(s: &str) -> Result<f64, String> {
    ipmc::parse_frequency(s).map_err(|e| e.to_string())
}

fn parse_amplitude_arg(s: &str) -> Result<f64, String> {
    ipmc::parse_amplitude(s).map_err(|e| e.to_string())
}

fn parse_waveform_arg(s: &str) -> Result<Waveform, String> {
    s.parse().map_err(|e: ipmc::Error| e.to_string())
}

/// Map an error to the process exit code.
///
/// 1 runtime failure, 2 usage error, 130 cancelled.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<ipmc::Error>() {
        Some(ipmc::Error::Interrupted) => 130,
        Some(ipmc::Error::InvalidInput(_) | ipmc::Error::Config(_)) => 2,
        _ => 1,
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: stop waiting for the current probe
            std::process::exit(130);
        }
        eprintln!(
            "\n{} finishing current step, press Ctrl-C again to force quit",
            style("Interrupted:").yellow().bold()
        );
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    ipmc::set_interrupt_checker(was_interrupted);
}

/// Resolve the session parameters from CLI, environment and config files.
fn build_context(cli: &Cli, config: &Config) -> Result<Context> {
    let timings: Timings = config.timing.to_timings();
    timings
        .validate()
        .map_err(|e| CliError::Usage(e.to_string()))?;

    Ok(Context {
        port: cli
            .port
            .clone()
            .or_else(|| config.connection.port.clone()),
        timings,
        sync: config.sync_default(),
        quiet: cli.quiet,
        non_interactive: cli.non_interactive,
    })
}

/// Resolve `set` arguments against the context; the command line beats the config default.
fn set_request(args: &SetArgs, ctx: &mut Context) -> commands::set::SetRequest {
    ctx.sync = args.sync_override().unwrap_or(ctx.sync);
    commands::set::SetRequest {
        frequency: args.frequency,
        amplitude_1: args.amplitude1,
        amplitude_2: args.amplitude2,
        waveform: args.waveform,
        sync: ctx.sync,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::list_ports::cmd_list_ports(*json),
        Commands::Scan { json } => {
            let ctx = build_context(cli, &config)?;
            commands::scan::cmd_scan(&ctx, *json)
        },
        Commands::Set(args) => {
            let mut ctx = build_context(cli, &config)?;
            let request = set_request(args, &mut ctx);
            commands::set::cmd_set(&ctx, &request, args.json)
        },
        Commands::Shell => {
            let ctx = build_context(cli, &config)?;
            commands::shell::cmd_shell(&ctx)
        },
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: ipmc completions bash \
                         (or use --install to auto-detect)"
                            .into(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);
    debug!(
        "ipmc v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
