//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{Cli, CliError};

const BIN: &str = "ipmc";

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN, &mut io::stdout());
}

/// Detect the user's current shell from `$SHELL`.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Map a shell binary path to its `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

fn home_dir() -> Result<PathBuf> {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .context("Could not determine home directory")
}

fn xdg_dir(var: &str, fallback: &[&str]) -> Result<PathBuf> {
    match env::var(var) {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(fallback.iter().fold(home_dir()?, |path, part| path.join(part))),
    }
}

/// Where the completion script for `shell` is installed.
fn install_path(shell: Shell) -> Result<PathBuf> {
    Ok(match shell {
        Shell::Bash => xdg_dir("XDG_DATA_HOME", &[".local", "share"])?
            .join("bash-completion")
            .join("completions")
            .join(BIN),
        Shell::Zsh => home_dir()?.join(".zfunc").join(format!("_{BIN}")),
        Shell::Fish => xdg_dir("XDG_CONFIG_HOME", &[".config"])?
            .join("fish")
            .join("completions")
            .join(format!("{BIN}.fish")),
        Shell::Elvish => xdg_dir("XDG_CONFIG_HOME", &[".config"])?
            .join("elvish")
            .join("lib")
            .join(format!("{BIN}.elv")),
        Shell::PowerShell => xdg_dir("XDG_CONFIG_HOME", &[".config"])?
            .join("powershell")
            .join("completions")
            .join(format!("{BIN}.ps1")),
        other => {
            return Err(CliError::Usage(format!("cannot auto-install completions for {other}")).into());
        },
    })
}

/// Write the completion script into the shell's completion directory.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg.or_else(detect_shell_type) {
        Some(shell) => shell,
        None => {
            return Err(CliError::Usage(format!(
                "could not detect your shell; pass it explicitly, e.g. {BIN} completions --install bash"
            ))
            .into());
        },
    };

    let path = install_path(shell)?;
    let mut script = Vec::new();
    generate(shell, &mut Cli::command(), BIN, &mut script);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &script)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(shell).cyan(),
        style(path.display()).yellow()
    );
    match shell {
        Shell::Zsh => eprintln!(
            "Make sure {} is in your fpath, then restart your shell.",
            style("~/.zfunc").cyan()
        ),
        Shell::PowerShell => eprintln!(
            "Load it from your profile: {}",
            style(format!(". {}", path.display())).cyan()
        ),
        _ => eprintln!("Completions load automatically in new shells."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("/usr/bin/pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("elvish"), Some(Shell::Elvish));
        assert_eq!(shell_from_path("/usr/bin/tcsh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_install_path_file_names() {
        if home_dir().is_err() {
            return;
        }
        let bash = install_path(Shell::Bash).unwrap();
        assert!(bash.ends_with("bash-completion/completions/ipmc"));
        let zsh = install_path(Shell::Zsh).unwrap();
        assert!(zsh.ends_with(".zfunc/_ipmc"));
        let fish = install_path(Shell::Fish).unwrap();
        assert!(fish.ends_with("fish/completions/ipmc.fish"));
    }

    #[test]
    fn test_generated_script_mentions_subcommands() {
        let mut script = Vec::new();
        generate(Shell::Bash, &mut Cli::command(), BIN, &mut script);
        let script = String::from_utf8(script).unwrap();
        assert!(script.contains("_ipmc()"));
        assert!(script.contains("list-ports"));
        assert!(script.contains("shell"));
    }
}
