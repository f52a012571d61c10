//! Integration tests for core CLI contract behavior.
//!
//! None of these need a board attached: they cover argument handling, exit
//! codes, output stream separation and the scripted shell while disconnected.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ipmc");
    // Keep the developer's own settings out of the tests
    cmd.env_remove("IPMC_PORT")
        .env_remove("IPMC_NON_INTERACTIVE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ipmc"))
        .stdout(predicate::str::contains("Usage"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ipmc"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_examples_without_colors() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(stdout.contains("ipmc set --frequency"));
    assert!(!stdout.contains("\x1b["), "colors should be off when piped");
}

// ============================================================================
// Exit codes: 0 success, 1 runtime, 2 usage, 130 cancelled
// ============================================================================

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_invalid_flag() {
    cli_cmd()
        .arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unknown_command_suggests_similar() {
    cli_cmd()
        .arg("sacn")
        .assert()
        .failure()
        .stderr(predicate::str::contains("scan"));
}

#[test]
fn set_without_values_is_usage_error() {
    cli_cmd()
        .arg("set")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("nothing to set"));
}

#[test]
fn set_out_of_range_frequency_fails_before_scanning() {
    cli_cmd()
        .args(["set", "--frequency", "0.05"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Frequency must be between"));
}

#[test]
fn set_out_of_range_amplitude_fails_before_scanning() {
    cli_cmd()
        .args(["set", "--amplitude1", "25"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Amplitude must be between"));
}

#[test]
fn set_unknown_waveform_fails() {
    cli_cmd()
        .args(["set", "--waveform", "noise"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Unknown signal type"));
}

#[test]
fn set_amplitude_two_requires_no_sync() {
    cli_cmd()
        .args(["set", "--amplitude2", "3"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--no-sync"));
}

#[test]
fn scan_on_missing_port_exits_one() {
    cli_cmd()
        .args(["--port", "INVALID_PORT_NAME_XYZ", "scan"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("No IPMC device found"));
}

#[test]
fn zero_poll_interval_in_config_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path().join("ipmc.toml"),
        "[timing]\npoll_interval_ms = 0\n",
    )
    .expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .arg("scan")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("poll interval"));
}

#[test]
fn invalid_config_file_only_warns() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("ipmc.toml"), "invalid toml [[[").expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(output.status.success(), "config errors are warnings");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

// ============================================================================
// Output streams
// ============================================================================

#[test]
fn list_ports_json_is_a_clean_array() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert!(parsed.is_array(), "list-ports --json should return an array");
    assert!(output.stderr.is_empty(), "JSON output should not touch stderr");
}

#[test]
fn completions_write_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_ipmc()"));
}

#[test]
fn completions_without_shell_is_usage_error() {
    cli_cmd()
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("specify a shell"));
}

// ============================================================================
// Scripted shell (stdin is not a terminal)
// ============================================================================

#[test]
fn shell_reads_commands_from_stdin() {
    cli_cmd()
        .args(["--non-interactive", "shell"])
        .write_stdin("help\nstatus\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync on|off"))
        .stdout(predicate::str::contains("disconnected"));
}

#[test]
fn shell_reports_commands_without_connection() {
    cli_cmd()
        .arg("shell")
        .write_stdin("freq 5\nwave\nfreq 99\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not connected"))
        .stdout(predicate::str::contains("No signal type selected"))
        .stdout(predicate::str::contains("Frequency must be between"));
}

#[test]
fn non_interactive_environment_variable_works() {
    cli_cmd()
        .env("IPMC_NON_INTERACTIVE", "true")
        .arg("shell")
        .write_stdin("quit\n")
        .assert()
        .success();
}
