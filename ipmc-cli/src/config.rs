//! Configuration file support for ipmc.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (IPMC_*)
//! 3. Local config file (./ipmc.toml)
//! 4. Global config file (~/.config/ipmc/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyACM0"
//!
//! [timing]
//! ready_window_ms = 3000
//! confirm_delay_ms = 1000
//!
//! [defaults]
//! sync = true
//! ```

use directories::ProjectDirs;
use ipmc::Timings;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "ipmc.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Only scan this port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
}

/// Protocol delay overrides, all in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    /// Read timeout on opened ports.
    pub read_timeout_ms: Option<u64>,
    /// How long a port gets to print its ready banner.
    pub ready_window_ms: Option<u64>,
    /// Sampling period while waiting.
    pub poll_interval_ms: Option<u64>,
    /// Wait after the confirmation probe.
    pub confirm_delay_ms: Option<u64>,
    /// Wait after frequency and amplitude commands.
    pub value_settle_ms: Option<u64>,
    /// Wait after waveform commands.
    pub waveform_settle_ms: Option<u64>,
}

impl TimingConfig {
    /// Built-in timings with the configured overrides applied.
    pub fn to_timings(&self) -> Timings {
        let base = Timings::default();
        let ms = |value: Option<u64>, fallback: Duration| {
            value.map_or(fallback, Duration::from_millis)
        };

        Timings {
            read_timeout: ms(self.read_timeout_ms, base.read_timeout),
            ready_window: ms(self.ready_window_ms, base.ready_window),
            poll_interval: ms(self.poll_interval_ms, base.poll_interval),
            confirm_delay: ms(self.confirm_delay_ms, base.confirm_delay),
            value_settle: ms(self.value_settle_ms, base.value_settle),
            waveform_settle: ms(self.waveform_settle_ms, base.waveform_settle),
        }
    }

    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            read_timeout_ms,
            ready_window_ms,
            poll_interval_ms,
            confirm_delay_ms,
            value_settle_ms,
            waveform_settle_ms
        );
    }
}

/// Session defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Start with output 2 mirroring output 1 (on when unset).
    pub sync: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port selection.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Protocol delays.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Session defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ipmc").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Whether sessions start with sync mode enabled.
    pub fn sync_default(&self) -> bool {
        self.defaults.sync.unwrap_or(true)
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        self.timing.merge(other.timing);
        if other.defaults.sync.is_some() {
            self.defaults.sync = other.defaults.sync;
        }
    }
}
