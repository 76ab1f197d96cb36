//! Supervisor configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

fn default_update_interval() -> u64 {
    5
}

fn default_interrupt_timeout() -> u64 {
    5
}

fn default_startup_ping_timeout() -> u64 {
    10
}

fn default_ipc_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Default parent directory for per-user helper socket directories.
#[must_use]
pub fn default_users_files_root() -> PathBuf {
    std::env::temp_dir().join("desktop-runner")
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Seconds between supervisor polls.
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
    /// Seconds to wait for helpers to exit on interrupt before killing them.
    #[serde(default = "default_interrupt_timeout")]
    pub interrupt_timeout_seconds: u64,
    /// Seconds to keep pinging a freshly launched helper; 0 disables the check.
    #[serde(default = "default_startup_ping_timeout")]
    pub startup_ping_timeout_seconds: u64,
    /// Per-request timeout for IPC calls to helpers.
    #[serde(default = "default_ipc_timeout")]
    pub ipc_timeout_seconds: u64,
    /// Whether helpers are spawned at all (desktop GUI enabled).
    #[serde(default = "default_true")]
    pub process_spawning_enabled: bool,
    /// Hostname of the control server, forwarded to helpers for icon selection.
    #[serde(default)]
    pub hostname: String,
    /// Parent directory for per-user socket directories.
    #[serde(default = "default_users_files_root")]
    pub users_files_root: PathBuf,
    /// Helper executable; defaults to the running binary.
    #[serde(default)]
    pub executable_path: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: default_update_interval(),
            interrupt_timeout_seconds: default_interrupt_timeout(),
            startup_ping_timeout_seconds: default_startup_ping_timeout(),
            ipc_timeout_seconds: default_ipc_timeout(),
            process_spawning_enabled: true,
            hostname: String::new(),
            users_files_root: default_users_files_root(),
            executable_path: None,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between supervisor polls.
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }

    /// Bounded wait for helper exit during shutdown.
    #[must_use]
    pub fn interrupt_timeout(&self) -> Duration {
        Duration::from_secs(self.interrupt_timeout_seconds)
    }

    /// Startup ping window, `None` when disabled.
    #[must_use]
    pub fn startup_ping_timeout(&self) -> Option<Duration> {
        (self.startup_ping_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.startup_ping_timeout_seconds))
    }

    /// Per-request IPC timeout.
    #[must_use]
    pub fn ipc_timeout(&self) -> Duration {
        Duration::from_secs(self.ipc_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.update_interval_seconds == 0 {
            return Err(AppError::Config(
                "update_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.interrupt_timeout_seconds == 0 {
            return Err(AppError::Config(
                "interrupt_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.ipc_timeout_seconds == 0 {
            return Err(AppError::Config(
                "ipc_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.users_files_root.as_os_str().is_empty() {
            return Err(AppError::Config("users_files_root must not be empty".into()));
        }

        Ok(())
    }
}
