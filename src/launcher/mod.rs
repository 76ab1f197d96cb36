//! Starting the helper binary as a specific OS user.
//!
//! The launcher:
//! - starts the helper directly when the target user is the caller;
//! - impersonates the target user when the caller is privileged (root on
//!   Unix, a service holding a user's shell token on Windows);
//! - strips the inherited environment down to [`ALLOWED_ENV_VARS`] plus the
//!   variables in the [`LaunchSpec`], so agent secrets never reach a helper;
//! - forwards helper stdout/stderr into the supervisor's log.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::info;

use crate::models::exit::ExitOutcome;
use crate::models::session::SessionIdentity;
use crate::{AppError, Result};

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

/// Helper auth token variable of the spawn contract.
pub const ENV_AUTH_TOKEN: &str = "DESKTOP_RUNNER_AUTH_TOKEN";
/// Per-user socket directory variable of the spawn contract.
pub const ENV_SOCKET_DIR: &str = "DESKTOP_RUNNER_SOCKET_DIR";
/// Agent hostname variable of the spawn contract.
pub const ENV_HOSTNAME: &str = "DESKTOP_RUNNER_HOSTNAME";
/// Supervisor PID variable of the spawn contract.
pub const ENV_PARENT_PID: &str = "DESKTOP_RUNNER_PARENT_PID";
/// Shared status document variable of the spawn contract.
pub const ENV_STATUS_PATH: &str = "DESKTOP_RUNNER_STATUS_PATH";

/// Subcommand that puts the binary in helper mode.
pub const HELPER_SUBCOMMAND: &str = "desktop";

/// Environment variables inherited by helper processes.
///
/// Every other variable is stripped via `env_clear()` before launch.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "RUST_LOG",
    "TEMP",
    "TMP",
    "TMPDIR",
    "LANG",
    // Windows-specific variables.
    "SystemRoot",
    "COMSPEC",
];

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Helper executable.
    pub executable: PathBuf,
    /// Arguments after the executable.
    pub args: Vec<String>,
    /// Extra environment on top of the allowlist.
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Spawn contract for a helper: `<exe> desktop` plus the contract
    /// environment.
    #[must_use]
    pub fn helper(
        executable: PathBuf,
        auth_token: &str,
        socket_dir: &std::path::Path,
        status_path: &std::path::Path,
        hostname: &str,
        parent_pid: u32,
    ) -> Self {
        let env = BTreeMap::from([
            (ENV_AUTH_TOKEN.to_owned(), auth_token.to_owned()),
            (ENV_SOCKET_DIR.to_owned(), socket_dir.display().to_string()),
            (ENV_HOSTNAME.to_owned(), hostname.to_owned()),
            (ENV_PARENT_PID.to_owned(), parent_pid.to_string()),
            (ENV_STATUS_PATH.to_owned(), status_path.display().to_string()),
        ]);

        Self {
            executable,
            args: vec![HELPER_SUBCOMMAND.to_owned()],
            env,
        }
    }
}

/// A running child process, however it was started.
pub trait ChildProcess: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Wait for the process to exit and reap it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the OS wait fails.
    fn wait(&mut self) -> Pin<Box<dyn Future<Output = Result<ExitOutcome>> + Send + '_>>;

    /// Request a forced kill without waiting for exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the kill could not be delivered.
    fn start_kill(&mut self) -> Result<()>;
}

/// Starts helpers as a given OS user.
pub trait ProcessLauncher: Send + Sync {
    /// Start `spec` running as `identity`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` when impersonation is not possible or the
    /// process cannot be created.
    fn launch<'a>(
        &'a self,
        identity: &'a SessionIdentity,
        spec: &'a LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChildProcess>>> + Send + 'a>>;
}

/// Launcher for the platform this binary was built for.
#[must_use]
pub fn platform_launcher() -> Box<dyn ProcessLauncher> {
    #[cfg(unix)]
    {
        Box::new(unix::UserLauncher::new())
    }
    #[cfg(windows)]
    {
        Box::new(windows::TokenLauncher::new())
    }
}

/// [`ChildProcess`] over a `tokio::process::Child`.
#[derive(Debug)]
pub struct TokioChild {
    pid: u32,
    child: tokio::process::Child,
}

impl TokioChild {
    /// Wrap a spawned child.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the child already exited and has no pid.
    pub fn new(child: tokio::process::Child) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| AppError::Launch("child exited before its pid was read".into()))?;
        Ok(Self { pid, child })
    }
}

impl ChildProcess for TokioChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = Result<ExitOutcome>> + Send + '_>> {
        Box::pin(async move {
            let status = self
                .child
                .wait()
                .await
                .map_err(|err| AppError::Io(format!("waiting for pid {}: {err}", self.pid)))?;
            Ok(ExitOutcome::from(status))
        })
    }

    fn start_kill(&mut self) -> Result<()> {
        self.child
            .start_kill()
            .map_err(|err| AppError::Io(format!("killing pid {}: {err}", self.pid)))
    }
}

/// Forward each line of a helper output stream into the log.
pub(crate) fn forward_output<R>(stream: R, uid: String, pid: u32, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(uid, pid, subprocess = "desktop", stream = stream_name, "{line}");
        }
    });
}
