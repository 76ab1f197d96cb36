//! Desktop helper supervisor.
//!
//! Keeps one helper process alive per interactive desktop user:
//!
//! 1. **Poll**: on a fixed interval, list interactive sessions and launch a
//!    helper for every user that lacks a live one.
//! 2. **Watch**: every helper gets an exit-watcher task that reaps it and can
//!    force-kill it through a per-process kill switch.
//! 3. **Drain**: on interrupt, ask every helper to shut down over IPC, wait
//!    up to the interrupt timeout, then kill whatever is left.
//!
//! The registry is owned by the loop task. Callers interact through a
//! cloneable [`SupervisorHandle`], whose requests the loop executes itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;

use crate::config::GlobalConfig;
use crate::launcher::{platform_launcher, ProcessLauncher};
use crate::models::notification::Notification;
use crate::session::{platform_enumerator, SessionEnumerator};
use crate::{AppError, Result};

pub mod registry;
pub mod runner;
pub mod shutdown;
mod watcher;

use registry::{LivenessProbe, ProcessRecord, ProcessRegistry, SysinfoProbe};
pub use shutdown::DrainOutcome;
use shutdown::Interrupter;

/// Interval between startup ping attempts.
pub const STARTUP_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Depth of the handle → loop command queue.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Runtime settings of one supervisor run.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Delay between polls.
    pub update_interval: Duration,
    /// How long a drain waits for helpers to exit before killing them.
    pub interrupt_timeout: Duration,
    /// How long a new helper has to answer its first ping; `None` skips the
    /// check.
    pub startup_ping_timeout: Option<Duration>,
    /// Delay between startup ping attempts.
    pub startup_ping_interval: Duration,
    /// Per-request IPC timeout.
    pub ipc_timeout: Duration,
    /// Whether polls launch helpers; when `false` they drain instead.
    pub process_spawning_enabled: bool,
    /// Agent hostname handed to helpers.
    pub hostname: String,
    /// Root of the per-user socket directories and the status document.
    pub users_files_root: PathBuf,
    /// Helper executable; the running executable when `None`.
    pub executable_path: Option<PathBuf>,
    /// Bearer token shared with every helper of this run.
    pub auth_token: String,
}

impl SupervisorSettings {
    /// Settings from configuration, with a freshly generated auth token.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            update_interval: config.update_interval(),
            interrupt_timeout: config.interrupt_timeout(),
            startup_ping_timeout: config.startup_ping_timeout(),
            startup_ping_interval: STARTUP_PING_INTERVAL,
            ipc_timeout: config.ipc_timeout(),
            process_spawning_enabled: config.process_spawning_enabled,
            hostname: config.hostname.clone(),
            users_files_root: config.users_files_root.clone(),
            executable_path: config.executable_path.clone(),
            auth_token: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Platform collaborators of the supervisor.
pub struct SupervisorDeps {
    /// Lists interactive sessions.
    pub enumerator: Box<dyn SessionEnumerator>,
    /// Starts helpers as a given user.
    pub launcher: Box<dyn ProcessLauncher>,
    /// Decides whether a recorded PID is still our helper.
    pub probe: Box<dyn LivenessProbe>,
}

impl SupervisorDeps {
    /// Collaborators for the platform this binary was built for.
    #[must_use]
    pub fn platform() -> Self {
        Self {
            enumerator: platform_enumerator(),
            launcher: platform_launcher(),
            probe: Box::new(SysinfoProbe::new()),
        }
    }
}

/// Requests executed by the loop task on behalf of a handle.
enum Command {
    Notify {
        notification: Notification,
        reply: oneshot::Sender<Result<()>>,
    },
    Refresh {
        reply: oneshot::Sender<()>,
    },
    UpdateStatus {
        raw: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ProcessRecord>>,
    },
    SetSpawningEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
}

/// The supervisor loop. Consumed by [`Supervisor::run`].
pub struct Supervisor {
    settings: SupervisorSettings,
    deps: SupervisorDeps,
    registry: ProcessRegistry,
    watchers: TaskTracker,
    interrupter: Arc<Interrupter>,
    commands: mpsc::Receiver<Command>,
    spawning_enabled: bool,
}

impl Supervisor {
    /// Create a supervisor and the handle used to control it.
    #[must_use]
    pub fn new(settings: SupervisorSettings, deps: SupervisorDeps) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let interrupter = Arc::new(Interrupter::default());

        let handle = SupervisorHandle {
            commands: tx,
            interrupter: Arc::clone(&interrupter),
            auth_token: Arc::from(settings.auth_token.as_str()),
        };

        let supervisor = Self {
            spawning_enabled: settings.process_spawning_enabled,
            settings,
            deps,
            registry: ProcessRegistry::new(),
            watchers: TaskTracker::new(),
            interrupter,
            commands: rx,
        };

        (supervisor, handle)
    }
}

/// Cloneable control surface of a running [`Supervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    interrupter: Arc<Interrupter>,
    auth_token: Arc<str>,
}

impl SupervisorHandle {
    /// Stop the supervisor and drain its helpers.
    ///
    /// Safe to call from any number of tasks at once. Only the first call
    /// triggers the teardown and returns `true`; every call returns
    /// immediately.
    pub fn interrupt(&self, reason: &str) -> bool {
        self.interrupter.interrupt(reason)
    }

    /// Whether [`interrupt`](Self::interrupt) has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupter.is_interrupted()
    }

    /// Bearer token the helpers of this run accept.
    #[must_use]
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Show `notification` through every tracked helper.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` listing every helper that failed, or
    /// `AppError::Supervisor` if the loop is not running.
    pub async fn send_notification(&self, notification: Notification) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Notify {
            notification,
            reply,
        })
        .await?;
        rx.await.map_err(|_| dropped())?
    }

    /// Ask every tracked helper to refresh its displayed status.
    ///
    /// Individual helper failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Supervisor` if the loop is not running.
    pub async fn refresh_all(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Refresh { reply }).await?;
        rx.await.map_err(|_| dropped())
    }

    /// Validate `raw` as the new status document, write it where every
    /// helper can read it, then ask every helper to refresh.
    ///
    /// `{{version}}` and `{{hostname}}` inside string values are expanded
    /// first. Individual refresh failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Status` if `raw` is not a JSON object (nothing is
    /// written or refreshed), `AppError::Io` if the file cannot be written,
    /// or `AppError::Supervisor` if the loop is not running.
    pub async fn update_status(&self, raw: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UpdateStatus {
            raw: raw.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| dropped())?
    }

    /// Copy of the current registry entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Supervisor` if the loop is not running.
    pub async fn snapshot(&self) -> Result<Vec<ProcessRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| dropped())
    }

    /// Enable or disable helper launching. Disabling drains running helpers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Supervisor` if the loop is not running.
    pub async fn set_process_spawning_enabled(&self, enabled: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetSpawningEnabled { enabled, reply })
            .await?;
        rx.await.map_err(|_| dropped())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Supervisor("supervisor loop is not running".into()))
    }
}

fn dropped() -> AppError {
    AppError::Supervisor("supervisor loop stopped before answering".into())
}
