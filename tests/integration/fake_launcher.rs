//! Fake session enumerator and launcher for supervisor tests.
//!
//! The fake launcher starts a real `sleep` process per session and hosts an
//! in-process helper IPC server at the address the supervisor derives from
//! that process's PID, so the supervisor's IPC, liveness, and kill paths all
//! run against real processes and sockets.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use desktop_runner::ipc::address::IpcAddress;
use desktop_runner::launcher::{
    ChildProcess, LaunchSpec, ProcessLauncher, TokioChild, ENV_AUTH_TOKEN, ENV_SOCKET_DIR,
    ENV_STATUS_PATH,
};
use desktop_runner::models::session::SessionIdentity;
use desktop_runner::session::SessionEnumerator;
use desktop_runner::status::StatusCache;
use desktop_runner::supervisor::SupervisorSettings;
use desktop_runner::{AppError, Result};

use super::test_helpers::{start_server_with_status, FakeNotifier};

// ── Enumerator ───────────────────────────────────────────────────────────

/// Enumerator whose answer the test controls.
#[derive(Clone)]
pub struct FakeEnumerator {
    answer: Arc<Mutex<std::result::Result<Vec<SessionIdentity>, String>>>,
}

impl Default for FakeEnumerator {
    fn default() -> Self {
        Self {
            answer: Arc::new(Mutex::new(Ok(Vec::new()))),
        }
    }
}

impl FakeEnumerator {
    pub fn with_sessions(ids: &[&str]) -> Self {
        let enumerator = Self::default();
        enumerator.set_sessions(ids);
        enumerator
    }

    pub fn set_sessions(&self, ids: &[&str]) {
        *self.answer.lock().unwrap() = Ok(ids.iter().map(|id| SessionIdentity::from(*id)).collect());
    }

    pub fn set_error(&self, message: &str) {
        *self.answer.lock().unwrap() = Err(message.to_owned());
    }
}

impl SessionEnumerator for FakeEnumerator {
    fn list_interactive_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionIdentity>>> + Send + '_>> {
        let answer = self.answer.lock().unwrap().clone();
        Box::pin(async move { answer.map_err(AppError::SessionEnumeration) })
    }
}

// ── Launcher ─────────────────────────────────────────────────────────────

/// How a fake helper reacts to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperBehavior {
    /// Serves IPC and exits on `shutdown`.
    Cooperative,
    /// Serves IPC but keeps running after `shutdown`.
    IgnoresShutdown,
    /// Never binds a socket.
    Silent,
}

/// One helper started by [`FakeLauncher`].
#[derive(Clone)]
pub struct LaunchedHelper {
    pub identity: SessionIdentity,
    pub pid: u32,
    pub notifier: Option<Arc<FakeNotifier>>,
    pub refreshes: Arc<AtomicUsize>,
    /// Status document as this helper last loaded it.
    pub status: Arc<StatusCache>,
    pub server_ct: CancellationToken,
}

#[derive(Default)]
struct LauncherState {
    launched: Mutex<Vec<LaunchedHelper>>,
    behavior: Mutex<Option<HelperBehavior>>,
    failing: Mutex<HashSet<SessionIdentity>>,
    failing_notifiers: Mutex<HashSet<SessionIdentity>>,
}

/// Launcher that runs `sleep` and hosts the helper's IPC server in-process.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<LauncherState>,
}

impl FakeLauncher {
    pub fn new(behavior: HelperBehavior) -> Self {
        let launcher = Self::default();
        *launcher.state.behavior.lock().unwrap() = Some(behavior);
        launcher
    }

    pub fn fail_for(&self, identity: &str) {
        self.state
            .failing
            .lock()
            .unwrap()
            .insert(SessionIdentity::from(identity));
    }

    pub fn fail_notifications_for(&self, identity: &str) {
        self.state
            .failing_notifiers
            .lock()
            .unwrap()
            .insert(SessionIdentity::from(identity));
    }

    pub fn launched(&self) -> Vec<LaunchedHelper> {
        self.state.launched.lock().unwrap().clone()
    }

    pub fn launch_count(&self, identity: &str) -> usize {
        let identity = SessionIdentity::from(identity);
        self.launched()
            .iter()
            .filter(|helper| helper.identity == identity)
            .count()
    }

    /// Stop every in-process server.
    pub fn stop_servers(&self) {
        for helper in self.launched() {
            helper.server_ct.cancel();
        }
    }

    async fn start(&self, identity: &SessionIdentity, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>> {
        if self.state.failing.lock().unwrap().contains(identity) {
            return Err(AppError::Launch(format!("refusing to launch for {identity}")));
        }
        let behavior = self
            .state
            .behavior
            .lock()
            .unwrap()
            .unwrap_or(HelperBehavior::Cooperative);
        let notifier_fails = self.state.failing_notifiers.lock().unwrap().contains(identity);

        let socket_dir = PathBuf::from(&spec.env[ENV_SOCKET_DIR]);
        let token = spec.env[ENV_AUTH_TOKEN].clone();
        let status = Arc::new(StatusCache::new(PathBuf::from(&spec.env[ENV_STATUS_PATH])));
        let _ = status.reload();

        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Launch(err.to_string()))?;
        let child = TokioChild::new(child)?;
        let pid = child.id();

        let mut helper = LaunchedHelper {
            identity: identity.clone(),
            pid,
            notifier: None,
            refreshes: Arc::new(AtomicUsize::new(0)),
            status: Arc::clone(&status),
            server_ct: CancellationToken::new(),
        };

        if behavior != HelperBehavior::Silent {
            let notifier = if notifier_fails {
                FakeNotifier::failing()
            } else {
                FakeNotifier::default()
            };
            let address = IpcAddress::for_pid(&socket_dir, pid)?;
            let server = start_server_with_status(address, &token, notifier, Some(status)).await;

            if behavior == HelperBehavior::Cooperative {
                let shutdown = server.shutdown.clone();
                let server_ct = server.server_ct.clone();
                tokio::spawn(async move {
                    shutdown.cancelled().await;
                    server_ct.cancel();
                    kill_pid(pid);
                });
            }

            helper.notifier = Some(server.notifier);
            helper.refreshes = server.refreshes;
            helper.server_ct = server.server_ct;
        }

        self.state.launched.lock().unwrap().push(helper);
        Ok(Box::new(child))
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch<'a>(
        &'a self,
        identity: &'a SessionIdentity,
        spec: &'a LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChildProcess>>> + Send + 'a>> {
        Box::pin(self.start(identity, spec))
    }
}

// ── Misc ─────────────────────────────────────────────────────────────────

/// Send SIGKILL to `pid`.
pub fn kill_pid(pid: u32) {
    let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap());
    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
}

/// Fast settings rooted at `root`.
pub fn test_settings(root: &Path) -> SupervisorSettings {
    SupervisorSettings {
        update_interval: Duration::from_millis(100),
        interrupt_timeout: Duration::from_secs(1),
        startup_ping_timeout: Some(Duration::from_secs(3)),
        startup_ping_interval: Duration::from_millis(50),
        ipc_timeout: Duration::from_secs(1),
        process_spawning_enabled: true,
        hostname: "test-host".into(),
        users_files_root: root.to_path_buf(),
        executable_path: Some(PathBuf::from("/bin/sleep")),
        auth_token: uuid::Uuid::new_v4().to_string(),
    }
}
