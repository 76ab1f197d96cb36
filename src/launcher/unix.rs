//! Credential-switching launcher for Linux and macOS.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use nix::unistd::{geteuid, Uid, User};
use tokio::process::Command;
use tracing::{debug, info};

use super::{forward_output, ChildProcess, LaunchSpec, ProcessLauncher, TokioChild, ALLOWED_ENV_VARS};
use crate::models::session::SessionIdentity;
use crate::{AppError, Result};

/// Desktop-session variables inherited only when launching for oneself.
const SESSION_ENV_VARS: &[&str] = &[
    "HOME",
    "USER",
    "LOGNAME",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "XAUTHORITY",
    "XDG_RUNTIME_DIR",
    "XDG_DATA_DIRS",
    "DBUS_SESSION_BUS_ADDRESS",
];

/// Default `XDG_DATA_DIRS`, plus the snapd desktop directory so `xdg-open`
/// finds snap-installed handlers.
#[cfg(target_os = "linux")]
const XDG_DATA_DIRS: &str = "/usr/local/share/:/usr/share/:/var/lib/snapd/desktop";

/// Runs the helper as the target uid, switching credentials when root.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserLauncher;

impl UserLauncher {
    /// Create the launcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn launch_as(
        &self,
        identity: &SessionIdentity,
        spec: &LaunchSpec,
    ) -> Result<Box<dyn ChildProcess>> {
        let target = Uid::from_raw(identity.as_uid()?);
        let current = geteuid();

        let mut cmd = base_command(spec);

        if current == target {
            for &key in SESSION_ENV_VARS {
                if let Ok(val) = std::env::var(key) {
                    cmd.env(key, val);
                }
            }
        } else if current.is_root() {
            let user = User::from_uid(target)
                .map_err(|err| AppError::Launch(format!("looking up user {identity}: {err}")))?
                .ok_or_else(|| AppError::Launch(format!("no user with uid {identity}")))?;

            cmd.uid(target.as_raw()).gid(user.gid.as_raw());
            cmd.env("HOME", &user.dir)
                .env("USER", &user.name)
                .env("LOGNAME", &user.name);

            #[cfg(target_os = "linux")]
            {
                let uid = target.as_raw();
                let runtime_dir = format!("/run/user/{uid}");
                cmd.env("DBUS_SESSION_BUS_ADDRESS", format!("unix:path={runtime_dir}/bus"))
                    .env("XDG_RUNTIME_DIR", runtime_dir)
                    .env("XDG_DATA_DIRS", XDG_DATA_DIRS);
                for (key, val) in crate::session::linux::display_env_for_uid(uid).await {
                    cmd.env(key, val);
                }
            }

            debug!(uid = %identity, user = %user.name, "launching with switched credentials");
        } else {
            return Err(AppError::Launch(format!(
                "current user {current} is not root and can't start process for other user {identity}"
            )));
        }

        // Contract variables win over anything inherited.
        cmd.envs(&spec.env);

        spawn(cmd, identity)
    }
}

impl ProcessLauncher for UserLauncher {
    fn launch<'a>(
        &'a self,
        identity: &'a SessionIdentity,
        spec: &'a LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChildProcess>>> + Send + 'a>> {
        Box::pin(self.launch_as(identity, spec))
    }
}

/// Command with a cleared environment and piped output.
fn base_command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.args);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

fn spawn(mut cmd: Command, identity: &SessionIdentity) -> Result<Box<dyn ChildProcess>> {
    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("starting helper for {identity}: {err}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = TokioChild::new(child)?;
    let pid = child.id();

    if let Some(stdout) = stdout {
        forward_output(stdout, identity.to_string(), pid, "stdout");
    }
    if let Some(stderr) = stderr {
        forward_output(stderr, identity.to_string(), pid, "stderr");
    }

    info!(uid = %identity, pid, "helper process started");
    Ok(Box::new(child))
}
