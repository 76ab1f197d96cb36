//! Interactive desktop session enumeration.
//!
//! Each platform answers "which OS users currently have a local, graphical
//! session?" differently:
//!
//! - Linux: `loginctl` (one entry per active graphical seat user)
//! - macOS: `scutil` console owner (only the on-console user)
//! - Windows: owners of `explorer.exe` processes

use std::future::Future;
use std::pin::Pin;
#[cfg(unix)]
use std::process::Stdio;
use std::time::Duration;

#[cfg(unix)]
use tokio::io::AsyncWriteExt;
#[cfg(unix)]
use tokio::process::Command;

use crate::models::session::SessionIdentity;
#[cfg(unix)]
use crate::AppError;
use crate::Result;

pub mod parse;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(windows)]
pub mod windows;

/// Upper bound on one enumeration.
pub const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Lists the OS users with an interactive desktop session.
pub trait SessionEnumerator: Send + Sync {
    /// Identities with an active interactive session, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionEnumeration` when the platform tool fails or
    /// times out.
    fn list_interactive_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SessionIdentity>>> + Send + '_>>;
}

/// Enumerator for the platform this binary was built for.
#[must_use]
pub fn platform_enumerator() -> Box<dyn SessionEnumerator> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::LoginctlEnumerator::new())
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(macos::ScutilEnumerator::new())
    }
    #[cfg(windows)]
    {
        Box::new(windows::ExplorerEnumerator::new())
    }
}

/// Run a session tool with a timeout and return its stdout.
///
/// `stdin`, when given, is written to the child and then closed.
#[cfg(unix)]
pub(crate) async fn run_tool(program: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::SessionEnumeration(format!("spawning {program}: {err}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|err| AppError::SessionEnumeration(format!("writing {program} stdin: {err}")))?;
    }

    let output = tokio::time::timeout(ENUMERATION_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            AppError::SessionEnumeration(format!(
                "{program} did not finish within {}s",
                ENUMERATION_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|err| AppError::SessionEnumeration(format!("running {program}: {err}")))?;

    if !output.status.success() {
        return Err(AppError::SessionEnumeration(format!(
            "{program} {} failed ({}): {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
